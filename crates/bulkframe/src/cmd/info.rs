use bulkframe_buffer::page_size;
use bulkframe_device::DeviceInfo;
use serde::Serialize;

use crate::cmd::InfoArgs;
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct InfoOutput {
    schema_id: &'static str,
    version: [u16; 4],
    frame_header_size: usize,
    frame_buffer_size: usize,
    signature: String,
    max_frame_data_size: usize,
    max_frame_count: usize,
    page_size: usize,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let profile = args.profile.load()?;
    let info =
        DeviceInfo::for_profile(&profile).map_err(|err| device_error("invalid profile", err))?;

    let out = InfoOutput {
        schema_id: "https://schemas.3leaps.dev/bulkframe/cli/v1/device-info.schema.json",
        version: info.version,
        frame_header_size: info.frame_header_size,
        frame_buffer_size: info.frame_buffer_size,
        signature: profile.signature,
        max_frame_data_size: profile.max_frame_data_size,
        max_frame_count: profile.max_frame_count,
        page_size: page_size(),
    };

    print_info(&out, format);
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            let version = out
                .version
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(".");
            println!("Device Info:");
            println!("  Version:            {version}");
            println!("  Signature:          {}", out.signature);
            println!("  Frame header size:  {}", out.frame_header_size);
            println!("  Max frame data:     {}", out.max_frame_data_size);
            println!("  Max frame count:    {}", out.max_frame_count);
            println!(
                "  Frame buffer size:  {} ({} pages)",
                out.frame_buffer_size,
                out.frame_buffer_size / out.page_size.max(1)
            );
        }
        OutputFormat::Raw => {
            println!("{}", out.frame_buffer_size);
        }
    }
}
