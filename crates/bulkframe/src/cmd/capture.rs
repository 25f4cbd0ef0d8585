use std::fs::File;
use std::io::Read;

use bulkframe_device::{Device, NullControl};
use bulkframe_stream::ReaderEndpoint;
use tracing::info;

use crate::cmd::{parse_optional_duration, session, CaptureArgs};
use crate::exit::{device_error, io_error, CliResult};
use crate::output::OutputFormat;

pub fn run(args: CaptureArgs, format: OutputFormat) -> CliResult<i32> {
    let profile = args.stream.profile.load()?;
    let params = args.stream.resolve(&profile)?;
    let pace = parse_optional_duration(args.pace.as_deref())?;

    let (reader, source): (Box<dyn Read + Send>, String) = if args.input.as_os_str() == "-" {
        info!("reading capture from stdin; Ctrl-C waits for the pending read, close stdin to finish");
        (Box::new(std::io::stdin()), "stdin".to_string())
    } else {
        let file = File::open(&args.input).map_err(|err| {
            io_error(&format!("failed to open {}", args.input.display()), err)
        })?;
        (Box::new(file), args.input.display().to_string())
    };

    let endpoint = ReaderEndpoint::with_interval(reader, pace)
        .map_err(|err| io_error("failed to start reader", err))?;
    let device = Device::attach(profile, endpoint, NullControl)
        .map_err(|err| device_error("attach failed", err))?;

    session::consume(device, params, &args.stream, source, format)
}
