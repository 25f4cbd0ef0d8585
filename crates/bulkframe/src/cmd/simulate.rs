use bulkframe_device::{Device, NullControl};
use bulkframe_stream::{SyntheticConfig, SyntheticEndpoint};

use crate::cmd::{parse_optional_duration, session, SimulateArgs};
use crate::exit::{device_error, CliResult};
use crate::output::OutputFormat;

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let profile = args.stream.profile.load()?;
    let params = args.stream.resolve(&profile)?;

    let endpoint = SyntheticEndpoint::new(SyntheticConfig {
        signature: profile.signature.clone().into_bytes().into(),
        chunk_size: params.chunk_size,
        frame_chunks: params.chunks_per_frame(),
        gap_chunks: args.gap_chunks,
        truncate_every: args.drop_every,
        frame_limit: Some(args.frames),
        fail_after: args.fail_after,
        pace: parse_optional_duration(args.pace.as_deref())?,
    });
    let device = Device::attach(profile, endpoint, NullControl)
        .map_err(|err| device_error("attach failed", err))?;

    let source = format!("synthetic ({} frames)", args.frames);
    session::consume(device, params, &args.stream, source, format)
}
