use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bulkframe_device::{Device, DeviceError, NullControl};
use bulkframe_stream::{BulkEndpoint, StreamParameters, StreamState, TransferError};
use tracing::{debug, info};

use crate::cmd::{parse_duration, StreamArgs};
use crate::exit::{buffer_error, device_error, CliError, CliResult, INTERNAL, STREAM_ERROR, SUCCESS};
use crate::output::{print_frame, print_summary, FrameView, OutputFormat, SessionSummary};

/// Stream from an attached device until the source runs dry, `--count`
/// frames were delivered, or Ctrl-C; then detach and print a summary.
pub fn consume<E: BulkEndpoint>(
    device: Device<E, NullControl>,
    params: StreamParameters,
    args: &StreamArgs,
    source: String,
    format: OutputFormat,
) -> CliResult<i32> {
    let timeout = parse_duration(&args.frame_timeout)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let mapping = device
        .map_frame_buffer(device.get_info().frame_buffer_size)
        .map_err(|err| device_error("map frame buffer failed", err))?;
    device
        .start_streaming(params)
        .map_err(|err| device_error("start streaming failed", err))?;

    let signature_len = device.profile().signature.len();
    let mut delivered = 0u64;
    while running.load(Ordering::SeqCst) {
        let offset = match device.get_frame(timeout) {
            Ok(offset) => offset,
            Err(DeviceError::Timeout(_)) if device.state() == StreamState::Idle => break,
            Err(DeviceError::Timeout(_)) => continue,
            Err(err) => return Err(device_error("get frame failed", err)),
        };

        let [head, tail] = params.frame_ranges(offset);
        let parts = [
            mapping
                .frame(head.start, head.len())
                .map_err(|err| buffer_error("frame out of bounds", err))?,
            mapping
                .frame(tail.start, tail.len())
                .map_err(|err| buffer_error("frame out of bounds", err))?,
        ];
        print_frame(
            &FrameView {
                index: delivered,
                offset,
                parts,
                signature_len,
            },
            format,
        );
        delivered += 1;

        if args.count.is_some_and(|count| delivered >= count) {
            debug!(delivered, "frame count reached");
            break;
        }
    }

    if !running.load(Ordering::SeqCst) {
        info!(source = %source, "interrupted; waiting for outstanding transfers");
    }
    let failure = device.last_failure();
    device
        .stop_streaming()
        .map_err(|err| device_error("stop streaming failed", err))?;
    let summary = SessionSummary::new(
        source,
        delivered,
        device.state(),
        params,
        device.stats(),
        failure.as_ref().map(ToString::to_string),
    );
    drop(mapping);
    device
        .detach()
        .map_err(|err| device_error("detach failed", err))?;

    print_summary(&summary, format);
    info!(delivered, "session finished");

    // A source that simply ran out of data ends the session normally.
    match failure {
        Some(failure) if failure.last_error != TransferError::Disconnected => Ok(STREAM_ERROR),
        _ => Ok(SUCCESS),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
