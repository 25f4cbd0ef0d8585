use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bulkframe_buffer::{page_size, FrameMapping, SharedFrameBuffer};
use bulkframe_stream::{
    BulkEndpoint, PumpConfig, SessionFailure, StatsSnapshot, StreamParameters, StreamState,
    StreamingController, DEFAULT_FRAME_WAIT,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::control::{ControlChannel, ControlData, ControlError, ControlRequest};
use crate::error::{DeviceError, Result};
use crate::profile::DeviceProfile;

/// Static facts reported by [`Device::get_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Engine version as four components (major, minor, patch, build).
    pub version: [u16; 4],
    pub frame_header_size: usize,
    pub frame_buffer_size: usize,
}

impl DeviceInfo {
    /// Info a device attached with `profile` reports.
    pub fn for_profile(profile: &DeviceProfile) -> Result<Self> {
        Ok(Self {
            version: engine_version(),
            frame_header_size: profile.header_size,
            frame_buffer_size: profile.frame_buffer_size()?,
        })
    }
}

/// One attached device: frame buffer, streaming engine and control pipe.
pub struct Device<E: BulkEndpoint, C: ControlChannel> {
    profile: DeviceProfile,
    info: DeviceInfo,
    controller: StreamingController<E>,
    control: Mutex<C>,
}

impl<E: BulkEndpoint, C: ControlChannel> Device<E, C> {
    /// Allocate the frame buffer for `profile` and bind the endpoints.
    pub fn attach(profile: DeviceProfile, endpoint: E, control: C) -> Result<Self> {
        Self::attach_with_config(profile, endpoint, control, PumpConfig::default())
    }

    /// Attach with explicit pump tuning.
    pub fn attach_with_config(
        profile: DeviceProfile,
        endpoint: E,
        control: C,
        config: PumpConfig,
    ) -> Result<Self> {
        let format = profile.frame_format()?;
        let info = DeviceInfo::for_profile(&profile)?;
        let buffer = SharedFrameBuffer::allocate(info.frame_buffer_size)?;
        info!(
            frame_buffer_size = info.frame_buffer_size,
            frame_header_size = info.frame_header_size,
            "device attached"
        );

        Ok(Self {
            profile,
            info,
            controller: StreamingController::new(format, buffer, endpoint, config),
            control: Mutex::new(control),
        })
    }

    pub fn get_info(&self) -> DeviceInfo {
        self.info
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Begin streaming. A no-op when already streaming.
    pub fn start_streaming(&self, params: StreamParameters) -> Result<()> {
        self.controller.start(params)?;
        Ok(())
    }

    /// Stop streaming and drain all transfers. Idempotent.
    pub fn stop_streaming(&self) -> Result<()> {
        self.controller.stop()?;
        Ok(())
    }

    /// Wait up to `timeout` for the offset of the next completed frame.
    ///
    /// The frame occupies `frame_total_size` bytes of the buffer starting at
    /// the returned offset, header first.
    pub fn get_frame(&self, timeout: Duration) -> Result<usize> {
        self.controller
            .queue()
            .pop(timeout)
            .ok_or(DeviceError::Timeout(timeout))
    }

    /// [`Device::get_frame`] with the default wait.
    pub fn next_frame(&self) -> Result<usize> {
        self.get_frame(DEFAULT_FRAME_WAIT)
    }

    /// Pass a vendor request through to the control pipe.
    ///
    /// The data stage is limited to one page. Returns the number of bytes
    /// transferred.
    pub fn vendor_control_transfer(
        &self,
        request: &ControlRequest,
        data: ControlData<'_>,
    ) -> Result<usize> {
        let limit = page_size();
        if data.len() > limit {
            return Err(DeviceError::SizeExceeded {
                what: "control payload",
                requested: data.len(),
                limit,
            });
        }
        if request.is_in() != data.is_in() {
            return Err(ControlError::DirectionMismatch {
                request_type: request.request_type,
            }
            .into());
        }

        debug!(
            request = request.request,
            request_type = request.request_type,
            len = data.len(),
            "vendor control transfer"
        );
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(control.control_transfer(request, data)?)
    }

    /// Map the first `len` bytes of the frame buffer read-only.
    pub fn map_frame_buffer(&self, len: usize) -> Result<FrameMapping> {
        let limit = self.info.frame_buffer_size;
        if len > limit {
            return Err(DeviceError::SizeExceeded {
                what: "mapping",
                requested: len,
                limit,
            });
        }
        Ok(self.controller.buffer().map(len)?)
    }

    pub fn state(&self) -> StreamState {
        self.controller.state()
    }

    pub fn last_failure(&self) -> Option<SessionFailure> {
        self.controller.last_failure()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.controller.stats()
    }

    /// Parameters of the current or most recent session.
    pub fn params(&self) -> Option<StreamParameters> {
        self.controller.params()
    }

    /// Stop streaming, then release the frame buffer.
    ///
    /// Mappings handed out by [`Device::map_frame_buffer`] stay readable
    /// until they are dropped.
    pub fn detach(self) -> Result<()> {
        let buffer = self.controller.shutdown()?;
        buffer.release()?;
        info!("device detached");
        Ok(())
    }
}

fn engine_version() -> [u16; 4] {
    let mut version = [0u16; 4];
    let core = env!("CARGO_PKG_VERSION")
        .split(['-', '+'])
        .next()
        .unwrap_or_default();
    for (slot, part) in version.iter_mut().zip(core.split('.')) {
        *slot = part.parse().unwrap_or(0);
    }
    version
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use bulkframe_stream::{SyntheticConfig, SyntheticEndpoint};

    use super::*;
    use crate::control::NullControl;

    const CHUNK: usize = 64;

    fn profile() -> DeviceProfile {
        DeviceProfile {
            signature: "ALEXP".to_string(),
            header_size: 16,
            max_frame_data_size: 3 * CHUNK - 16,
            max_frame_count: 3,
        }
    }

    fn params() -> StreamParameters {
        StreamParameters {
            chunk_size: CHUNK,
            chunks_per_operation: 2,
            operation_count: 4,
            frame_data_size: 3 * CHUNK - 16,
            frame_total_size: 3 * CHUNK,
        }
    }

    fn attach<C: ControlChannel>(control: C) -> Device<SyntheticEndpoint, C> {
        attach_with(
            control,
            SyntheticConfig {
                pace: Some(Duration::from_millis(1)),
                ..SyntheticConfig::default()
            },
        )
    }

    /// One frame and then nothing, so its bytes are never overwritten.
    fn single_frame() -> SyntheticConfig {
        SyntheticConfig {
            frame_limit: Some(1),
            ..SyntheticConfig::default()
        }
    }

    fn attach_with<C: ControlChannel>(
        control: C,
        config: SyntheticConfig,
    ) -> Device<SyntheticEndpoint, C> {
        let endpoint = SyntheticEndpoint::new(SyntheticConfig {
            chunk_size: CHUNK,
            frame_chunks: 3,
            ..config
        });
        Device::attach_with_config(
            profile(),
            endpoint,
            control,
            PumpConfig {
                poll_interval: Duration::from_millis(5),
                ..PumpConfig::default()
            },
        )
        .unwrap()
    }

    /// Echoes OUT payloads back on the next IN request.
    #[derive(Default)]
    struct Loopback {
        stored: Vec<u8>,
    }

    impl ControlChannel for Loopback {
        fn control_transfer(
            &mut self,
            _request: &ControlRequest,
            data: ControlData<'_>,
        ) -> std::result::Result<usize, ControlError> {
            match data {
                ControlData::Out(buf) => {
                    self.stored = buf.to_vec();
                    Ok(buf.len())
                }
                ControlData::In(buf) => {
                    let len = buf.len().min(self.stored.len());
                    buf[..len].copy_from_slice(&self.stored[..len]);
                    Ok(len)
                }
            }
        }
    }

    fn vendor(request_type: u8) -> ControlRequest {
        ControlRequest {
            request_type,
            request: 0x10,
            value: 0,
            index: 0,
            timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn info_reports_profile_and_version() {
        let device = attach(NullControl);
        let info = device.get_info();
        assert_eq!(info.frame_header_size, 16);
        assert_eq!(info.frame_buffer_size, page_size());
        assert_eq!(info.version, engine_version());
        assert_ne!(info.version, [0; 4]);
        assert_eq!(DeviceInfo::for_profile(&profile()).unwrap(), info);
    }

    #[test]
    fn frames_are_readable_in_place() {
        let device = attach_with(NullControl, single_frame());
        let mapping = device
            .map_frame_buffer(device.get_info().frame_buffer_size)
            .unwrap();
        device.start_streaming(params()).unwrap();

        let offset = device.get_frame(Duration::from_secs(5)).unwrap();
        assert_eq!(offset, 0);
        let frame = mapping.frame(offset, 3 * CHUNK).unwrap();
        assert!(frame.starts_with(b"ALEXP"));
        assert!(frame[CHUNK..].iter().all(|b| *b == 0));

        device.stop_streaming().unwrap();
        assert_eq!(device.state(), StreamState::Idle);
        drop(mapping);
        device.detach().unwrap();
    }

    #[test]
    fn get_frame_times_out_when_idle() {
        let device = attach(NullControl);
        let err = device.get_frame(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));
    }

    #[test]
    fn oversized_mapping_is_rejected() {
        let device = attach(NullControl);
        let len = device.get_info().frame_buffer_size + 1;
        assert!(matches!(
            device.map_frame_buffer(len),
            Err(DeviceError::SizeExceeded { .. })
        ));
    }

    #[test]
    fn control_transfers_pass_through() {
        let device = attach(Loopback::default());
        let sent = device
            .vendor_control_transfer(&vendor(0x40), ControlData::Out(b"hello"))
            .unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 8];
        let read = device
            .vendor_control_transfer(&vendor(0xC0), ControlData::In(&mut buf))
            .unwrap();
        assert_eq!(&buf[..read], b"hello");
    }

    #[test]
    fn control_payload_is_limited_to_one_page() {
        let device = attach(Loopback::default());
        let payload = vec![0u8; page_size() + 1];
        let err = device
            .vendor_control_transfer(&vendor(0x40), ControlData::Out(&payload))
            .unwrap_err();
        assert!(matches!(err, DeviceError::SizeExceeded { .. }));
    }

    #[test]
    fn control_direction_must_match_request() {
        let device = attach(Loopback::default());
        let err = device
            .vendor_control_transfer(&vendor(0xC0), ControlData::Out(b"x"))
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Control(ControlError::DirectionMismatch { .. })
        ));
    }

    #[test]
    fn detach_while_streaming_stops_first() {
        let device = attach(NullControl);
        device.start_streaming(params()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while device.stats().frames_completed == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(2));
        }
        device.detach().unwrap();
    }

    #[test]
    fn mapping_outlives_detach() {
        let device = attach_with(NullControl, single_frame());
        let mapping = device.map_frame_buffer(3 * CHUNK).unwrap();
        device.start_streaming(params()).unwrap();
        let offset = device.get_frame(Duration::from_secs(5)).unwrap();

        device.detach().unwrap();
        assert!(mapping.frame(offset, 3 * CHUNK).unwrap().starts_with(b"ALEXP"));
    }
}
