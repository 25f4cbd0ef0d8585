use std::time::Duration;

/// Direction bit of `request_type`: set for device-to-host transfers.
pub const USB_DIR_IN: u8 = 0x80;

/// Setup fields of a vendor control transfer, passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub timeout: Duration,
}

impl ControlRequest {
    /// True when the request reads from the device.
    pub fn is_in(&self) -> bool {
        self.request_type & USB_DIR_IN != 0
    }
}

/// Data stage of a control transfer.
#[derive(Debug)]
pub enum ControlData<'a> {
    /// Device-to-host: filled by the channel.
    In(&'a mut [u8]),
    /// Host-to-device: sent as is.
    Out(&'a [u8]),
}

impl ControlData<'_> {
    pub fn len(&self) -> usize {
        match self {
            ControlData::In(buf) => buf.len(),
            ControlData::Out(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_in(&self) -> bool {
        matches!(self, ControlData::In(_))
    }
}

/// Why a control transfer failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// The data stage direction disagrees with the request type.
    #[error("data direction does not match request type {request_type:#04x}")]
    DirectionMismatch { request_type: u8 },

    /// The device rejected the request.
    #[error("request {request:#04x} stalled")]
    Stall { request: u8 },

    /// The transfer did not finish within its timeout.
    #[error("control transfer timed out after {0:?}")]
    Timeout(Duration),

    /// The device is gone.
    #[error("device detached")]
    Detached,

    /// This attachment has no control pipe.
    #[error("control transfers not supported")]
    Unsupported,
}

/// Vendor control pipe of a device.
pub trait ControlChannel: Send {
    /// Perform one transfer and return the number of data bytes moved.
    fn control_transfer(
        &mut self,
        request: &ControlRequest,
        data: ControlData<'_>,
    ) -> Result<usize, ControlError>;
}

impl<C: ControlChannel + ?Sized> ControlChannel for Box<C> {
    fn control_transfer(
        &mut self,
        request: &ControlRequest,
        data: ControlData<'_>,
    ) -> Result<usize, ControlError> {
        (**self).control_transfer(request, data)
    }
}

/// Control channel for sources without a control pipe, such as captures.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullControl;

impl ControlChannel for NullControl {
    fn control_transfer(
        &mut self,
        _request: &ControlRequest,
        _data: ControlData<'_>,
    ) -> Result<usize, ControlError> {
        Err(ControlError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(request_type: u8) -> ControlRequest {
        ControlRequest {
            request_type,
            request: 0x01,
            value: 0,
            index: 0,
            timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn direction_follows_request_type() {
        assert!(request(0xC0).is_in());
        assert!(!request(0x40).is_in());
    }

    #[test]
    fn null_control_is_unsupported() {
        let mut buf = [0u8; 4];
        let err = NullControl
            .control_transfer(&request(0xC0), ControlData::In(&mut buf))
            .unwrap_err();
        assert_eq!(err, ControlError::Unsupported);
    }

    #[test]
    fn data_reports_length_and_direction() {
        let mut buf = [0u8; 8];
        let data = ControlData::In(&mut buf);
        assert_eq!(data.len(), 8);
        assert!(data.is_in());
        assert!(ControlData::Out(&[]).is_empty());
    }
}
