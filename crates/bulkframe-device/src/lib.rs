//! Control surface for one attached streaming device.
//!
//! A [`Device`] owns the shared frame buffer, the streaming controller and
//! the vendor control channel of a single attachment. There is no global
//! state: every attachment is its own value.

pub mod control;
pub mod device;
pub mod error;
pub mod profile;

pub use control::{
    ControlChannel, ControlData, ControlError, ControlRequest, NullControl, USB_DIR_IN,
};
pub use device::{Device, DeviceInfo};
pub use error::{DeviceError, Result};
pub use profile::{
    DeviceProfile, DEFAULT_MAX_FRAME_COUNT, DEFAULT_MAX_FRAME_DATA_SIZE,
};
