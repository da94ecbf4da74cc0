//! libusb backend
//!
//! Implements [`transport::HidBackend`] on top of rusb. All libusb calls are
//! blocking: enumeration, open, exchange and close run on Tokio's blocking
//! pool, and hot-plug handling runs on a dedicated thread that forwards
//! notifications through an async channel.

pub mod backend;
pub mod device;
pub mod hotplug;

pub use backend::{RusbBackend, map_rusb_error};
pub use device::HidDevice;
pub use hotplug::HotplugWatcher;
