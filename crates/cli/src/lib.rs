//! ledger-hid command line support
//!
//! Configuration loading and the libusb-backed [`transport::HidBackend`]
//! used by the `ledger-hid` binary.

pub mod config;
pub mod usb;

pub use config::CliConfig;
pub use usb::RusbBackend;
