//! Session and event coordination for Ledger HID devices
//!
//! This crate sits between application code and a native device-access
//! backend. It provides the de-duplicated attach/detach event stream
//! ([`DeviceEventBus`]), serialized request/response sessions
//! ([`TransportSession`]) with disconnect detection, and the
//! [`HidTransport`] facade tying both to one backend.

pub mod backend;
pub mod config;
pub mod disconnect;
pub mod error;
pub mod events;
pub mod hid;
pub mod logging;
pub mod session;
pub mod test_utils;

pub use backend::HidBackend;
pub use config::TransportConfig;
pub use disconnect::DisconnectSignals;
pub use error::{Error, Result};
pub use events::{DeviceEventBus, DeviceEventStream, Subscription};
pub use hid::HidTransport;
pub use logging::setup_logging;
pub use session::{DisconnectNotice, SessionState, TransportSession};
