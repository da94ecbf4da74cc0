//! Device data model for ledger-hid
//!
//! This crate defines the types shared between the transport layer and the
//! native backends: device descriptors, derived device models, connection
//! events, raw platform notifications, and the error taxonomy.
//!
//! # Organization
//!
//! - [`types`]: descriptors, handles, events and notifications
//! - [`model`]: product id to device model classification
//! - [`error`]: native and transport error types

pub mod error;
pub mod model;
pub mod types;

pub use error::{InvalidState, NativeError, TransportError};
pub use model::{DEVICE_MODELS, DeviceModel, DeviceModelId, identify_usb_product_id};
pub use types::{
    DeviceDescriptor, DeviceEvent, LEDGER_USB_VENDOR_ID, NativeHandle, NativeNotification,
    NativeRef,
};
