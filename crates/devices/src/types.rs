//! Device descriptors, handles and connection events
//!
//! A [`DeviceDescriptor`] is produced by the native enumerator or by the
//! platform hot-plug source and is never mutated afterwards. Events wrap a
//! descriptor together with the model derived from its product id.

use crate::error::NativeError;
use crate::model::{DeviceModel, identify_usb_product_id};
use serde::{Deserialize, Serialize};
use std::fmt;

/// USB vendor id assigned to Ledger
pub const LEDGER_USB_VENDOR_ID: u16 = 0x2c97;

/// Opaque platform reference for one attachment
///
/// The content is backend specific (a bus/address pair, a hidraw path, ...)
/// and is only compared for identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeRef(pub String);

impl NativeRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one physical attachment
///
/// Equality and hashing cover all three fields; this is the identity used to
/// de-duplicate snapshot and live events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Backend reference used to open the device
    pub native_ref: NativeRef,
}

impl DeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16, native_ref: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            native_ref: NativeRef::new(native_ref),
        }
    }

    /// Model derived from the product id, if it is a known one
    pub fn model(&self) -> Option<&'static DeviceModel> {
        identify_usb_product_id(self.product_id)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}@{}",
            self.vendor_id, self.product_id, self.native_ref
        )
    }
}

/// Handle returned by the native open primitive
///
/// Exclusively owned by the session that opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle(pub u64);

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Attach/detach event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceEvent {
    /// Device present, either from the initial snapshot or hot-plugged
    #[serde(rename = "add")]
    Added {
        descriptor: DeviceDescriptor,
        model: Option<&'static DeviceModel>,
    },
    /// Device detached
    #[serde(rename = "remove")]
    Removed {
        descriptor: DeviceDescriptor,
        model: Option<&'static DeviceModel>,
    },
}

impl DeviceEvent {
    pub fn added(descriptor: DeviceDescriptor) -> Self {
        let model = descriptor.model();
        Self::Added { descriptor, model }
    }

    pub fn removed(descriptor: DeviceDescriptor) -> Self {
        let model = descriptor.model();
        Self::Removed { descriptor, model }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        match self {
            Self::Added { descriptor, .. } | Self::Removed { descriptor, .. } => descriptor,
        }
    }

    pub fn model(&self) -> Option<&'static DeviceModel> {
        match self {
            Self::Added { model, .. } | Self::Removed { model, .. } => *model,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added { .. })
    }
}

/// Raw notification from the platform hot-plug source
///
/// Not yet vendor filtered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeNotification {
    Attached(DeviceDescriptor),
    Detached(DeviceDescriptor),
    Error(NativeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceModelId;

    #[test]
    fn test_descriptor_identity() {
        let a = DeviceDescriptor::new(LEDGER_USB_VENDOR_ID, 0x4011, "1-4");
        let b = DeviceDescriptor::new(LEDGER_USB_VENDOR_ID, 0x4011, "1-4");
        let c = DeviceDescriptor::new(LEDGER_USB_VENDOR_ID, 0x4011, "1-5");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_event_carries_model() {
        let event = DeviceEvent::added(DeviceDescriptor::new(LEDGER_USB_VENDOR_ID, 0x1011, "1-2"));
        assert!(event.is_added());
        assert_eq!(event.model().map(|m| m.id), Some(DeviceModelId::NanoS));

        let event = DeviceEvent::removed(DeviceDescriptor::new(LEDGER_USB_VENDOR_ID, 0xff00, "1-2"));
        assert!(!event.is_added());
        assert!(event.model().is_none());
    }

    #[test]
    fn test_descriptor_display() {
        let d = DeviceDescriptor::new(0x2c97, 0x0001, "3-7");
        assert_eq!(d.to_string(), "2c97:0001@3-7");
    }
}
