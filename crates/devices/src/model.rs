//! Device model classification
//!
//! Ledger devices report either a legacy product id (one per model) or a
//! product id whose high byte identifies the model and whose low byte encodes
//! the enabled USB interfaces.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceModelId {
    Blue,
    NanoS,
    NanoX,
    #[serde(rename = "nanoSP")]
    NanoSP,
    Stax,
    Flex,
}

/// Static description of a device model
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceModel {
    pub id: DeviceModelId,
    pub product_name: &'static str,
    pub legacy_usb_product_id: u16,
    /// High byte of the product id in the interface-encoded scheme
    pub product_id_mm: u8,
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.product_name)
    }
}

pub static DEVICE_MODELS: &[DeviceModel] = &[
    DeviceModel {
        id: DeviceModelId::Blue,
        product_name: "Ledger Blue",
        legacy_usb_product_id: 0x0000,
        product_id_mm: 0x00,
    },
    DeviceModel {
        id: DeviceModelId::NanoS,
        product_name: "Ledger Nano S",
        legacy_usb_product_id: 0x0001,
        product_id_mm: 0x10,
    },
    DeviceModel {
        id: DeviceModelId::NanoX,
        product_name: "Ledger Nano X",
        legacy_usb_product_id: 0x0004,
        product_id_mm: 0x40,
    },
    DeviceModel {
        id: DeviceModelId::NanoSP,
        product_name: "Ledger Nano S Plus",
        legacy_usb_product_id: 0x0005,
        product_id_mm: 0x50,
    },
    DeviceModel {
        id: DeviceModelId::Stax,
        product_name: "Ledger Stax",
        legacy_usb_product_id: 0x0006,
        product_id_mm: 0x60,
    },
    DeviceModel {
        id: DeviceModelId::Flex,
        product_name: "Ledger Flex",
        legacy_usb_product_id: 0x0007,
        product_id_mm: 0x70,
    },
];

/// Identify a device model from its USB product id
///
/// Legacy ids win over the high-byte match.
pub fn identify_usb_product_id(product_id: u16) -> Option<&'static DeviceModel> {
    if let Some(model) = DEVICE_MODELS
        .iter()
        .find(|m| m.legacy_usb_product_id == product_id)
    {
        return Some(model);
    }

    let mm = (product_id >> 8) as u8;
    DEVICE_MODELS.iter().find(|m| m.product_id_mm == mm)
}
