//! Open HID device
//!
//! Wraps a rusb device handle with the claimed HID interface and its
//! interrupt endpoints.

use devices::{DeviceDescriptor, NativeRef};
use rusb::{
    ConfigDescriptor, Context, Device, DeviceHandle, Direction, TransferType, UsbContext,
};
use std::time::Duration;
use tracing::{debug, warn};

/// USB interface class code for HID
const HID_CLASS: u8 = 0x03;

/// Default HID report size
const DEFAULT_REPORT_SIZE: usize = 64;

/// Backend reference for a device: `"<bus>-<address>"`
pub fn native_ref_of<T: UsbContext>(device: &Device<T>) -> NativeRef {
    NativeRef(format!("{}-{}", device.bus_number(), device.address()))
}

/// Descriptor of a device, or `None` if its descriptor cannot be read
pub fn descriptor_of<T: UsbContext>(device: &Device<T>) -> Option<DeviceDescriptor> {
    let desc = device.device_descriptor().ok()?;
    Some(DeviceDescriptor {
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        native_ref: native_ref_of(device),
    })
}

/// Endpoint summary used for interface selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub is_in: bool,
    pub is_interrupt: bool,
    pub max_packet_size: u16,
}

/// Interface summary used for interface selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub class_code: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Interface and endpoints an exchange uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidEndpoints {
    pub interface: u8,
    pub endpoint_in: u8,
    pub endpoint_out: u8,
    pub report_size: usize,
}

fn summarize(config: &ConfigDescriptor) -> Vec<InterfaceInfo> {
    config
        .interfaces()
        .flat_map(|interface| interface.descriptors())
        .map(|desc| InterfaceInfo {
            number: desc.interface_number(),
            class_code: desc.class_code(),
            endpoints: desc
                .endpoint_descriptors()
                .map(|ep| EndpointInfo {
                    address: ep.address(),
                    is_in: ep.direction() == Direction::In,
                    is_interrupt: ep.transfer_type() == TransferType::Interrupt,
                    max_packet_size: ep.max_packet_size(),
                })
                .collect(),
        })
        .collect()
}

/// Pick the HID interface to claim
///
/// With `preferred` set only that interface number is considered; otherwise
/// the first HID-class interface with interrupt IN and OUT endpoints wins.
pub fn select_hid_interface(
    interfaces: &[InterfaceInfo],
    preferred: Option<u8>,
) -> Option<HidEndpoints> {
    interfaces
        .iter()
        .filter(|i| match preferred {
            Some(number) => i.number == number,
            None => i.class_code == HID_CLASS,
        })
        .find_map(|i| {
            let input = i.endpoints.iter().find(|e| e.is_interrupt && e.is_in)?;
            let output = i.endpoints.iter().find(|e| e.is_interrupt && !e.is_in)?;
            let report_size = match input.max_packet_size {
                0 => DEFAULT_REPORT_SIZE,
                n => n as usize,
            };
            Some(HidEndpoints {
                interface: i.number,
                endpoint_in: input.address,
                endpoint_out: output.address,
                report_size,
            })
        })
}

pub struct HidDevice {
    handle: DeviceHandle<Context>,
    native_ref: NativeRef,
    endpoints: HidEndpoints,
}

impl HidDevice {
    /// Open `device` and claim its HID interface
    ///
    /// Kernel drivers are detached automatically where the platform supports
    /// it and reattached when the interface is released.
    pub fn open(device: &Device<Context>, preferred_interface: Option<u8>) -> Result<Self, rusb::Error> {
        let native_ref = native_ref_of(device);
        let config = device.active_config_descriptor()?;
        let endpoints = select_hid_interface(&summarize(&config), preferred_interface)
            .ok_or(rusb::Error::NotFound)?;

        let handle = device.open()?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Auto-detach of kernel driver unavailable: {}", e);
        }
        handle.claim_interface(endpoints.interface)?;

        debug!(
            "Opened {} interface {} (in={:#04x}, out={:#04x})",
            native_ref, endpoints.interface, endpoints.endpoint_in, endpoints.endpoint_out
        );

        Ok(Self {
            handle,
            native_ref,
            endpoints,
        })
    }

    pub fn native_ref(&self) -> &NativeRef {
        &self.native_ref
    }

    /// Write `request` as one report and read one report back
    pub fn exchange(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, rusb::Error> {
        self.handle
            .write_interrupt(self.endpoints.endpoint_out, request, timeout)?;

        let mut buf = vec![0u8; self.endpoints.report_size];
        let read = self
            .handle
            .read_interrupt(self.endpoints.endpoint_in, &mut buf, timeout)?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Release the claimed interface; the handle closes when dropped
    pub fn release(&self) -> Result<(), rusb::Error> {
        self.handle
            .release_interface(self.endpoints.interface)
            .inspect_err(|e| {
                warn!(
                    "Failed to release interface {} on {}: {}",
                    self.endpoints.interface, self.native_ref, e
                )
            })
    }
}
