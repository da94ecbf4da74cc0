//! rusb implementation of [`HidBackend`]

use super::device::{HidDevice, descriptor_of};
use super::hotplug::HotplugWatcher;
use crate::config::UsbSettings;
use async_trait::async_trait;
use devices::{DeviceDescriptor, NativeError, NativeHandle, NativeNotification};
use rusb::{Context, UsbContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use transport::HidBackend;

/// Map rusb errors to backend error messages
///
/// Transfer failures on a vanished device are reported as `"I/O error"`,
/// the message the transport treats as a disconnect by default.
pub fn map_rusb_error(err: rusb::Error) -> NativeError {
    match err {
        rusb::Error::Io | rusb::Error::NoDevice => NativeError::new("I/O error"),
        rusb::Error::Busy => NativeError::new("device busy"),
        rusb::Error::Access => NativeError::new("permission denied"),
        rusb::Error::NotFound => NativeError::new("device not found"),
        rusb::Error::Timeout => NativeError::new("Timeout"),
        other => NativeError::new(other.to_string()),
    }
}

fn join_error(e: tokio::task::JoinError) -> NativeError {
    NativeError::new(format!("USB task failed: {e}"))
}

pub struct RusbBackend {
    context: Option<Context>,
    settings: UsbSettings,
    open: Mutex<HashMap<NativeHandle, Arc<HidDevice>>>,
    next_handle: AtomicU64,
    watcher: Mutex<Option<HotplugWatcher>>,
}

impl RusbBackend {
    /// Create the backend
    ///
    /// A libusb context that cannot be initialized leaves the backend
    /// unavailable rather than failing.
    pub fn new(settings: UsbSettings) -> Self {
        let context = match Context::new() {
            Ok(context) => Some(context),
            Err(e) => {
                warn!("libusb unavailable: {}", e);
                None
            }
        };

        Self {
            context,
            settings,
            open: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            watcher: Mutex::new(None),
        }
    }

    fn context(&self) -> Result<Context, NativeError> {
        self.context
            .clone()
            .ok_or_else(|| NativeError::new("libusb unavailable"))
    }

    fn device(&self, handle: NativeHandle) -> Result<Arc<HidDevice>, NativeError> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or_else(|| NativeError::new(format!("invalid handle {handle}")))
    }

    fn is_open(&self, descriptor: &DeviceDescriptor) -> bool {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|device| device.native_ref() == &descriptor.native_ref)
    }
}

#[async_trait]
impl HidBackend for RusbBackend {
    fn is_available(&self) -> bool {
        self.context.is_some()
    }

    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, NativeError> {
        let context = self.context()?;
        tokio::task::spawn_blocking(move || {
            let devices = context.devices().map_err(map_rusb_error)?;
            let descriptors: Vec<_> = devices
                .iter()
                .filter_map(|device| {
                    let descriptor = descriptor_of(&device);
                    if descriptor.is_none() {
                        debug!(
                            "Skipping device with unreadable descriptor (bus={}, addr={})",
                            device.bus_number(),
                            device.address()
                        );
                    }
                    descriptor
                })
                .collect();
            debug!("Enumerated {} USB devices", descriptors.len());
            Ok(descriptors)
        })
        .await
        .map_err(join_error)?
    }

    async fn open_device(&self, descriptor: &DeviceDescriptor) -> Result<NativeHandle, NativeError> {
        let context = self.context()?;
        if self.is_open(descriptor) {
            return Err(NativeError::new("device busy"));
        }

        let target = descriptor.clone();
        let interface = self.settings.hid_interface;
        let device = tokio::task::spawn_blocking(move || {
            let devices = context.devices().map_err(map_rusb_error)?;
            let device = devices
                .iter()
                .find(|d| descriptor_of(d).as_ref() == Some(&target))
                .ok_or_else(|| NativeError::new("device not found"))?;
            HidDevice::open(&device, interface).map_err(map_rusb_error)
        })
        .await
        .map_err(join_error)??;

        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if open.values().any(|d| d.native_ref() == device.native_ref()) {
            // Lost an open race; release failures are logged by release()
            device.release().ok();
            return Err(NativeError::new("device busy"));
        }
        let handle = NativeHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        info!("Opened {} as {}", descriptor, handle);
        open.insert(handle, Arc::new(device));
        Ok(handle)
    }

    async fn exchange_raw(
        &self,
        handle: NativeHandle,
        request: &[u8],
    ) -> Result<Vec<u8>, NativeError> {
        let device = self.device(handle)?;
        let request = request.to_vec();
        let timeout = self.settings.exchange_timeout();
        tokio::task::spawn_blocking(move || {
            device.exchange(&request, timeout).map_err(map_rusb_error)
        })
        .await
        .map_err(join_error)?
    }

    async fn close_device(&self, handle: NativeHandle) -> Result<(), NativeError> {
        let device = self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .ok_or_else(|| NativeError::new(format!("invalid handle {handle}")))?;

        let native_ref = device.native_ref().clone();
        tokio::task::spawn_blocking(move || device.release().map_err(map_rusb_error))
            .await
            .map_err(join_error)??;
        info!("Closed {} ({})", handle, native_ref);
        Ok(())
    }

    fn notifications(&self) -> Option<async_channel::Receiver<NativeNotification>> {
        let context = self.context.clone()?;
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = watcher.as_ref() {
            return Some(existing.receiver());
        }

        match HotplugWatcher::spawn(context, self.settings.poll_interval()) {
            Ok(started) => {
                let receiver = started.receiver();
                *watcher = Some(started);
                Some(receiver)
            }
            Err(e) => {
                warn!("Failed to start USB hot-plug watcher: {}", e);
                None
            }
        }
    }
}
