//! Native device-access backend
//!
//! The transport layer never talks to hardware itself. Enumeration, open,
//! raw exchange, close and the hot-plug feed are provided by an implementation
//! of [`HidBackend`]. Every method other than [`HidBackend::is_available`] and
//! [`HidBackend::notifications`] may suspend the caller.

use async_trait::async_trait;
use devices::{DeviceDescriptor, NativeError, NativeHandle, NativeNotification};

#[async_trait]
pub trait HidBackend: Send + Sync + 'static {
    /// Whether the native capability exists in this environment
    ///
    /// Must not have side effects.
    fn is_available(&self) -> bool;

    /// Enumerate attached devices, unfiltered
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, NativeError>;

    /// Open a device for exchanges
    async fn open_device(&self, descriptor: &DeviceDescriptor) -> Result<NativeHandle, NativeError>;

    /// Send one request and wait for its response
    async fn exchange_raw(
        &self,
        handle: NativeHandle,
        request: &[u8],
    ) -> Result<Vec<u8>, NativeError>;

    /// Release a handle returned by [`HidBackend::open_device`]
    async fn close_device(&self, handle: NativeHandle) -> Result<(), NativeError>;

    /// Platform attach/detach feed
    ///
    /// Called once by the event bus. `None` when the platform has no hot-plug
    /// source.
    fn notifications(&self) -> Option<async_channel::Receiver<NativeNotification>>;
}
