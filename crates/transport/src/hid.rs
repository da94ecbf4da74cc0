//! HID transport facade
//!
//! Bundles one backend with its event bus and the configured disconnect
//! signals. This is the entry point application code normally uses.

use crate::backend::HidBackend;
use crate::config::TransportConfig;
use crate::disconnect::DisconnectSignals;
use crate::events::{DeviceEventBus, DeviceEventStream, Subscription};
use crate::session::TransportSession;
use devices::{DeviceDescriptor, DeviceEvent, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct HidTransport {
    backend: Arc<dyn HidBackend>,
    bus: DeviceEventBus,
    signals: DisconnectSignals,
}

impl HidTransport {
    /// Create the transport and start its event bus
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(backend: Arc<dyn HidBackend>, config: &TransportConfig) -> Self {
        let bus = DeviceEventBus::start(backend.clone(), config);
        Self {
            backend,
            bus,
            signals: DisconnectSignals::from(config),
        }
    }

    /// Whether this transport can work in the current environment
    pub fn is_supported(&self) -> bool {
        self.backend.is_available()
    }

    pub fn bus(&self) -> &DeviceEventBus {
        &self.bus
    }

    /// Currently attached devices of the configured vendor
    pub async fn list(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.bus.list_current().await
    }

    pub async fn events(&self) -> DeviceEventStream {
        self.bus.events().await
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: FnMut(Result<DeviceEvent, TransportError>) + Send + 'static,
    {
        self.bus.subscribe(observer)
    }

    pub async fn open(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<TransportSession, TransportError> {
        TransportSession::open(self.backend.clone(), descriptor, self.signals.clone()).await
    }

    /// Open the first device that is attached or gets attached within `timeout`
    pub async fn create(&self, timeout: Duration) -> Result<TransportSession, TransportError> {
        if !self.is_supported() {
            return Err(TransportError::Unsupported);
        }

        let mut events = self.events().await;
        let first = tokio::time::timeout(timeout, async {
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) if event.is_added() => return Ok(event.descriptor().clone()),
                    Ok(_) | Err(TransportError::Lagged(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Err(TransportError::NoDeviceFound)
        })
        .await
        .map_err(|_| TransportError::NoDeviceFound)??;

        debug!("Creating transport on {}", first);
        self.open(&first).await
    }

    /// Stop the live event feed
    pub fn shutdown(&self) {
        self.bus.shutdown();
    }
}
