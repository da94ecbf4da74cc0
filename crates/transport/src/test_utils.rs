//! Test utilities for ledger-hid
//!
//! Provides an in-memory [`HidBackend`] and helpers shared by unit and
//! integration tests.
//!
//! # Example
//!
//! ```
//! use transport::test_utils::{MockHidBackend, ledger_descriptor};
//!
//! # fn main() {
//! let backend = MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]);
//! assert!(backend.calls().is_empty());
//! # }
//! ```

use crate::backend::HidBackend;
use async_trait::async_trait;
use devices::{
    DeviceDescriptor, LEDGER_USB_VENDOR_ID, NativeError, NativeHandle, NativeNotification,
};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Product id of a Nano X with HID enabled
pub const NANO_X_PRODUCT_ID: u16 = 0x4011;

/// Descriptor for a Ledger Nano X at `native_ref`
pub fn ledger_descriptor(native_ref: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(LEDGER_USB_VENDOR_ID, NANO_X_PRODUCT_ID, native_ref)
}

/// Descriptor for a non-Ledger device at `native_ref`
pub fn foreign_descriptor(native_ref: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(0x046d, 0xc52b, native_ref)
}

/// Run a future with a timeout
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Call recorded by [`MockHidBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    List,
    Open(DeviceDescriptor),
    ExchangeStart {
        handle: NativeHandle,
        request: Vec<u8>,
    },
    ExchangeEnd {
        handle: NativeHandle,
    },
    Close(NativeHandle),
}

/// In-memory backend
///
/// Exchanges echo the request unless a result was queued with
/// [`MockHidBackend::push_exchange_result`]. A gated backend holds every
/// exchange until the test calls [`MockHidBackend::release_exchanges`].
pub struct MockHidBackend {
    available: bool,
    devices: Mutex<Vec<DeviceDescriptor>>,
    list_error: Mutex<Option<NativeError>>,
    open_error: Mutex<Option<NativeError>>,
    close_error: Mutex<Option<NativeError>>,
    exchange_results: Mutex<VecDeque<Result<Vec<u8>, NativeError>>>,
    exchange_gate: Option<Semaphore>,
    open_handles: Mutex<HashSet<NativeHandle>>,
    calls: Mutex<Vec<MockCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    exchanges_started: watch::Sender<usize>,
    next_handle: AtomicU64,
    notify_tx: async_channel::Sender<NativeNotification>,
    notify_rx: async_channel::Receiver<NativeNotification>,
}

impl Default for MockHidBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockHidBackend {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = async_channel::unbounded();
        let (exchanges_started, _) = watch::channel(0);
        Self {
            available: true,
            devices: Mutex::new(Vec::new()),
            list_error: Mutex::new(None),
            open_error: Mutex::new(None),
            close_error: Mutex::new(None),
            exchange_results: Mutex::new(VecDeque::new()),
            exchange_gate: None,
            open_handles: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            exchanges_started,
            next_handle: AtomicU64::new(1),
            notify_tx,
            notify_rx,
        }
    }

    /// Backend reporting the native capability as absent
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn with_devices(self, devices: Vec<DeviceDescriptor>) -> Self {
        *lock(&self.devices) = devices;
        self
    }

    /// Hold exchanges until released
    pub fn gated(mut self) -> Self {
        self.exchange_gate = Some(Semaphore::new(0));
        self
    }

    /// Let `n` held exchanges complete
    pub fn release_exchanges(&self, n: usize) {
        if let Some(gate) = &self.exchange_gate {
            gate.add_permits(n);
        }
    }

    /// Wait until at least `n` exchanges have reached the native layer
    pub async fn wait_for_exchanges_started(&self, n: usize) {
        let mut rx = self.exchanges_started.subscribe();
        let _ = rx.wait_for(|started| *started >= n).await;
    }

    pub fn push_exchange_result(&self, result: Result<Vec<u8>, NativeError>) {
        lock(&self.exchange_results).push_back(result);
    }

    pub fn fail_list(&self, message: &str) {
        *lock(&self.list_error) = Some(NativeError::new(message));
    }

    pub fn fail_open(&self, message: &str) {
        *lock(&self.open_error) = Some(NativeError::new(message));
    }

    pub fn fail_close(&self, message: &str) {
        *lock(&self.close_error) = Some(NativeError::new(message));
    }

    /// Plug a device in: it shows up in listings and on the hot-plug feed
    pub fn attach(&self, descriptor: DeviceDescriptor) {
        lock(&self.devices).push(descriptor.clone());
        self.notify(NativeNotification::Attached(descriptor));
    }

    /// Unplug a device
    pub fn detach(&self, descriptor: &DeviceDescriptor) {
        lock(&self.devices).retain(|d| d != descriptor);
        self.notify(NativeNotification::Detached(descriptor.clone()));
    }

    /// Push a raw notification without touching the device list
    pub fn notify(&self, notification: NativeNotification) {
        let _ = self.notify_tx.try_send(notification);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Requests in the order they reached the native layer
    pub fn exchange_requests(&self) -> Vec<Vec<u8>> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                MockCall::ExchangeStart { request, .. } => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of exchanges observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn closed_handles(&self) -> Vec<NativeHandle> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                MockCall::Close(handle) => Some(*handle),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl HidBackend for MockHidBackend {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, NativeError> {
        self.record(MockCall::List);
        if let Some(e) = lock(&self.list_error).clone() {
            return Err(e);
        }
        Ok(lock(&self.devices).clone())
    }

    async fn open_device(&self, descriptor: &DeviceDescriptor) -> Result<NativeHandle, NativeError> {
        self.record(MockCall::Open(descriptor.clone()));
        if let Some(e) = lock(&self.open_error).clone() {
            return Err(e);
        }
        if !lock(&self.devices).contains(descriptor) {
            return Err(NativeError::new("device not found"));
        }

        let handle = NativeHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        lock(&self.open_handles).insert(handle);
        Ok(handle)
    }

    async fn exchange_raw(
        &self,
        handle: NativeHandle,
        request: &[u8],
    ) -> Result<Vec<u8>, NativeError> {
        self.record(MockCall::ExchangeStart {
            handle,
            request: request.to_vec(),
        });
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.exchanges_started.send_modify(|n| *n += 1);

        if let Some(gate) = &self.exchange_gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(NativeError::new("exchange gate closed")),
            }
        }

        let result = if lock(&self.open_handles).contains(&handle) {
            lock(&self.exchange_results)
                .pop_front()
                .unwrap_or_else(|| Ok(request.to_vec()))
        } else {
            Err(NativeError::new("invalid handle"))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(MockCall::ExchangeEnd { handle });
        result
    }

    async fn close_device(&self, handle: NativeHandle) -> Result<(), NativeError> {
        self.record(MockCall::Close(handle));
        lock(&self.open_handles).remove(&handle);
        if let Some(e) = lock(&self.close_error).clone() {
            return Err(e);
        }
        Ok(())
    }

    fn notifications(&self) -> Option<async_channel::Receiver<NativeNotification>> {
        Some(self.notify_rx.clone())
    }
}
