//! Open device session
//!
//! A [`TransportSession`] exclusively owns one native handle. It guarantees:
//!
//! - at most one native exchange in flight, with concurrent callers served in
//!   arrival order,
//! - an accepted exchange runs to completion even if its caller goes away,
//! - `close()` never releases the handle under an in-flight exchange, and no
//!   exchange starts once `close()` has been accepted,
//! - a native error recognized as a disconnect signal becomes
//!   [`TransportError::DisconnectedDuringOperation`] and is announced on the
//!   session's disconnect channel.
//!
//! Serialization uses a fair `tokio::sync::Mutex` as the exchange gate. The
//! gate guard is moved into the task that performs the native call, so the
//! next queued caller is admitted only once that call has returned.

use crate::backend::HidBackend;
use crate::disconnect::DisconnectSignals;
use devices::{DeviceDescriptor, InvalidState, NativeError, NativeHandle, TransportError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedMutexGuard, broadcast};
use tracing::{debug, error, info, warn};

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Busy,
    /// close() accepted, waiting for the in-flight exchange or the native close
    Closing,
    Closed,
}

/// Sent on the session's disconnect channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectNotice {
    pub handle: NativeHandle,
    /// Native error message that was recognized
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
struct Lifecycle {
    busy: bool,
    phase: Phase,
}

struct SessionInner {
    backend: Arc<dyn HidBackend>,
    handle: NativeHandle,
    signals: DisconnectSignals,
    lifecycle: Mutex<Lifecycle>,
    disconnect_tx: broadcast::Sender<DisconnectNotice>,
}

impl SessionInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_open(&self) -> Result<(), TransportError> {
        match self.lifecycle().phase {
            Phase::Open => Ok(()),
            Phase::Closing => Err(TransportError::InvalidState(InvalidState::Closing)),
            Phase::Closed => Err(TransportError::InvalidState(InvalidState::Closed)),
        }
    }

    /// Idle -> Busy; caller must hold the exchange gate
    fn begin_exchange(&self) -> Result<(), TransportError> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.phase {
            Phase::Open => {
                lifecycle.busy = true;
                Ok(())
            }
            Phase::Closing => Err(TransportError::InvalidState(InvalidState::Closing)),
            Phase::Closed => Err(TransportError::InvalidState(InvalidState::Closed)),
        }
    }

    fn end_exchange(&self) {
        self.lifecycle().busy = false;
    }

    fn classify(&self, error: NativeError) -> TransportError {
        if self.signals.matches(&error.message) {
            warn!(
                "Device disconnected during exchange on {}: {}",
                self.handle, error.message
            );
            // No listeners is not an error
            let _ = self.disconnect_tx.send(DisconnectNotice {
                handle: self.handle,
                message: error.message.clone(),
            });
            TransportError::DisconnectedDuringOperation(error.message)
        } else {
            debug!("Exchange on {} failed: {}", self.handle, error.message);
            TransportError::Exchange(error)
        }
    }
}

/// Holds the exchange gate for one native exchange
///
/// Clears the busy flag before the gate is released, including on panic.
struct InFlight {
    inner: Arc<SessionInner>,
    _gate: OwnedMutexGuard<()>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.end_exchange();
    }
}

/// One open device
pub struct TransportSession {
    inner: Arc<SessionInner>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl TransportSession {
    /// Open `descriptor` through the backend
    ///
    /// Native open failures are returned unchanged as [`TransportError::Open`].
    pub async fn open(
        backend: Arc<dyn HidBackend>,
        descriptor: &DeviceDescriptor,
        signals: DisconnectSignals,
    ) -> Result<Self, TransportError> {
        let handle = backend
            .open_device(descriptor)
            .await
            .map_err(TransportError::Open)?;

        info!("Opened {} as session {}", descriptor, handle);

        let (disconnect_tx, _) = broadcast::channel(16);
        Ok(Self {
            inner: Arc::new(SessionInner {
                backend,
                handle,
                signals,
                lifecycle: Mutex::new(Lifecycle {
                    busy: false,
                    phase: Phase::Open,
                }),
                disconnect_tx,
            }),
            gate: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Native handle owned by this session
    pub fn id(&self) -> NativeHandle {
        self.inner.handle
    }

    pub fn state(&self) -> SessionState {
        let lifecycle = self.inner.lifecycle();
        match lifecycle.phase {
            Phase::Closed => SessionState::Closed,
            Phase::Closing => SessionState::Closing,
            Phase::Open if lifecycle.busy => SessionState::Busy,
            Phase::Open => SessionState::Idle,
        }
    }

    /// Receiver for disconnect notices
    ///
    /// Only notices sent after this call are received.
    pub fn on_disconnect(&self) -> broadcast::Receiver<DisconnectNotice> {
        self.inner.disconnect_tx.subscribe()
    }

    /// Send `request` and wait for the device's response
    ///
    /// Waits behind any exchange already running or queued. Fails with
    /// [`InvalidState`] once close() has been accepted.
    pub async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.inner.check_open()?;

        let gate = self.gate.clone().lock_owned().await;
        // close() may have been accepted while this call was queued
        self.inner.begin_exchange()?;
        let in_flight = InFlight {
            inner: self.inner.clone(),
            _gate: gate,
        };

        let inner = self.inner.clone();
        let request = request.to_vec();
        debug!("Exchange on {}: {} bytes", inner.handle, request.len());

        let task = tokio::spawn(async move {
            let result = inner.backend.exchange_raw(inner.handle, &request).await;
            let result = result.map_err(|e| inner.classify(e));
            drop(in_flight);
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Exchange task on {} failed: {}", self.inner.handle, e);
                Err(TransportError::Exchange(NativeError::new(format!(
                    "exchange task failed: {}",
                    e
                ))))
            }
        }
    }

    /// Release the native handle
    ///
    /// Waits for the in-flight exchange to finish. Exchanges still queued are
    /// rejected. The session ends `Closed` even when the native close fails.
    /// Calling close() again fails with [`InvalidState`].
    pub async fn close(&self) -> Result<(), TransportError> {
        {
            let mut lifecycle = self.inner.lifecycle();
            match lifecycle.phase {
                Phase::Open => lifecycle.phase = Phase::Closing,
                Phase::Closing => {
                    return Err(TransportError::InvalidState(InvalidState::Closing));
                }
                Phase::Closed => return Err(TransportError::InvalidState(InvalidState::Closed)),
            }
        }

        let inner = self.inner.clone();
        let gate = self.gate.clone();
        let task = tokio::spawn(async move {
            let _gate = gate.lock_owned().await;
            let result = inner
                .backend
                .close_device(inner.handle)
                .await
                .map_err(TransportError::Close);
            inner.lifecycle().phase = Phase::Closed;
            result
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                self.inner.lifecycle().phase = Phase::Closed;
                Err(TransportError::Close(NativeError::new(format!(
                    "close task failed: {}",
                    e
                ))))
            }
        };

        match &result {
            Ok(()) => info!("Closed session {}", self.inner.handle),
            Err(e) => warn!("Closing session {} failed: {}", self.inner.handle, e),
        }
        result
    }

    /// Accepted for interface compatibility; HID sessions have no scramble key
    pub fn set_scramble_key(&self, _key: &str) {}
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if self.inner.lifecycle().phase == Phase::Open {
            warn!("Session {} dropped without close()", self.inner.handle);
        }
    }
}
