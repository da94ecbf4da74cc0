//! Attach/detach event bus
//!
//! Merges a point-in-time enumeration with the live hot-plug feed into one
//! ordered sequence per subscriber.
//!
//! The live feed is a single broadcast channel fed by one pump task that reads
//! the backend's raw notifications, drops foreign vendors and attaches the
//! device model. Every subscriber owns its own broadcast receiver, so a slow or
//! cancelled subscriber never affects the others.
//!
//! # Snapshot/live merge
//!
//! A subscriber attaches its live receiver *before* taking its snapshot, so a
//! device plugged in between the two is never missed. It may then be seen
//! twice; each stream remembers which descriptors it has reported present and,
//! during the configured race window after the snapshot, drops a live `Added`
//! for a descriptor it already reported and a live `Removed` for one it never
//! reported. After the window, live events pass through unchanged.
//!
//! A stream that falls more than `live_buffer` events behind yields
//! [`TransportError::Lagged`], re-enumerates, and queues the attach/detach
//! events that bring its view back in line with the devices now present.

use crate::backend::HidBackend;
use crate::config::TransportConfig;
use devices::{DeviceDescriptor, DeviceEvent, NativeError, NativeNotification, TransportError};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Item carried by the live feed
type LiveEvent = Result<DeviceEvent, NativeError>;

/// Process-wide device event bus
///
/// Cheap to clone; clones share the same live feed.
#[derive(Clone)]
pub struct DeviceEventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    backend: Arc<dyn HidBackend>,
    vendor_id: u16,
    race_window: Duration,
    /// `None` once [`DeviceEventBus::shutdown`] has run
    live_tx: Mutex<Option<broadcast::Sender<LiveEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceEventBus {
    /// Create the bus and start forwarding the backend's hot-plug feed
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(backend: Arc<dyn HidBackend>, config: &TransportConfig) -> Self {
        let (live_tx, _) = broadcast::channel(config.live_buffer.max(1));

        let pump = if backend.is_available() {
            match backend.notifications() {
                Some(rx) => Some(tokio::spawn(pump_notifications(
                    rx,
                    live_tx.clone(),
                    config.vendor_id,
                ))),
                None => {
                    debug!("Backend has no hot-plug source, live feed stays empty");
                    None
                }
            }
        } else {
            debug!("HID capability unavailable, event bus is inert");
            None
        };

        Self {
            inner: Arc::new(BusInner {
                backend,
                vendor_id: config.vendor_id,
                race_window: config.race_window(),
                live_tx: Mutex::new(Some(live_tx)),
                pump: Mutex::new(pump),
            }),
        }
    }

    /// Whether the backend capability exists
    pub fn is_available(&self) -> bool {
        self.inner.backend.is_available()
    }

    /// Vendor-filtered list of currently attached devices
    ///
    /// Returns an empty list when the capability is unavailable.
    pub async fn list_current(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        if !self.is_available() {
            return Ok(Vec::new());
        }

        let devices = self
            .inner
            .backend
            .list_devices()
            .await
            .map_err(TransportError::Enumeration)?;

        let vendor_id = self.inner.vendor_id;
        let matching: Vec<_> = devices
            .into_iter()
            .filter(|d| d.vendor_id == vendor_id)
            .collect();

        debug!("Listed {} matching devices", matching.len());
        Ok(matching)
    }

    /// Pull-style event sequence: snapshot `Added` events, then live events
    pub async fn events(&self) -> DeviceEventStream {
        if !self.is_available() {
            return DeviceEventStream::inert();
        }
        let live = self.attach_live();
        self.snapshot_stream(live).await
    }

    /// Push-style subscription delivering [`DeviceEventBus::events`] to `observer`
    ///
    /// The live receiver is attached before this returns; the snapshot is
    /// taken by the delivery task.
    pub fn subscribe<F>(&self, mut observer: F) -> Subscription
    where
        F: FnMut(Result<DeviceEvent, TransportError>) + Send + 'static,
    {
        if !self.is_available() {
            return Subscription::inert();
        }

        let live = self.attach_live();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let bus = self.clone();

        let task = tokio::spawn(async move {
            let mut stream = bus.snapshot_stream(live).await;
            while let Some(item) = stream.next().await {
                if flag.load(Ordering::Acquire) {
                    break;
                }
                observer(item);
            }
            trace!("Subscription delivery ended");
        });

        Subscription {
            cancelled,
            task: Some(task),
        }
    }

    /// Stop the live feed
    ///
    /// Intended for tests and orderly process exit. Existing streams end after
    /// draining what they already buffered.
    pub fn shutdown(&self) {
        if let Some(pump) = self
            .inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        self.inner
            .live_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("Device event bus shut down");
    }

    fn attach_live(&self) -> Option<broadcast::Receiver<LiveEvent>> {
        self.inner
            .live_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    async fn snapshot_stream(
        &self,
        live: Option<broadcast::Receiver<LiveEvent>>,
    ) -> DeviceEventStream {
        match self.list_current().await {
            Ok(devices) => {
                let mut known = HashSet::with_capacity(devices.len());
                let pending = devices
                    .into_iter()
                    .map(|d| {
                        known.insert(d.clone());
                        Ok(DeviceEvent::added(d))
                    })
                    .collect();

                DeviceEventStream {
                    pending,
                    live,
                    known,
                    dedup_until: Instant::now() + self.inner.race_window,
                    bus: Some(self.clone()),
                }
            }
            Err(e) => {
                warn!("Initial device snapshot failed: {}", e);
                DeviceEventStream {
                    pending: VecDeque::from([Err(e)]),
                    live: None,
                    known: HashSet::new(),
                    dedup_until: Instant::now(),
                    bus: None,
                }
            }
        }
    }
}

async fn pump_notifications(
    rx: async_channel::Receiver<NativeNotification>,
    tx: broadcast::Sender<LiveEvent>,
    vendor_id: u16,
) {
    while let Ok(notification) = rx.recv().await {
        let event = match notification {
            NativeNotification::Attached(d) if d.vendor_id == vendor_id => {
                Ok(DeviceEvent::added(d))
            }
            NativeNotification::Detached(d) if d.vendor_id == vendor_id => {
                Ok(DeviceEvent::removed(d))
            }
            NativeNotification::Error(e) => Err(e),
            other => {
                trace!("Ignoring foreign device notification: {:?}", other);
                continue;
            }
        };

        if let Ok(ref e) = event {
            debug!(
                "Live event: {} {}",
                if e.is_added() { "add" } else { "remove" },
                e.descriptor()
            );
        }

        // No receivers is normal when nobody is subscribed
        let _ = tx.send(event);
    }

    debug!("Native notification source closed");
}

/// One subscriber's view of the event bus
pub struct DeviceEventStream {
    pending: VecDeque<Result<DeviceEvent, TransportError>>,
    live: Option<broadcast::Receiver<LiveEvent>>,
    /// Descriptors this stream has reported as present
    known: HashSet<DeviceDescriptor>,
    dedup_until: Instant,
    /// Source for re-enumeration after a lag
    bus: Option<DeviceEventBus>,
}

impl DeviceEventStream {
    /// A stream that yields nothing
    pub fn inert() -> Self {
        Self {
            pending: VecDeque::new(),
            live: None,
            known: HashSet::new(),
            dedup_until: Instant::now(),
            bus: None,
        }
    }

    /// Next event, or `None` once the stream has ended
    ///
    /// A snapshot failure is yielded once and ends the stream. Live feed
    /// errors are passed through and the stream continues. Missed live events
    /// are reported as [`TransportError::Lagged`], followed by the events of a
    /// fresh enumeration.
    pub async fn next(&mut self) -> Option<Result<DeviceEvent, TransportError>> {
        if let Some(item) = self.pending.pop_front() {
            return Some(item);
        }

        loop {
            let live = self.live.as_mut()?;
            match live.recv().await {
                Ok(Ok(event)) => {
                    if let Some(event) = self.admit(event) {
                        return Some(Ok(event));
                    }
                }
                Ok(Err(e)) => return Some(Err(TransportError::Notification(e))),
                Err(RecvError::Lagged(n)) => {
                    warn!("Subscriber lagged, missed {} device events", n);
                    self.resync().await;
                    return Some(Err(TransportError::Lagged(n)));
                }
                Err(RecvError::Closed) => {
                    self.live = None;
                    return None;
                }
            }
        }
    }

    /// Re-enumerate and queue the difference to what this stream reported
    async fn resync(&mut self) {
        let Some(bus) = self.bus.clone() else {
            return;
        };

        let current: HashSet<_> = match bus.list_current().await {
            Ok(devices) => devices.into_iter().collect(),
            Err(e) => {
                warn!("Re-enumeration after lag failed: {}", e);
                self.pending.push_back(Err(e));
                return;
            }
        };

        let mut gone: Vec<_> = self.known.difference(&current).cloned().collect();
        let mut new: Vec<_> = current.difference(&self.known).cloned().collect();
        gone.sort_by(|a, b| a.native_ref.cmp(&b.native_ref));
        new.sort_by(|a, b| a.native_ref.cmp(&b.native_ref));
        debug!(
            "Resynced after lag: {} removed, {} added",
            gone.len(),
            new.len()
        );

        self.pending
            .extend(gone.into_iter().map(|d| Ok(DeviceEvent::removed(d))));
        self.pending
            .extend(new.into_iter().map(|d| Ok(DeviceEvent::added(d))));
        self.known = current;
        // Buffered live events predating the enumeration are duplicates now
        self.dedup_until = Instant::now() + bus.inner.race_window;
    }

    fn admit(&mut self, event: DeviceEvent) -> Option<DeviceEvent> {
        let in_window = Instant::now() < self.dedup_until;

        let duplicate = match &event {
            DeviceEvent::Added { descriptor, .. } => !self.known.insert(descriptor.clone()),
            DeviceEvent::Removed { descriptor, .. } => !self.known.remove(descriptor),
        };

        if duplicate && in_window {
            debug!("Suppressed duplicate live event for {}", event.descriptor());
            return None;
        }
        Some(event)
    }
}

/// Handle to a push-style subscription
///
/// Dropping the handle does not cancel delivery; call [`Subscription::cancel`].
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A subscription that never delivers anything
    pub fn inert() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Stop delivery to this subscriber
    ///
    /// Takes effect before the next delivery. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True once the delivery task has ended (or was never started)
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}
