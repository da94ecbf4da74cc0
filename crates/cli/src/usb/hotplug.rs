//! Hot-plug watcher thread
//!
//! Runs libusb's event loop on a dedicated thread and forwards attach/detach
//! notifications to the Tokio side. When libusb has no hot-plug support the
//! thread falls back to diffing periodic enumerations.

use super::backend::map_rusb_error;
use super::device::descriptor_of;
use devices::{DeviceDescriptor, NativeNotification};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const NOTIFICATION_CAPACITY: usize = 256;
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct HotplugWatcher {
    receiver: async_channel::Receiver<NativeNotification>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Start the watcher thread on `context`
    pub fn spawn(context: Context, poll_interval: Duration) -> std::io::Result<Self> {
        let (tx, rx) = async_channel::bounded(NOTIFICATION_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || {
                info!("USB hot-plug watcher started");
                if rusb::has_hotplug() {
                    run_hotplug(&context, &tx, &flag, poll_interval);
                } else {
                    info!("libusb has no hot-plug support, polling every {:?}", poll_interval);
                    run_polling(&context, &tx, &flag, poll_interval);
                }
                info!("USB hot-plug watcher stopped");
            })?;

        Ok(Self {
            receiver: rx,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn receiver(&self) -> async_channel::Receiver<NativeNotification> {
        self.receiver.clone()
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.receiver.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("USB hot-plug watcher panicked");
        }
    }
}

/// Forwards libusb callbacks into the notification channel
struct NotificationForwarder {
    sender: async_channel::Sender<NativeNotification>,
}

impl NotificationForwarder {
    fn forward<T: UsbContext>(&self, device: &Device<T>, attached: bool) {
        let Some(descriptor) = descriptor_of(device) else {
            debug!(
                "Ignoring hot-plug event for unreadable device (bus={}, addr={})",
                device.bus_number(),
                device.address()
            );
            return;
        };

        let notification = if attached {
            NativeNotification::Attached(descriptor)
        } else {
            NativeNotification::Detached(descriptor)
        };
        if let Err(e) = self.sender.try_send(notification) {
            warn!("Dropping hot-plug notification: {}", e);
        }
    }
}

impl<T: UsbContext> Hotplug<T> for NotificationForwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        self.forward(&device, true);
    }

    fn device_left(&mut self, device: Device<T>) {
        self.forward(&device, false);
    }
}

fn run_hotplug(
    context: &Context,
    tx: &async_channel::Sender<NativeNotification>,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) {
    let forwarder: Box<dyn Hotplug<Context>> =
        Box::new(NotificationForwarder { sender: tx.clone() });
    let _registration: Registration<Context> = match HotplugBuilder::new()
        .enumerate(false)
        .register(context, forwarder)
    {
        Ok(registration) => registration,
        Err(e) => {
            warn!("Hot-plug registration failed: {}, falling back to polling", e);
            return run_polling(context, tx, shutdown, poll_interval);
        }
    };
    debug!("Hot-plug callbacks registered");

    while !shutdown.load(Ordering::SeqCst) && !tx.is_closed() {
        match context.handle_events(Some(EVENT_TIMEOUT)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                let _ = tx.try_send(NativeNotification::Error(map_rusb_error(e)));
                std::thread::sleep(EVENT_TIMEOUT);
            }
        }
    }
}

fn snapshot(context: &Context) -> Result<HashSet<DeviceDescriptor>, rusb::Error> {
    Ok(context
        .devices()?
        .iter()
        .filter_map(|device| descriptor_of(&device))
        .collect())
}

/// Notifications turning `previous` into `current`, detaches first
pub fn diff_snapshots(
    previous: &HashSet<DeviceDescriptor>,
    current: &HashSet<DeviceDescriptor>,
) -> Vec<NativeNotification> {
    let mut gone: Vec<_> = previous.difference(current).cloned().collect();
    let mut new: Vec<_> = current.difference(previous).cloned().collect();
    gone.sort_by(|a, b| a.native_ref.cmp(&b.native_ref));
    new.sort_by(|a, b| a.native_ref.cmp(&b.native_ref));

    gone.into_iter()
        .map(NativeNotification::Detached)
        .chain(new.into_iter().map(NativeNotification::Attached))
        .collect()
}

fn run_polling(
    context: &Context,
    tx: &async_channel::Sender<NativeNotification>,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) {
    let mut known = match snapshot(context) {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Initial USB enumeration failed: {}", e);
            HashSet::new()
        }
    };

    let mut elapsed = Duration::ZERO;
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(EVENT_TIMEOUT);
        elapsed += EVENT_TIMEOUT;
        if elapsed < poll_interval {
            continue;
        }
        elapsed = Duration::ZERO;

        let notifications = match snapshot(context) {
            Ok(current) => {
                let changes = diff_snapshots(&known, &current);
                known = current;
                changes
            }
            Err(e) => vec![NativeNotification::Error(map_rusb_error(e))],
        };

        for notification in notifications {
            if tx.send_blocking(notification).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(native_ref: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(0x2c97, 0x4011, native_ref)
    }

    #[test]
    fn test_diff_reports_changes() {
        let previous: HashSet<_> = [device("1-2"), device("1-3")].into_iter().collect();
        let current: HashSet<_> = [device("1-3"), device("1-5")].into_iter().collect();

        assert_eq!(
            diff_snapshots(&previous, &current),
            vec![
                NativeNotification::Detached(device("1-2")),
                NativeNotification::Attached(device("1-5")),
            ]
        );
    }

    #[test]
    fn test_forwarder_is_a_context_callback() {
        let (tx, rx) = async_channel::bounded(1);
        let callback: Box<dyn Hotplug<Context>> = Box::new(NotificationForwarder { sender: tx });
        drop(callback);
        assert!(rx.is_closed());
    }

    #[test]
    fn test_diff_unchanged() {
        let devices: HashSet<_> = [device("1-2")].into_iter().collect();
        assert!(diff_snapshots(&devices, &devices).is_empty());
    }
}
