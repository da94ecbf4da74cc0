//! Device Event Bus Integration Tests
//!
//! Tests for the snapshot + live merge, vendor filtering, de-duplication,
//! subscription cancellation and capability detection.
//!
//! Run with: `cargo test -p transport --test event_bus_tests`

use devices::{DeviceEvent, NativeError, NativeNotification, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use transport::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockHidBackend, foreign_descriptor, ledger_descriptor, with_timeout,
};
use transport::{DeviceEventBus, DeviceEventStream, HidTransport, TransportConfig};

fn config() -> TransportConfig {
    TransportConfig {
        race_window_ms: 5_000,
        ..Default::default()
    }
}

async fn next_event(stream: &mut DeviceEventStream) -> Result<DeviceEvent, TransportError> {
    with_timeout(DEFAULT_TEST_TIMEOUT, stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended")
}

// ============================================================================
// Listing Tests
// ============================================================================

#[tokio::test]
async fn test_list_filters_foreign_vendors() {
    let backend = Arc::new(
        MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1"), foreign_descriptor("1-2")]),
    );
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let devices = bus.list_current().await.unwrap();
    assert_eq!(devices, vec![ledger_descriptor("1-1")]);
}

#[tokio::test]
async fn test_list_enumeration_failure() {
    let backend = Arc::new(MockHidBackend::new());
    backend.fail_list("enumeration failed");
    let bus = DeviceEventBus::start(backend.clone(), &config());

    assert_eq!(
        bus.list_current().await,
        Err(TransportError::Enumeration(NativeError::new(
            "enumeration failed"
        )))
    );

    let mut stream = bus.events().await;
    assert!(matches!(
        next_event(&mut stream).await,
        Err(TransportError::Enumeration(_))
    ));
    assert!(stream.next().await.is_none());
}

// ============================================================================
// Capability Tests
// ============================================================================

#[tokio::test]
async fn test_capability_absent() {
    let backend = Arc::new(MockHidBackend::unavailable().with_devices(vec![ledger_descriptor("1-1")]));
    let transport = HidTransport::new(backend.clone(), &config());

    assert!(!transport.is_supported());
    assert!(transport.list().await.unwrap().is_empty());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = transport.subscribe(move |event| {
        let _ = tx.send(event);
    });
    subscription.cancel();
    subscription.cancel();

    // The inert subscription dropped its observer, closing the channel
    assert!(rx.recv().await.is_none());
    assert!(transport.events().await.next().await.is_none());
    assert!(backend.calls().is_empty());
}

// ============================================================================
// Snapshot + Live Merge Tests
// ============================================================================

#[tokio::test]
async fn test_snapshot_precedes_live_events() {
    let backend = Arc::new(
        MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1"), ledger_descriptor("1-2")]),
    );
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let mut stream = bus.events().await;
    backend.attach(ledger_descriptor("1-3"));

    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-1"))
    );
    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-2"))
    );
    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-3"))
    );

    backend.detach(&ledger_descriptor("1-1"));
    let removed = next_event(&mut stream).await.unwrap();
    assert_eq!(removed, DeviceEvent::removed(ledger_descriptor("1-1")));
    assert!(removed.model().is_some());
}

#[tokio::test]
async fn test_device_attached_during_snapshot_reported_once() {
    let backend = Arc::new(MockHidBackend::new());
    let bus = DeviceEventBus::start(backend.clone(), &config());

    // Listed by the snapshot and also still queued on the live feed
    backend.attach(ledger_descriptor("1-1"));
    let mut stream = bus.events().await;
    backend.attach(ledger_descriptor("1-2"));

    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-1"))
    );
    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-2"))
    );
}

#[tokio::test]
async fn test_unknown_removal_suppressed_within_window() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]));
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let mut stream = bus.events().await;
    assert!(next_event(&mut stream).await.unwrap().is_added());

    backend.notify(NativeNotification::Detached(ledger_descriptor("7-7")));
    backend.detach(&ledger_descriptor("1-1"));

    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::removed(ledger_descriptor("1-1"))
    );
}

#[tokio::test]
async fn test_reattach_after_removal_is_delivered() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]));
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let mut stream = bus.events().await;
    next_event(&mut stream).await.unwrap();

    backend.detach(&ledger_descriptor("1-1"));
    backend.attach(ledger_descriptor("1-1"));

    assert!(!next_event(&mut stream).await.unwrap().is_added());
    assert!(next_event(&mut stream).await.unwrap().is_added());
}

#[tokio::test]
async fn test_duplicates_pass_after_race_window() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]));
    let config = TransportConfig {
        race_window_ms: 0,
        ..Default::default()
    };
    let bus = DeviceEventBus::start(backend.clone(), &config);

    let mut stream = bus.events().await;
    next_event(&mut stream).await.unwrap();

    backend.notify(NativeNotification::Attached(ledger_descriptor("1-1")));
    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-1"))
    );
}

#[tokio::test]
async fn test_foreign_live_events_are_invisible() {
    let backend = Arc::new(MockHidBackend::new());
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let mut stream = bus.events().await;
    backend.attach(foreign_descriptor("2-1"));
    backend.detach(&foreign_descriptor("2-1"));
    backend.attach(ledger_descriptor("2-2"));

    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("2-2"))
    );
}

#[tokio::test]
async fn test_live_errors_pass_through() {
    let backend = Arc::new(MockHidBackend::new());
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let mut stream = bus.events().await;
    backend.notify(NativeNotification::Error(NativeError::new("hotplug failure")));
    backend.attach(ledger_descriptor("3-1"));

    assert_eq!(
        next_event(&mut stream).await,
        Err(TransportError::Notification(NativeError::new(
            "hotplug failure"
        )))
    );
    assert!(next_event(&mut stream).await.unwrap().is_added());
}

#[tokio::test]
async fn test_lagging_stream_reports_gap_and_resyncs() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-0")]));
    let small_buffer = TransportConfig {
        live_buffer: 2,
        ..config()
    };
    let bus = DeviceEventBus::start(backend.clone(), &small_buffer);

    let mut stream = bus.events().await;
    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-0"))
    );

    backend.detach(&ledger_descriptor("1-0"));
    for i in 1..=4 {
        backend.attach(ledger_descriptor(&format!("1-{i}")));
    }
    // Let the pump overrun this stream's buffer
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(next_event(&mut stream).await, Err(TransportError::Lagged(3)));

    let mut resynced = Vec::new();
    for _ in 0..5 {
        resynced.push(next_event(&mut stream).await.unwrap());
    }
    assert_eq!(
        resynced,
        vec![
            DeviceEvent::removed(ledger_descriptor("1-0")),
            DeviceEvent::added(ledger_descriptor("1-1")),
            DeviceEvent::added(ledger_descriptor("1-2")),
            DeviceEvent::added(ledger_descriptor("1-3")),
            DeviceEvent::added(ledger_descriptor("1-4")),
        ]
    );

    // Events still buffered from before the lag are not repeated
    backend.attach(ledger_descriptor("1-5"));
    assert_eq!(
        next_event(&mut stream).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-5"))
    );
}

#[tokio::test]
async fn test_each_stream_takes_its_own_snapshot() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]));
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let mut early = bus.events().await;
    backend.attach(ledger_descriptor("1-2"));
    let mut late = bus.events().await;

    assert_eq!(
        next_event(&mut early).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-1"))
    );
    assert_eq!(
        next_event(&mut early).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-2"))
    );

    assert_eq!(
        next_event(&mut late).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-1"))
    );
    assert_eq!(
        next_event(&mut late).await.unwrap(),
        DeviceEvent::added(ledger_descriptor("1-2"))
    );
}

#[tokio::test]
async fn test_shutdown_ends_streams() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]));
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let mut stream = bus.events().await;
    bus.shutdown();

    assert!(next_event(&mut stream).await.unwrap().is_added());
    let end = with_timeout(DEFAULT_TEST_TIMEOUT, stream.next()).await.unwrap();
    assert!(end.is_none());
}

// ============================================================================
// Subscription Tests
// ============================================================================

#[tokio::test]
async fn test_subscribe_delivers_snapshot_then_live() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]));
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = bus.subscribe(move |event| {
        let _ = tx.send(event);
    });

    let first = with_timeout(DEFAULT_TEST_TIMEOUT, rx.recv()).await.unwrap();
    assert_eq!(
        first.unwrap().unwrap(),
        DeviceEvent::added(ledger_descriptor("1-1"))
    );

    backend.attach(ledger_descriptor("1-2"));
    let second = with_timeout(DEFAULT_TEST_TIMEOUT, rx.recv()).await.unwrap();
    assert_eq!(
        second.unwrap().unwrap(),
        DeviceEvent::added(ledger_descriptor("1-2"))
    );

    subscription.cancel();
}

#[tokio::test]
async fn test_cancel_affects_only_one_subscriber() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]));
    let bus = DeviceEventBus::start(backend.clone(), &config());

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let sub_a = bus.subscribe(move |event| {
        let _ = tx_a.send(event);
    });
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let sub_b = bus.subscribe(move |event| {
        let _ = tx_b.send(event);
    });

    assert!(with_timeout(DEFAULT_TEST_TIMEOUT, rx_a.recv()).await.unwrap().is_some());
    assert!(with_timeout(DEFAULT_TEST_TIMEOUT, rx_b.recv()).await.unwrap().is_some());

    sub_a.cancel();
    assert!(sub_a.is_cancelled());
    backend.attach(ledger_descriptor("1-2"));

    let delivered = with_timeout(DEFAULT_TEST_TIMEOUT, rx_b.recv()).await.unwrap();
    assert_eq!(
        delivered.unwrap().unwrap(),
        DeviceEvent::added(ledger_descriptor("1-2"))
    );

    // The cancelled task dropped its observer without delivering anything else
    let after_cancel = with_timeout(DEFAULT_TEST_TIMEOUT, rx_a.recv()).await.unwrap();
    assert!(after_cancel.is_none());

    sub_b.cancel();
}

// ============================================================================
// Facade Tests
// ============================================================================

#[tokio::test]
async fn test_create_opens_first_device() {
    let backend = Arc::new(MockHidBackend::new().with_devices(vec![ledger_descriptor("1-1")]));
    let transport = HidTransport::new(backend.clone(), &config());

    let session = transport.create(DEFAULT_TEST_TIMEOUT).await.unwrap();
    assert_eq!(session.exchange(&[0xb0]).await.unwrap(), vec![0xb0]);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_create_waits_for_attach() {
    let backend = Arc::new(MockHidBackend::new());
    let transport = HidTransport::new(backend.clone(), &config());

    let plug = backend.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        plug.attach(ledger_descriptor("4-1"));
    });

    let session = transport.create(DEFAULT_TEST_TIMEOUT).await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_create_times_out_without_device() {
    let backend = Arc::new(MockHidBackend::new());
    let transport = HidTransport::new(backend.clone(), &config());

    let result = transport.create(Duration::from_millis(30)).await;
    assert!(matches!(result, Err(TransportError::NoDeviceFound)));
}

#[tokio::test]
async fn test_create_unsupported() {
    let backend = Arc::new(MockHidBackend::unavailable());
    let transport = HidTransport::new(backend.clone(), &config());

    let result = transport.create(DEFAULT_TEST_TIMEOUT).await;
    assert!(matches!(result, Err(TransportError::Unsupported)));
}
