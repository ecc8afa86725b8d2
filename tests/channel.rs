//! End-to-end channel scenarios against a mock transport and an
//! in-memory (or temp-file) store.

use logship::{
    Batch, Channel, ChannelError, ChannelListener, GroupListener, Ingestion, LogRecord,
    TransmissionCallback,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Mode {
    /// Resolve every send with success (off-thread).
    Succeed,
    /// Resolve every send with the given HTTP status (off-thread).
    FailStatus(u16),
    /// Keep callbacks until the test resolves them.
    Hold,
}

/// Transport double. Completion callbacks are never invoked on the
/// caller's stack: auto modes resolve from a spawned thread, hold mode
/// resolves from the test thread. `resolved` counts callbacks that have
/// fully returned, i.e. the channel has finished reacting.
struct MockIngestion {
    mode: Mutex<Mode>,
    /// Log names per sent batch, in send order.
    batches: Mutex<Vec<Vec<String>>>,
    /// Raw decoded request bodies, for wire-shape assertions.
    bodies: Mutex<Vec<serde_json::Value>>,
    held: Mutex<Vec<TransmissionCallback>>,
    in_flight: Arc<AtomicUsize>,
    in_flight_peak: Arc<AtomicUsize>,
    resolved: Arc<AtomicUsize>,
}

impl MockIngestion {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            batches: Mutex::new(Vec::new()),
            bodies: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            in_flight_peak: Arc::new(AtomicUsize::new(0)),
            resolved: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    fn sent(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }

    fn sent_count(&self) -> usize {
        self.batches.lock().len()
    }

    fn resolved_count(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }

    fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn peak_in_flight(&self) -> usize {
        self.in_flight_peak.load(Ordering::SeqCst)
    }

    /// Resolve the oldest held callback from the test thread.
    fn resolve_next(&self, result: Result<(), ChannelError>) {
        let done = {
            let mut held = self.held.lock();
            assert!(!held.is_empty(), "no held transmission to resolve");
            held.remove(0)
        };
        done(result);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.resolved.fetch_add(1, Ordering::SeqCst);
    }

    fn decode(value: &serde_json::Value) -> Vec<String> {
        value["logs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|log| log["name"].as_str().unwrap_or("?").to_string())
            .collect()
    }
}

impl Ingestion for MockIngestion {
    fn send(&self, batch: Batch, done: TransmissionCallback) {
        let value: serde_json::Value = serde_json::from_slice(&batch.body).unwrap();
        self.batches.lock().push(Self::decode(&value));
        self.bodies.lock().push(value);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight_peak.fetch_max(current, Ordering::SeqCst);

        let mode = *self.mode.lock();
        match mode {
            Mode::Hold => self.held.lock().push(done),
            Mode::Succeed | Mode::FailStatus(_) => {
                let in_flight = self.in_flight.clone();
                let resolved = self.resolved.clone();
                std::thread::spawn(move || {
                    let result = match mode {
                        Mode::Succeed => Ok(()),
                        Mode::FailStatus(status) => {
                            Err(ChannelError::from_status(status, "mock response").unwrap_err())
                        }
                        Mode::Hold => unreachable!(),
                    };
                    done(result);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    resolved.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
    }

    fn set_server_url(&self, _url: String) {}
    fn close(&self) {}
    fn reopen(&self) {}
}

/// Group listener recording every callback with the log's `name`.
#[derive(Default)]
struct RecordingListener {
    before: Mutex<Vec<String>>,
    success: Mutex<Vec<String>>,
    failure: Mutex<Vec<(String, String)>>,
}

fn log_name(log: &LogRecord) -> String {
    log.payload["name"]
        .as_str()
        .unwrap_or(&log.kind)
        .to_string()
}

impl GroupListener for RecordingListener {
    fn on_before_sending(&self, log: &LogRecord) {
        self.before.lock().push(log_name(log));
    }

    fn on_success(&self, log: &LogRecord) {
        self.success.lock().push(log_name(log));
    }

    fn on_failure(&self, log: &LogRecord, error: &ChannelError) {
        let kind = match error {
            ChannelError::Cancelled => "cancelled",
            ChannelError::Recoverable { .. } => "recoverable",
            ChannelError::Fatal { .. } => "fatal",
            _ => "other",
        };
        self.failure.lock().push((log_name(log), kind.to_string()));
    }
}

fn record(name: &str) -> LogRecord {
    LogRecord::new("event").with_payload(json!({ "name": name }))
}

fn channel_with(mock: &Arc<MockIngestion>) -> Channel {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    Channel::builder("test-secret")
        .ingestion(mock.clone())
        .build()
        .unwrap()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test(flavor = "multi_thread")]
async fn size_triggered_flush_sends_one_full_batch() {
    let mock = MockIngestion::new(Mode::Succeed);
    let listener = Arc::new(RecordingListener::default());
    let channel = channel_with(&mock);
    channel.add_group("g", 2, Duration::from_secs(60), 1, Some(listener.clone()));

    channel.enqueue(record("L1"), "g");
    channel.enqueue(record("L2"), "g");

    wait_for(|| listener.success.lock().len() == 2).await;
    assert_eq!(mock.sent(), vec![vec!["L1", "L2"]]);
    assert_eq!(*listener.before.lock(), ["L1", "L2"]);
    assert_eq!(*listener.success.lock(), ["L1", "L2"]);
    assert!(listener.failure.lock().is_empty());

    // Both rows were deleted: the next flush carries only the new log.
    channel.enqueue(record("L3"), "g");
    channel.enqueue(record("L4"), "g");
    wait_for(|| listener.success.lock().len() == 4).await;
    assert_eq!(mock.sent()[1], vec!["L3", "L4"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn time_triggered_flush_sends_partial_batch() {
    let mock = MockIngestion::new(Mode::Succeed);
    let channel = channel_with(&mock);
    channel.add_group("g", 10, Duration::from_millis(100), 1, None);

    channel.enqueue(record("L1"), "g");
    wait_for(|| mock.sent_count() == 1).await;
    assert_eq!(mock.sent(), vec![vec!["L1"]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn recoverable_failure_retains_logs_until_reenable() {
    let mock = MockIngestion::new(Mode::FailStatus(503));
    let listener = Arc::new(RecordingListener::default());
    let channel = channel_with(&mock);
    channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

    channel.enqueue(record("L1"), "g");
    wait_for(|| mock.resolved_count() == 1).await;

    // Suspended-retain: nothing lost, no failure surfaced to the module.
    assert!(listener.failure.lock().is_empty());
    assert_eq!(mock.sent_count(), 1);

    mock.set_mode(Mode::Succeed);
    channel.set_enabled(true);
    wait_for(|| listener.success.lock().len() == 1).await;
    assert_eq!(mock.sent(), vec![vec!["L1"], vec!["L1"]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_failure_discards_and_rejects_new_logs() {
    let mock = MockIngestion::new(Mode::FailStatus(400));
    let listener = Arc::new(RecordingListener::default());
    let channel = channel_with(&mock);
    channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

    channel.enqueue(record("L1"), "g");
    wait_for(|| mock.resolved_count() == 1).await;
    assert_eq!(
        *listener.failure.lock(),
        [("L1".to_string(), "fatal".to_string())]
    );

    // Discard mode: the new log is reported cancelled, never persisted.
    channel.enqueue(record("L2"), "g");
    wait_for(|| listener.failure.lock().len() == 2).await;
    assert_eq!(
        listener.failure.lock()[1],
        ("L2".to_string(), "cancelled".to_string())
    );
    assert_eq!(*listener.before.lock(), ["L1", "L2"]);
    assert_eq!(mock.sent_count(), 1);

    // Re-enabling clears discard mode; the store was drained, so only
    // the fresh log goes out.
    mock.set_mode(Mode::Succeed);
    channel.set_enabled(true);
    channel.enqueue(record("L3"), "g");
    wait_for(|| listener.success.lock().len() == 1).await;
    assert_eq!(mock.sent()[1], vec!["L3"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_batches_respect_the_group_bound() {
    let mock = MockIngestion::new(Mode::Hold);
    let channel = channel_with(&mock);
    channel.add_group("g", 1, Duration::from_secs(60), 3, None);

    for name in ["L1", "L2", "L3", "L4", "L5"] {
        channel.enqueue(record(name), "g");
    }

    wait_for(|| mock.held_count() == 3).await;
    // Give the channel a chance to (incorrectly) exceed the bound.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(mock.held_count(), 3);
    assert_eq!(mock.sent_count(), 3);

    // Each resolution frees a slot for the next batch.
    mock.resolve_next(Ok(()));
    wait_for(|| mock.sent_count() == 4).await;
    mock.resolve_next(Ok(()));
    wait_for(|| mock.sent_count() == 5).await;
    while mock.held_count() > 0 {
        mock.resolve_next(Ok(()));
    }

    assert!(mock.peak_in_flight() <= 3);
    let flattened: Vec<String> = mock.sent().into_iter().flatten().collect();
    assert_eq!(flattened, ["L1", "L2", "L3", "L4", "L5"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_preserves_unflushed_logs_for_the_next_process() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("logs.db");

    let mock = MockIngestion::new(Mode::Succeed);
    let channel = Channel::builder("test-secret")
        .ingestion(mock.clone())
        .store_path(&db)
        .build()
        .unwrap();
    channel.add_group("g", 10, Duration::from_secs(60), 1, None);
    channel.enqueue(record("L1"), "g");
    channel.shutdown();
    assert_eq!(mock.sent_count(), 0);
    drop(channel);

    // "Next process": same store, flush-on-registration policy.
    let mock2 = MockIngestion::new(Mode::Succeed);
    let listener = Arc::new(RecordingListener::default());
    let channel2 = Channel::builder("test-secret")
        .ingestion(mock2.clone())
        .store_path(&db)
        .build()
        .unwrap();
    channel2.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));
    wait_for(|| listener.success.lock().len() == 1).await;
    assert_eq!(mock2.sent(), vec![vec!["L1"]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_recoverable_status_suspends_and_retains() {
    for status in [408u16, 429, 500, 502, 503, 504] {
        let mock = MockIngestion::new(Mode::FailStatus(status));
        let listener = Arc::new(RecordingListener::default());
        let channel = channel_with(&mock);
        channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

        channel.enqueue(record("L1"), "g");
        wait_for(|| mock.resolved_count() == 1).await;
        assert!(
            listener.failure.lock().is_empty(),
            "status {status} must not surface a failure"
        );

        mock.set_mode(Mode::Succeed);
        channel.set_enabled(true);
        wait_for(|| listener.success.lock().len() == 1).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn every_fatal_status_discards() {
    for status in [400u16, 401, 403, 404, 413] {
        let mock = MockIngestion::new(Mode::FailStatus(status));
        let listener = Arc::new(RecordingListener::default());
        let channel = channel_with(&mock);
        channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

        channel.enqueue(record("L1"), "g");
        wait_for(|| !listener.failure.lock().is_empty()).await;
        assert_eq!(
            listener.failure.lock()[0],
            ("L1".to_string(), "fatal".to_string()),
            "status {status} must discard"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn paused_group_accrues_logs_and_flushes_on_resume() {
    let mock = MockIngestion::new(Mode::Succeed);
    let channel = channel_with(&mock);
    channel.add_group("g", 2, Duration::from_millis(50), 1, None);
    channel.pause_group("g");

    channel.enqueue(record("L1"), "g");
    channel.enqueue(record("L2"), "g");
    channel.enqueue(record("L3"), "g");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.sent_count(), 0, "paused group must not flush");

    channel.resume_group("g");
    wait_for(|| {
        let names: usize = mock.sent().iter().map(|b| b.len()).sum();
        names == 3
    })
    .await;
    let flattened: Vec<String> = mock.sent().into_iter().flatten().collect();
    assert_eq!(flattened, ["L1", "L2", "L3"]);
}

/// Global listener that stamps every log and filters a marked kind.
struct StampingListener;

impl ChannelListener for StampingListener {
    fn on_enqueuing_log(&self, log: &mut LogRecord, _group: &str) {
        log.payload["stamped"] = json!(true);
    }

    fn should_filter(&self, log: &LogRecord) -> bool {
        log.kind == "debug"
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn global_listeners_decorate_and_filter() {
    let mock = MockIngestion::new(Mode::Succeed);
    let channel = channel_with(&mock);
    channel.add_listener(Arc::new(StampingListener));
    channel.add_group("g", 1, Duration::from_secs(60), 1, None);

    channel.enqueue(record("L1"), "g");
    channel.enqueue(LogRecord::new("debug").with_payload(json!({"name": "noise"})), "g");

    wait_for(|| mock.sent_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.sent_count(), 1, "filtered log must not be sent");
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_to_unknown_group_is_ignored() {
    let mock = MockIngestion::new(Mode::Succeed);
    let channel = channel_with(&mock);
    channel.enqueue(record("L1"), "nope");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.sent_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn removed_group_ignores_late_transport_callbacks() {
    let mock = MockIngestion::new(Mode::Hold);
    let listener = Arc::new(RecordingListener::default());
    let channel = channel_with(&mock);
    channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

    channel.enqueue(record("L1"), "g");
    wait_for(|| mock.held_count() == 1).await;

    channel.remove_group("g");
    mock.resolve_next(Ok(()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(listener.success.lock().is_empty());
    assert!(listener.failure.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn disable_is_idempotent_and_reflected_by_is_enabled() {
    let mock = MockIngestion::new(Mode::Succeed);
    let channel = channel_with(&mock);
    channel.add_group("g", 1, Duration::from_secs(60), 1, None);
    assert!(channel.is_enabled());

    channel.set_enabled(false);
    channel.set_enabled(false);
    assert!(!channel.is_enabled());

    // Logs enqueued while disabled are persisted, not sent.
    channel.enqueue(record("L1"), "g");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(mock.sent_count(), 0);

    channel.set_enabled(true);
    channel.set_enabled(true);
    assert!(channel.is_enabled());
    wait_for(|| mock.sent_count() == 1).await;
    assert_eq!(mock.sent(), vec![vec!["L1"]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_discards_persisted_rows_without_callbacks() {
    let mock = MockIngestion::new(Mode::Succeed);
    let listener = Arc::new(RecordingListener::default());
    let channel = channel_with(&mock);
    channel.add_group("g", 10, Duration::from_secs(60), 1, Some(listener.clone()));

    channel.enqueue(record("L1"), "g");
    channel.enqueue(record("L2"), "g");
    channel.clear("g");

    // Nothing left to flush once the clear lands.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.sent_count(), 0);
    assert!(listener.failure.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn device_snapshot_is_attached_and_rebuilt_on_invalidation() {
    let mock = MockIngestion::new(Mode::Hold);
    let channel = channel_with(&mock);
    channel.add_group("g", 1, Duration::from_secs(60), 2, None);

    channel.enqueue(record("L1"), "g");
    channel.invalidate_device_cache();
    channel.enqueue(record("L2"), "g");
    wait_for(|| mock.held_count() == 2).await;

    // Enrichment rides along on the wire for both logs.
    for body in mock.bodies.lock().iter() {
        let log = &body["logs"][0];
        assert!(log["timestamp"].as_i64().unwrap() > 0);
        assert!(log.get("install_id").is_some());
        assert!(log["device"].get("sdkName").is_some());
    }
    while mock.held_count() > 0 {
        mock.resolve_next(Ok(()));
    }
}
