//! Retry decorator for the ingestion transport.
//!
//! Recoverable failures are retried on an exponential schedule with equal
//! jitter (half fixed, half random) before surfacing to the channel.
//! Closing the decorator aborts scheduled retries without invoking their
//! callbacks, so the at-most-once completion contract holds.

use crate::ingestion::{Batch, Ingestion, TransmissionCallback};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Retry schedule. The default mirrors the ingestion backend's guidance:
/// three attempts at roughly 10 seconds, 5 minutes and 20 minutes.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    intervals: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            intervals: vec![
                Duration::from_secs(10),
                Duration::from_secs(5 * 60),
                Duration::from_secs(20 * 60),
            ],
        }
    }
}

impl RetryPolicy {
    /// Custom schedule; one retry per interval.
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self { intervals }
    }

    /// A policy that never retries (failures surface immediately).
    pub fn none() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    pub fn max_retries(&self) -> usize {
        self.intervals.len()
    }

    /// Delay before retry number `attempt` (0-based): half the scheduled
    /// interval fixed, half random.
    pub fn delay(&self, attempt: usize) -> Duration {
        let Some(&interval) = self
            .intervals
            .get(attempt)
            .or_else(|| self.intervals.last())
        else {
            return Duration::ZERO;
        };
        let half = interval.as_secs_f64() / 2.0;
        Duration::from_secs_f64(half + rand::thread_rng().gen::<f64>() * half)
    }
}

/// Decorator adding the retry schedule to an inner transport.
pub struct RetryIngestion {
    state: Arc<RetryState>,
}

struct RetryState {
    inner: Arc<dyn Ingestion>,
    policy: RetryPolicy,
    runtime: Handle,
    closed: AtomicBool,
    scheduled: Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl RetryIngestion {
    pub fn new(inner: Arc<dyn Ingestion>, policy: RetryPolicy, runtime: Handle) -> Self {
        Self {
            state: Arc::new(RetryState {
                inner,
                policy,
                runtime,
                closed: AtomicBool::new(false),
                scheduled: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl RetryState {
    fn attempt(this: Arc<Self>, batch: Batch, attempt: usize, done: TransmissionCallback) {
        let state = this.clone();
        let inner = this.inner.clone();
        inner.send(
            batch.clone(),
            Box::new(move |result| match result {
                Err(err)
                    if err.is_recoverable()
                        && attempt < state.policy.max_retries()
                        && !state.closed.load(Ordering::SeqCst) =>
                {
                    let delay = state.policy.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "batch send failed, retrying"
                    );
                    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
                    let scheduled = state.clone();
                    let handle = state.runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        scheduled.scheduled.lock().remove(&id);
                        if scheduled.closed.load(Ordering::SeqCst) {
                            debug!("retry abandoned, transport closed");
                            return;
                        }
                        RetryState::attempt(scheduled.clone(), batch, attempt + 1, done);
                    });
                    state.scheduled.lock().insert(id, handle);
                }
                other => done(other),
            }),
        );
    }
}

impl Ingestion for RetryIngestion {
    fn send(&self, batch: Batch, done: TransmissionCallback) {
        RetryState::attempt(self.state.clone(), batch, 0, done);
    }

    fn set_server_url(&self, url: String) {
        self.state.inner.set_server_url(url);
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        for (_, handle) in self.state.scheduled.lock().drain() {
            handle.abort();
        }
        self.state.inner.close();
    }

    fn reopen(&self) {
        self.state.closed.store(false, Ordering::SeqCst);
        self.state.inner.reopen();
    }
}
