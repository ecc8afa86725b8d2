//! Network-state gating for the ingestion transport.
//!
//! The host feeds connectivity transitions into a [`NetworkMonitor`];
//! the [`NetworkGate`] decorator defers sends while offline and replays
//! them in submission order once connectivity returns. A disconnect fails
//! calls that are already in flight with a recoverable error; the inner
//! transport's late completion is then swallowed so every call still
//! resolves at most once.

use crate::error::ChannelError;
use crate::ingestion::{Batch, Ingestion, TransmissionCallback};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Shared connectivity flag with change listeners.
///
/// Defaults are host-driven: construct with the current state and call
/// [`set_connected`](NetworkMonitor::set_connected) from the platform's
/// connectivity callback.
pub struct NetworkMonitor {
    connected: AtomicBool,
    listeners: Mutex<Vec<Box<dyn Fn(bool) + Send + Sync>>>,
}

impl NetworkMonitor {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Record a connectivity transition and notify listeners when the
    /// state actually changed.
    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous == connected {
            return;
        }
        debug!(connected, "network state changed");
        for listener in self.listeners.lock().iter() {
            listener(connected);
        }
    }

    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }
}

/// Per-call completion slot: taken exactly once, by whichever of the
/// inner completion and the disconnect path gets there first.
type CallSlot = Arc<Mutex<Option<TransmissionCallback>>>;

struct GateState {
    deferred: VecDeque<(Batch, TransmissionCallback)>,
    in_flight: HashMap<u64, CallSlot>,
}

struct GateShared {
    inner: Arc<dyn Ingestion>,
    state: Mutex<GateState>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

/// Decorator holding sends back while the device is offline.
pub struct NetworkGate {
    shared: Arc<GateShared>,
    monitor: Arc<NetworkMonitor>,
}

impl NetworkGate {
    pub fn new(inner: Arc<dyn Ingestion>, monitor: Arc<NetworkMonitor>) -> Self {
        let shared = Arc::new(GateShared {
            inner,
            state: Mutex::new(GateState {
                deferred: VecDeque::new(),
                in_flight: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        });
        let weak: Weak<GateShared> = Arc::downgrade(&shared);
        monitor.subscribe(move |connected| {
            if let Some(shared) = weak.upgrade() {
                GateShared::on_connectivity(&shared, connected);
            }
        });
        Self { shared, monitor }
    }
}

impl GateShared {
    fn on_connectivity(this: &Arc<Self>, connected: bool) {
        if connected {
            // Replay deferred calls in submission order, outside the lock.
            let resumed: Vec<(Batch, TransmissionCallback)> =
                this.state.lock().deferred.drain(..).collect();
            if !resumed.is_empty() {
                debug!(count = resumed.len(), "network restored, resuming sends");
            }
            for (batch, done) in resumed {
                Self::forward(this, batch, done);
            }
        } else {
            // Fail whatever is in flight; late inner completions find
            // their slot already empty.
            let slots: Vec<CallSlot> = {
                let mut state = this.state.lock();
                state.in_flight.drain().map(|(_, slot)| slot).collect()
            };
            for slot in slots {
                if let Some(done) = slot.lock().take() {
                    done(Err(ChannelError::Recoverable {
                        status: None,
                        message: "network disconnected".into(),
                    }));
                }
            }
        }
    }

    fn forward(this: &Arc<Self>, batch: Batch, done: TransmissionCallback) {
        let id = this.next_id.fetch_add(1, Ordering::SeqCst);
        let slot: CallSlot = Arc::new(Mutex::new(Some(done)));
        this.state.lock().in_flight.insert(id, slot.clone());

        let shared = this.clone();
        this.inner.send(
            batch,
            Box::new(move |result| {
                shared.state.lock().in_flight.remove(&id);
                if let Some(done) = slot.lock().take() {
                    done(result);
                }
            }),
        );
    }
}

impl Ingestion for NetworkGate {
    fn send(&self, batch: Batch, done: TransmissionCallback) {
        if self.shared.closed.load(Ordering::SeqCst) {
            debug!("send dropped, gate closed");
            return;
        }
        if !self.monitor.is_connected() {
            debug!("offline, deferring send");
            self.shared.state.lock().deferred.push_back((batch, done));
            return;
        }
        GateShared::forward(&self.shared, batch, done);
    }

    fn set_server_url(&self, url: String) {
        self.shared.inner.set_server_url(url);
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let dropped = {
            let mut state = self.shared.state.lock();
            state.deferred.drain(..).count()
        };
        if dropped > 0 {
            debug!(count = dropped, "dropped deferred sends on close");
        }
        self.shared.inner.close();
    }

    fn reopen(&self) {
        self.shared.closed.store(false, Ordering::SeqCst);
        self.shared.inner.reopen();
    }
}
