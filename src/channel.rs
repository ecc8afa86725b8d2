//! The ingestion channel core.
//!
//! The channel owns every registered group, decides when persisted logs
//! become batches, and runs the enabled / suspended state machine. All
//! state lives behind one channel-wide mutex; disk and network work
//! happens on the store worker and on spawned tokio tasks whose
//! completions re-acquire the lock.

use crate::async_store::AsyncStore;
use crate::device::{DeviceInfoProvider, DeviceSnapshot, HostDeviceInfo};
use crate::error::ChannelError;
use crate::ingestion::{Batch, HttpIngestion, Ingestion};
use crate::log::{now_ms, ChannelListener, GroupListener, LogContainer, LogRecord};
use crate::network::{NetworkGate, NetworkMonitor};
use crate::prefs::{MemoryPreferences, Preferences, KEY_ENABLED, KEY_INSTALL_ID};
use crate::retry::{RetryIngestion, RetryPolicy};
use crate::store::SqliteStore;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rows drained per store round-trip while discarding a group.
const CLEAR_BATCH_SIZE: usize = 100;

/// How long `shutdown` waits for the store worker to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable batching policy fixed at group registration.
#[derive(Clone, Debug)]
struct GroupConfig {
    max_logs_per_batch: usize,
    batch_time_interval: Duration,
    max_parallel_batches: usize,
}

/// Mutable per-group state, owned by the channel.
struct GroupState {
    config: GroupConfig,
    listener: Option<Arc<dyn GroupListener>>,
    /// Logs persisted but not claimed by any in-flight batch.
    pending: usize,
    /// Batches handed to the transport and not yet resolved.
    in_flight: HashMap<String, Vec<LogRecord>>,
    /// Batch reads requested from the store but not yet answered. Counts
    /// toward the parallelism bound so queued reads cannot overshoot it.
    requested: usize,
    paused: bool,
    timer_armed: bool,
    timer: Option<tokio::task::JoinHandle<()>>,
}

impl GroupState {
    fn new(config: GroupConfig, listener: Option<Arc<dyn GroupListener>>) -> Self {
        Self {
            config,
            listener,
            pending: 0,
            in_flight: HashMap::new(),
            requested: 0,
            paused: false,
            timer_armed: false,
            timer: None,
        }
    }
}

struct ChannelState {
    enabled: bool,
    /// When set, new logs are rejected and reported as cancelled.
    discard: bool,
    /// Bumped on every suspension; batch reads issued before the bump
    /// are stale and their callbacks must not register batches.
    generation: u64,
    device: Option<Arc<DeviceSnapshot>>,
    groups: HashMap<String, GroupState>,
    listeners: Vec<Arc<dyn ChannelListener>>,
}

struct ChannelInner {
    state: Mutex<ChannelState>,
    store: AsyncStore,
    ingestion: Arc<dyn Ingestion>,
    prefs: Arc<dyn Preferences>,
    device_info: Arc<dyn DeviceInfoProvider>,
    app_secret: String,
    install_id: Uuid,
    runtime: Handle,
}

/// Handle to the ingestion channel. Cloneable and shareable across
/// threads; all clones observe the same state.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Start configuring a channel for the given app secret.
    pub fn builder(app_secret: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder::new(app_secret.into())
    }

    /// Register (or re-register) a group with its batching policy.
    ///
    /// The store is asked for the group's persisted backlog; once the
    /// count arrives, batching decisions resume from it. Re-registering
    /// overwrites the previous policy and listener.
    pub fn add_group(
        &self,
        name: &str,
        max_logs_per_batch: usize,
        batch_time_interval: Duration,
        max_parallel_batches: usize,
        listener: Option<Arc<dyn GroupListener>>,
    ) {
        let mut st = self.inner.state.lock();
        if let Some(old) = st.groups.get_mut(name) {
            Self::cancel_timer(old);
            debug!(group = name, "re-registering group");
        }
        let config = GroupConfig {
            max_logs_per_batch: max_logs_per_batch.max(1),
            batch_time_interval,
            max_parallel_batches: max_parallel_batches.max(1),
        };
        st.groups
            .insert(name.to_string(), GroupState::new(config, listener));
        for l in &st.listeners {
            l.on_group_added(name);
        }

        let this = self.clone();
        let group = name.to_string();
        self.inner.store.count(group.clone(), move |res| {
            let mut st = this.inner.state.lock();
            match res {
                Ok(count) => {
                    let enabled = st.enabled;
                    if let Some(g) = st.groups.get_mut(&group) {
                        g.pending = count;
                        debug!(group = %group, pending = count, "group registered");
                        if enabled {
                            this.check_pending_locked(&mut st, &group);
                        }
                    }
                }
                Err(e) => error!(group = %group, error = %e, "failed to count pending logs"),
            }
        });
    }

    /// Drop a group. Its timer is cancelled; in-flight batches are
    /// abandoned and their eventual transport callbacks are ignored.
    pub fn remove_group(&self, name: &str) {
        let mut st = self.inner.state.lock();
        if let Some(mut g) = st.groups.remove(name) {
            Self::cancel_timer(&mut g);
            debug!(
                group = name,
                abandoned = g.in_flight.len(),
                "group removed"
            );
            for l in &st.listeners {
                l.on_group_removed(name);
            }
        }
    }

    /// Accept one log for `group`.
    ///
    /// Fire-and-forget: persistence failures are logged, never surfaced
    /// to the producer. In discard mode the group listener sees the log
    /// rejected as cancelled.
    pub fn enqueue(&self, mut log: LogRecord, group: &str) {
        let mut st = self.inner.state.lock();
        let Some(g) = st.groups.get(group) else {
            warn!(group, "enqueue to unknown group");
            return;
        };
        let listener = g.listener.clone();

        if st.discard {
            debug!(group, "channel in discard mode, rejecting log");
            if let Some(listener) = listener {
                listener.on_before_sending(&log);
                listener.on_failure(&log, &ChannelError::Cancelled);
            }
            return;
        }

        for l in &st.listeners {
            l.on_enqueuing_log(&mut log, group);
        }
        if st.listeners.iter().any(|l| l.should_filter(&log)) {
            debug!(group, kind = %log.kind, "log filtered before persistence");
            return;
        }

        if log.device.is_none() {
            if st.device.is_none() {
                match self.inner.device_info.device_info() {
                    Ok(snapshot) => st.device = Some(Arc::new(snapshot)),
                    Err(e) => {
                        warn!(error = %e, "failed to build device snapshot, dropping log");
                        return;
                    }
                }
            }
            log.device = st.device.clone();
        }
        if log.timestamp == 0 {
            log.timestamp = now_ms();
        }
        if log.install_id.is_none() {
            log.install_id = Some(self.inner.install_id);
        }

        let this = self.clone();
        let group = group.to_string();
        self.inner.store.put(group.clone(), log, move |res| {
            let mut st = this.inner.state.lock();
            match res {
                Ok(()) => {
                    let enabled = st.enabled;
                    if let Some(g) = st.groups.get_mut(&group) {
                        g.pending += 1;
                        if enabled {
                            this.check_pending_locked(&mut st, &group);
                        } else {
                            debug!(group = %group, "channel disabled, log persisted for later");
                        }
                    }
                }
                Err(e) => error!(group = %group, error = %e, "failed to persist log"),
            }
        });
    }

    /// Delete all persisted rows for `group`. In-flight batches are not
    /// affected.
    pub fn clear(&self, group: &str) {
        let this = self.clone();
        let group = group.to_string();
        self.inner.store.delete_all(group.clone(), move |res| match res {
            Ok(()) => {
                let mut st = this.inner.state.lock();
                if let Some(g) = st.groups.get_mut(&group) {
                    g.pending = 0;
                }
            }
            Err(e) => error!(group = %group, error = %e, "failed to clear group"),
        });
    }

    /// Stop triggering ingestion for `group` while still accepting and
    /// persisting its logs.
    pub fn pause_group(&self, name: &str) {
        let mut st = self.inner.state.lock();
        if let Some(g) = st.groups.get_mut(name) {
            if !g.paused {
                g.paused = true;
                Self::cancel_timer(g);
                debug!(group = name, "group paused");
            }
        }
    }

    /// Undo [`pause_group`](Channel::pause_group) and re-evaluate the
    /// group's backlog.
    pub fn resume_group(&self, name: &str) {
        let mut st = self.inner.state.lock();
        let resumed = match st.groups.get_mut(name) {
            Some(g) if g.paused => {
                g.paused = false;
                debug!(group = name, "group resumed");
                true
            }
            _ => false,
        };
        if resumed && st.enabled {
            self.check_pending_locked(&mut st, name);
        }
    }

    /// Enable or disable the channel. Write-through: the preference is
    /// updated first and is the single source of truth for
    /// [`is_enabled`](Channel::is_enabled).
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.prefs.put_bool(KEY_ENABLED, enabled);
        let mut st = self.inner.state.lock();
        if enabled {
            if st.enabled {
                return;
            }
            st.enabled = true;
            st.discard = false;
            self.inner.ingestion.reopen();
            info!("channel enabled");
            let names: Vec<String> = st.groups.keys().cloned().collect();
            for name in &names {
                self.check_pending_locked(&mut st, name);
            }
        } else {
            if !st.enabled {
                return;
            }
            info!("channel disabled");
            self.suspend_locked(&mut st, false, &ChannelError::Cancelled);
        }
    }

    /// Whether the channel is enabled, per the persisted preference.
    pub fn is_enabled(&self) -> bool {
        self.inner.prefs.get_bool(KEY_ENABLED, true)
    }

    /// Override the ingestion endpoint for subsequent sends.
    pub fn set_server_url(&self, url: impl Into<String>) {
        self.inner.ingestion.set_server_url(url.into());
    }

    /// Drop the cached device snapshot; the next enqueue rebuilds it.
    pub fn invalidate_device_cache(&self) {
        self.inner.state.lock().device = None;
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.inner.state.lock().listeners.push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) {
        self.inner
            .state
            .lock()
            .listeners
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// The per-install identifier attached to outgoing batches.
    pub fn install_id(&self) -> Uuid {
        self.inner.install_id
    }

    /// Suspend ingestion (retaining persisted logs) and wait up to five
    /// seconds for the store worker to drain. Rows still on disk are
    /// picked up by the next process.
    pub fn shutdown(&self) {
        {
            let mut st = self.inner.state.lock();
            self.suspend_locked(&mut st, false, &ChannelError::Cancelled);
        }
        if !self.inner.store.wait_for_idle(SHUTDOWN_TIMEOUT) {
            warn!("store did not drain before shutdown timeout");
        }
    }

    // ---- internal scheduling -------------------------------------------

    /// Decide what the group's backlog warrants: an immediate trigger at
    /// or over the batch size, an armed timer for a partial batch,
    /// nothing otherwise.
    fn check_pending_locked(&self, st: &mut ChannelState, name: &str) {
        enum Next {
            Trigger,
            Arm(Duration),
            Nothing,
        }
        let next = {
            let Some(g) = st.groups.get_mut(name) else {
                return;
            };
            if g.paused {
                Next::Nothing
            } else if g.pending >= g.config.max_logs_per_batch {
                Self::cancel_timer(g);
                Next::Trigger
            } else if g.pending > 0 && !g.timer_armed {
                Next::Arm(g.config.batch_time_interval)
            } else {
                Next::Nothing
            }
        };
        match next {
            Next::Trigger => self.trigger_ingestion_locked(st, name),
            Next::Arm(interval) => self.arm_timer_locked(st, name, interval),
            Next::Nothing => {}
        }
    }

    /// Ask the store for a batch unless disabled, paused, or already at
    /// the group's parallelism bound.
    fn trigger_ingestion_locked(&self, st: &mut ChannelState, name: &str) {
        if !st.enabled {
            return;
        }
        let limit = {
            let Some(g) = st.groups.get_mut(name) else {
                return;
            };
            if g.paused {
                return;
            }
            Self::cancel_timer(g);
            if g.in_flight.len() + g.requested >= g.config.max_parallel_batches {
                debug!(group = name, "max parallel batches in flight");
                return;
            }
            g.requested += 1;
            g.config.max_logs_per_batch
        };
        let generation = st.generation;
        let this = self.clone();
        let group = name.to_string();
        self.inner
            .store
            .get_logs(group.clone(), limit, move |res| {
                this.on_batch_ready(group, generation, res)
            });
    }

    fn on_batch_ready(
        &self,
        group: String,
        generation: u64,
        res: Result<Option<(String, Vec<LogRecord>)>, ChannelError>,
    ) {
        let mut st = self.inner.state.lock();
        if generation != st.generation {
            debug!(group = %group, "batch read from a previous generation, ignoring");
            return;
        }
        let enabled = st.enabled;
        let Some(g) = st.groups.get_mut(&group) else {
            debug!(group = %group, "batch ready for removed group, ignoring");
            return;
        };
        g.requested = g.requested.saturating_sub(1);
        if !enabled {
            return;
        }
        match res {
            Err(e) => error!(group = %group, error = %e, "failed to read batch from store"),
            Ok(None) => {}
            Ok(Some((batch_id, logs))) => {
                let body = match serde_json::to_vec(&LogContainer { logs: &logs }) {
                    Ok(body) => Bytes::from(body),
                    Err(e) => {
                        error!(group = %group, error = %e, "failed to serialize batch, dropping");
                        g.pending = g.pending.saturating_sub(logs.len());
                        self.inner.store.delete_batch(
                            group.clone(),
                            batch_id,
                            log_store_error("delete unserializable batch"),
                        );
                        return;
                    }
                };
                if let Some(listener) = g.listener.clone() {
                    for log in &logs {
                        listener.on_before_sending(log);
                    }
                }
                g.pending = g.pending.saturating_sub(logs.len());
                debug!(group = %group, batch_id = %batch_id, size = logs.len(), "sending batch");
                g.in_flight.insert(batch_id.clone(), logs);

                let batch = Batch {
                    app_secret: self.inner.app_secret.clone(),
                    install_id: self.inner.install_id,
                    body,
                };
                let this = self.clone();
                let cb_group = group.clone();
                self.inner.ingestion.send(
                    batch,
                    Box::new(move |result| this.on_batch_resolved(cb_group, batch_id, result)),
                );

                // A further batch may already be warranted.
                self.check_pending_locked(&mut st, &group);
            }
        }
    }

    fn on_batch_resolved(&self, group: String, batch_id: String, result: Result<(), ChannelError>) {
        let mut st = self.inner.state.lock();
        match result {
            Ok(()) => self.handle_success_locked(&mut st, &group, &batch_id),
            Err(err) => self.handle_failure_locked(&mut st, &group, &batch_id, err),
        }
    }

    fn handle_success_locked(&self, st: &mut ChannelState, group: &str, batch_id: &str) {
        let (logs, listener) = {
            let Some(g) = st.groups.get_mut(group) else {
                debug!(group, "success for removed group, ignoring");
                return;
            };
            let Some(logs) = g.in_flight.remove(batch_id) else {
                return;
            };
            (logs, g.listener.clone())
        };
        debug!(group, batch_id, size = logs.len(), "batch delivered");
        self.inner.store.delete_batch(
            group.to_string(),
            batch_id.to_string(),
            log_store_error("delete delivered batch"),
        );
        if let Some(listener) = listener {
            for log in &logs {
                listener.on_success(log);
            }
        }
        self.check_pending_locked(st, group);
    }

    fn handle_failure_locked(
        &self,
        st: &mut ChannelState,
        group: &str,
        batch_id: &str,
        err: ChannelError,
    ) {
        let (logs, listener) = {
            let Some(g) = st.groups.get_mut(group) else {
                debug!(group, "failure for removed group, ignoring");
                return;
            };
            let Some(logs) = g.in_flight.remove(batch_id) else {
                return;
            };
            (logs, g.listener.clone())
        };
        if err.is_recoverable() {
            warn!(group, error = %err, "batch send failed, suspending channel");
            if let Some(g) = st.groups.get_mut(group) {
                g.pending += logs.len();
            }
            self.suspend_locked(st, false, &err);
        } else {
            error!(group, error = %err, "batch rejected, discarding logs");
            if let Some(listener) = listener {
                for log in &logs {
                    listener.on_failure(log, &err);
                }
            }
            self.suspend_locked(st, true, &err);
        }
    }

    /// Tear ingestion down. With `delete_logs` the channel enters discard
    /// mode and every group's rows are drained through the failure
    /// listener; without it, batch claims are released so the logs are
    /// re-sent after resume.
    fn suspend_locked(&self, st: &mut ChannelState, delete_logs: bool, err: &ChannelError) {
        // Already suspended at least as hard: discard mode absorbs
        // everything, retain mode absorbs another retain.
        if !st.enabled && (st.discard || !delete_logs) {
            return;
        }
        st.enabled = false;
        st.discard = delete_logs;
        st.generation += 1;

        for g in st.groups.values_mut() {
            Self::cancel_timer(g);
            g.requested = 0;
            let evicted: Vec<Vec<LogRecord>> = g.in_flight.drain().map(|(_, logs)| logs).collect();
            let listener = g.listener.clone();
            for logs in evicted {
                if delete_logs {
                    if let Some(listener) = &listener {
                        for log in &logs {
                            listener.on_failure(log, err);
                        }
                    }
                } else {
                    g.pending += logs.len();
                }
            }
        }

        self.inner.ingestion.close();

        if delete_logs {
            let names: Vec<String> = st.groups.keys().cloned().collect();
            for g in st.groups.values_mut() {
                g.pending = 0;
            }
            for name in names {
                self.drain_group(name);
            }
        } else {
            self.inner
                .store
                .clear_pending_state(log_store_error("release batch claims"));
        }
    }

    /// Discard-mode drain: page rows out of the store in chunks, running
    /// the failure listener for each, then delete whatever remains.
    fn drain_group(&self, group: String) {
        let this = self.clone();
        self.inner
            .store
            .get_logs(group.clone(), CLEAR_BATCH_SIZE, move |res| match res {
                Ok(Some((_, logs))) => {
                    let full_chunk = logs.len() >= CLEAR_BATCH_SIZE;
                    {
                        let st = this.inner.state.lock();
                        let listener = st.groups.get(&group).and_then(|g| g.listener.clone());
                        if let Some(listener) = listener {
                            for log in &logs {
                                listener.on_before_sending(log);
                                listener.on_failure(log, &ChannelError::Cancelled);
                            }
                        }
                    }
                    if full_chunk {
                        this.drain_group(group);
                    } else {
                        this.inner
                            .store
                            .delete_all(group, log_store_error("delete discarded group"));
                    }
                }
                Ok(None) => this
                    .inner
                    .store
                    .delete_all(group, log_store_error("delete discarded group")),
                Err(e) => error!(group = %group, error = %e, "failed to drain group"),
            });
    }

    fn arm_timer_locked(&self, st: &mut ChannelState, name: &str, interval: Duration) {
        let this = self.clone();
        let group = name.to_string();
        let handle = self.inner.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            this.timer_fired(&group);
        });
        if let Some(g) = st.groups.get_mut(name) {
            g.timer_armed = true;
            g.timer = Some(handle);
        }
    }

    fn timer_fired(&self, name: &str) {
        let mut st = self.inner.state.lock();
        let fired = match st.groups.get_mut(name) {
            // A cancelled timer may still wake; the armed flag decides.
            Some(g) if g.timer_armed => {
                g.timer_armed = false;
                g.timer = None;
                true
            }
            _ => false,
        };
        if fired {
            self.trigger_ingestion_locked(&mut st, name);
        }
    }

    fn cancel_timer(g: &mut GroupState) {
        g.timer_armed = false;
        if let Some(handle) = g.timer.take() {
            handle.abort();
        }
    }
}

fn log_store_error(op: &'static str) -> impl FnOnce(Result<(), ChannelError>) + Send + 'static {
    move |res| {
        if let Err(e) = res {
            error!(op, error = %e, "store operation failed");
        }
    }
}

/// Builder for [`Channel`].
#[must_use = "builders do nothing unless you call .build()"]
pub struct ChannelBuilder {
    app_secret: String,
    store_path: Option<PathBuf>,
    max_records: Option<usize>,
    prefs: Option<Arc<dyn Preferences>>,
    device_info: Option<Arc<dyn DeviceInfoProvider>>,
    network: Option<Arc<NetworkMonitor>>,
    retry_policy: RetryPolicy,
    server_url: Option<String>,
    ingestion: Option<Arc<dyn Ingestion>>,
    runtime: Option<Handle>,
}

impl ChannelBuilder {
    fn new(app_secret: String) -> Self {
        Self {
            app_secret,
            store_path: None,
            max_records: None,
            prefs: None,
            device_info: None,
            network: None,
            retry_policy: RetryPolicy::default(),
            server_url: None,
            ingestion: None,
            runtime: None,
        }
    }

    /// Persist logs at `path`. Defaults to an in-memory store, which
    /// does not survive restarts.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Bound the store; oldest rows are evicted past the bound.
    pub fn max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    pub fn preferences(mut self, prefs: Arc<dyn Preferences>) -> Self {
        self.prefs = Some(prefs);
        self
    }

    pub fn device_info(mut self, provider: Arc<dyn DeviceInfoProvider>) -> Self {
        self.device_info = Some(provider);
        self
    }

    /// Connectivity source gating the transport.
    pub fn network_monitor(mut self, monitor: Arc<NetworkMonitor>) -> Self {
        self.network = Some(monitor);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Replace the whole transport stack; used by tests and hosts with
    /// their own wire protocol.
    pub fn ingestion(mut self, ingestion: Arc<dyn Ingestion>) -> Self {
        self.ingestion = Some(ingestion);
        self
    }

    /// Runtime for timers and transport tasks. Defaults to the ambient
    /// tokio runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Open the store, spawn the worker, release stale batch claims from
    /// a previous process, and assemble the transport stack.
    ///
    /// # Panics
    ///
    /// Panics if no runtime handle was provided and the caller is not
    /// inside a tokio runtime.
    pub fn build(self) -> Result<Channel, ChannelError> {
        let runtime = self.runtime.unwrap_or_else(Handle::current);

        let mut store = match &self.store_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_in_memory()?,
        };
        store.set_max_records(self.max_records);
        let store = AsyncStore::spawn(store);
        // Rows claimed by a prior process become eligible again.
        store.clear_pending_state(log_store_error("release stale batch claims"));

        let prefs = self
            .prefs
            .unwrap_or_else(|| Arc::new(MemoryPreferences::new()));
        let install_id = prefs
            .get_string(KEY_INSTALL_ID)
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_else(|| {
                let id = Uuid::new_v4();
                prefs.put_string(KEY_INSTALL_ID, &id.to_string());
                id
            });

        let ingestion: Arc<dyn Ingestion> = match self.ingestion {
            Some(ingestion) => ingestion,
            None => {
                let http = Arc::new(HttpIngestion::new(runtime.clone()));
                let retry = Arc::new(RetryIngestion::new(
                    http,
                    self.retry_policy,
                    runtime.clone(),
                ));
                let monitor = self
                    .network
                    .unwrap_or_else(|| Arc::new(NetworkMonitor::new(true)));
                Arc::new(NetworkGate::new(retry, monitor))
            }
        };
        if let Some(url) = self.server_url {
            ingestion.set_server_url(url);
        }

        let enabled = prefs.get_bool(KEY_ENABLED, true);
        Ok(Channel {
            inner: Arc::new(ChannelInner {
                state: Mutex::new(ChannelState {
                    enabled,
                    discard: false,
                    generation: 0,
                    device: None,
                    groups: HashMap::new(),
                    listeners: Vec::new(),
                }),
                store,
                ingestion,
                prefs,
                device_info: self
                    .device_info
                    .unwrap_or_else(|| Arc::new(HostDeviceInfo::default())),
                app_secret: self.app_secret,
                install_id,
                runtime,
            }),
        })
    }
}
