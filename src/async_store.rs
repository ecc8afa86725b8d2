//! Asynchronous facade over the log store.
//!
//! All store operations execute sequentially on one dedicated worker
//! thread; callers pass a completion callback and never block on disk.
//! Callbacks observe FIFO order relative to submission. The facade also
//! exposes the drain barrier `wait_for_idle` used by channel shutdown.

use crate::error::ChannelError;
use crate::log::LogRecord;
use crate::store::SqliteStore;
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type Job = Box<dyn FnOnce(&mut SqliteStore) + Send + 'static>;

struct Barrier {
    pending: Mutex<usize>,
    drained: Condvar,
}

pub struct AsyncStore {
    tx: mpsc::Sender<Job>,
    barrier: Arc<Barrier>,
}

impl AsyncStore {
    /// Move `store` onto a dedicated worker thread and return the facade.
    pub fn spawn(mut store: SqliteStore) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let barrier = Arc::new(Barrier {
            pending: Mutex::new(0),
            drained: Condvar::new(),
        });
        let worker_barrier = barrier.clone();
        std::thread::Builder::new()
            .name("logship-store".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job(&mut store);
                    let mut pending = worker_barrier.pending.lock();
                    *pending -= 1;
                    if *pending == 0 {
                        worker_barrier.drained.notify_all();
                    }
                }
                debug!("store worker exiting");
            })
            .expect("failed to spawn store worker thread");
        Self { tx, barrier }
    }

    fn submit<T, Op, Done>(&self, op: Op, done: Done)
    where
        T: Send + 'static,
        Op: FnOnce(&mut SqliteStore) -> Result<T, ChannelError> + Send + 'static,
        Done: FnOnce(Result<T, ChannelError>) + Send + 'static,
    {
        *self.barrier.pending.lock() += 1;
        let sent = self.tx.send(Box::new(move |store| done(op(store))));
        if sent.is_err() {
            // Worker already gone; settle the barrier so waiters make
            // progress.
            let mut pending = self.barrier.pending.lock();
            *pending -= 1;
            if *pending == 0 {
                self.barrier.drained.notify_all();
            }
        }
    }

    pub fn put<F>(&self, group: String, log: LogRecord, done: F)
    where
        F: FnOnce(Result<(), ChannelError>) + Send + 'static,
    {
        self.submit(move |store| store.put(&group, &log), done);
    }

    pub fn count<F>(&self, group: String, done: F)
    where
        F: FnOnce(Result<usize, ChannelError>) + Send + 'static,
    {
        self.submit(move |store| store.count(&group), done);
    }

    /// Claim up to `limit` records; the callback receives the batch id and
    /// the claimed logs, or `None` when the group has nothing pending.
    pub fn get_logs<F>(&self, group: String, limit: usize, done: F)
    where
        F: FnOnce(Result<Option<(String, Vec<LogRecord>)>, ChannelError>) + Send + 'static,
    {
        self.submit(
            move |store| {
                let mut logs = Vec::new();
                let batch = store.get_logs(&group, limit, &mut logs)?;
                Ok(batch.map(|batch_id| (batch_id, logs)))
            },
            done,
        );
    }

    pub fn delete_batch<F>(&self, group: String, batch_id: String, done: F)
    where
        F: FnOnce(Result<(), ChannelError>) + Send + 'static,
    {
        self.submit(move |store| store.delete_batch(&group, &batch_id), done);
    }

    pub fn delete_all<F>(&self, group: String, done: F)
    where
        F: FnOnce(Result<(), ChannelError>) + Send + 'static,
    {
        self.submit(move |store| store.delete_all(&group), done);
    }

    pub fn clear_pending_state<F>(&self, done: F)
    where
        F: FnOnce(Result<(), ChannelError>) + Send + 'static,
    {
        self.submit(|store| store.clear_pending_state(), done);
    }

    /// Block until every submitted task has completed or `timeout`
    /// elapses. Returns `true` if the queue drained in time.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.barrier.pending.lock();
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.barrier.drained.wait_for(&mut pending, deadline - now);
        }
        true
    }
}
