//! Ingestion transport: the seam between the channel and the wire.
//!
//! The channel initiates sends while holding its lock, so implementations
//! must never invoke the completion callback on the caller's stack; the
//! HTTP transport hands the work to a spawned task and completes from
//! there.

use crate::error::ChannelError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;
use uuid::Uuid;

/// Default ingestion endpoint; override with
/// [`Ingestion::set_server_url`] or the channel builder.
pub const DEFAULT_SERVER_URL: &str = "https://in.logship.io";

pub(crate) const HEADER_APP_SECRET: &str = "App-Secret";
pub(crate) const HEADER_INSTALL_ID: &str = "Install-ID";
pub(crate) const API_VERSION: &str = "1.0.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Completion callback for a transmission; invoked at most once, never on
/// the thread that called [`Ingestion::send`].
pub type TransmissionCallback = Box<dyn FnOnce(Result<(), ChannelError>) + Send + 'static>;

/// One outgoing batch: identity headers plus the pre-serialized
/// `{"logs":[…]}` body. Cloning is cheap; retries reuse the same body.
#[derive(Clone, Debug)]
pub struct Batch {
    pub app_secret: String,
    pub install_id: Uuid,
    pub body: Bytes,
}

/// Transport contract consumed by the channel.
pub trait Ingestion: Send + Sync {
    /// Transmit `batch`; invoke `done` exactly once with the outcome
    /// unless the transport is closed first.
    fn send(&self, batch: Batch, done: TransmissionCallback);

    /// Override the base endpoint; takes effect on subsequent sends.
    fn set_server_url(&self, url: String);

    /// Release underlying resources; idempotent. In-flight requests are
    /// not cancelled.
    fn close(&self);

    /// Undo a previous [`close`](Ingestion::close).
    fn reopen(&self);
}

/// HTTP transport posting batches to `{server_url}/logs?api_version=…`.
pub struct HttpIngestion {
    client: reqwest::Client,
    server_url: RwLock<String>,
    closed: AtomicBool,
    runtime: Handle,
}

impl HttpIngestion {
    /// Create the transport on the given runtime handle.
    ///
    /// # Panics
    ///
    /// Panics if the underlying HTTP client fails to build (TLS
    /// misconfiguration).
    pub fn new(runtime: Handle) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            server_url: RwLock::new(DEFAULT_SERVER_URL.to_string()),
            closed: AtomicBool::new(false),
            runtime,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.server_url.read();
        format!(
            "{}/logs?api_version={}",
            base.trim_end_matches('/'),
            API_VERSION
        )
    }
}

impl Ingestion for HttpIngestion {
    fn send(&self, batch: Batch, done: TransmissionCallback) {
        let client = self.client.clone();
        let url = self.endpoint();
        let closed = self.closed.load(Ordering::SeqCst);
        self.runtime.spawn(async move {
            if closed {
                done(Err(ChannelError::Cancelled));
                return;
            }
            done(post_batch(client, url, batch).await);
        });
    }

    fn set_server_url(&self, url: String) {
        *self.server_url.write() = url;
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

async fn post_batch(
    client: reqwest::Client,
    url: String,
    batch: Batch,
) -> Result<(), ChannelError> {
    let resp = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header(HEADER_APP_SECRET, &batch.app_secret)
        .header(HEADER_INSTALL_ID, batch.install_id.to_string())
        .body(batch.body)
        .send()
        .await?;

    let status = resp.status().as_u16();
    if (200..300).contains(&status) {
        debug!(status, "batch accepted");
        return Ok(());
    }
    let message = resp.text().await.unwrap_or_default();
    ChannelError::from_status(status, message)
}
