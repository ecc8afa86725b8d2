//! Logship Rust SDK core
//!
//! The ingestion channel at the center of a telemetry SDK: feature
//! modules enqueue heterogeneous log records into named groups, the
//! channel persists them in a local SQLite store, batches them by group
//! policy (batch size, flush interval, parallelism bound), and ships the
//! batches to an ingestion endpoint with retry, offline gating, and
//! graceful degradation on failure.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use logship::{Channel, LogRecord};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = Channel::builder("my-app-secret")
//!         .store_path("telemetry.db")
//!         .build()?;
//!
//!     // One lane per feature module: up to 50 logs per batch, flushed
//!     // at least every 3 seconds, one batch in flight at a time.
//!     channel.add_group("analytics", 50, Duration::from_secs(3), 1, None);
//!
//!     let event = LogRecord::new("event").with_payload(json!({ "name": "app_start" }));
//!     channel.enqueue(event, "analytics");
//!
//!     channel.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! Delivery is at-least-once: logs survive process restarts in the store
//! and are re-sent after recoverable transport failures. A fatal
//! response (a non-retriable 4xx) puts the channel into discard mode
//! until it is re-enabled.

mod async_store;
mod channel;
mod device;
mod error;
mod ingestion;
mod log;
mod network;
mod prefs;
mod retry;
mod store;

pub use channel::{Channel, ChannelBuilder};
pub use device::{DeviceInfoProvider, DeviceSnapshot, HostDeviceInfo};
pub use error::ChannelError;
pub use ingestion::{Batch, HttpIngestion, Ingestion, TransmissionCallback, DEFAULT_SERVER_URL};
pub use log::{ChannelListener, GroupListener, LogRecord};
pub use network::{NetworkGate, NetworkMonitor};
pub use prefs::{FilePreferences, MemoryPreferences, Preferences, KEY_ENABLED, KEY_INSTALL_ID};
pub use retry::{RetryIngestion, RetryPolicy};
pub use store::SqliteStore;

pub use async_store::AsyncStore;
