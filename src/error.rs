//! Error types for the ingestion channel.

use thiserror::Error;

/// Main error type flowing through the channel, the store, and the
/// transport.
///
/// The transport variants drive the channel state machine: a
/// [recoverable](ChannelError::is_recoverable) failure suspends the
/// channel while retaining persisted logs, a fatal failure discards them.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Synthesized when work is abandoned: disable, shutdown, discard-mode
    /// enqueue, or a transport closed mid-call.
    #[error("cancelled")]
    Cancelled,

    /// The batch may be accepted later: network failure, timeout,
    /// 408/429, or a 5xx from the ingestion endpoint.
    #[error("recoverable transport error{}: {message}", fmt_status(.status))]
    Recoverable {
        status: Option<u16>,
        message: String,
    },

    /// The batch will never be accepted as-is (non-retriable 4xx).
    #[error("fatal transport error ({status}): {message}")]
    Fatal { status: u16, message: String },

    /// The serializer refused the log; the row was not persisted.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Disk or quota failure in the log store.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The device snapshot could not be built; the log is dropped.
    #[error("device info error: {0}")]
    DeviceInfo(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl ChannelError {
    /// Classify an HTTP response status.
    ///
    /// Returns `Ok(())` for 2xx. The mapping is total and deterministic:
    /// 408, 429 and all 5xx are recoverable, every other non-2xx is fatal.
    pub fn from_status(status: u16, message: impl Into<String>) -> Result<(), ChannelError> {
        match status {
            200..=299 => Ok(()),
            408 | 429 => Err(ChannelError::Recoverable {
                status: Some(status),
                message: message.into(),
            }),
            _ if status >= 500 => Err(ChannelError::Recoverable {
                status: Some(status),
                message: message.into(),
            }),
            _ => Err(ChannelError::Fatal {
                status,
                message: message.into(),
            }),
        }
    }

    /// Whether the channel should retain persisted logs and retry later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::Recoverable { .. })
    }

    /// HTTP status code if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ChannelError::Recoverable { status, .. } => *status,
            ChannelError::Fatal { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "timeout".to_string()
        } else {
            err.to_string()
        };
        ChannelError::Recoverable {
            status: None,
            message,
        }
    }
}
