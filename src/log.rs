//! Log records, the wire container, and listener contracts.

use crate::device::DeviceSnapshot;
use crate::error::ChannelError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A single telemetry record produced by a feature module.
///
/// The domain payload is an opaque JSON object flattened into the wire
/// representation next to the `type` discriminator. The channel fills in
/// `timestamp`, `install_id` and `device` during enqueue when the producer
/// left them unset.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    /// Type discriminator, e.g. `"event"` or `"crash"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Milliseconds since epoch; 0 means "assign at enqueue".
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timestamp: i64,

    /// Session identifier, if the producing module tracks sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,

    /// Per-install identifier, stable for the lifetime of the install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_id: Option<Uuid>,

    /// Device snapshot shared by all logs enqueued under the same cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Arc<DeviceSnapshot>>,

    /// Module-specific payload; must serialize to a JSON object.
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl LogRecord {
    /// Create a record of the given type with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: 0,
            sid: None,
            install_id: None,
            device: None,
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach a payload object.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach a session id.
    pub fn with_sid(mut self, sid: Uuid) -> Self {
        self.sid = Some(sid);
        self
    }
}

/// Wire container: `{"logs":[…]}`.
#[derive(Serialize)]
pub(crate) struct LogContainer<'a> {
    pub logs: &'a [LogRecord],
}

/// Current wall-clock time in milliseconds since epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Per-group callbacks provided by the owning feature module.
///
/// Listeners run while the channel lock is held: they must not re-enter
/// channel APIs and should limit themselves to O(1) in-memory work.
pub trait GroupListener: Send + Sync {
    /// The log is about to be handed to the transport.
    fn on_before_sending(&self, _log: &LogRecord) {}

    /// The batch containing this log was accepted by the endpoint.
    fn on_success(&self, _log: &LogRecord) {}

    /// The channel gave up on this log (fatal failure, cancellation, or
    /// discard-mode enqueue).
    fn on_failure(&self, _log: &LogRecord, _error: &ChannelError) {}
}

/// Global enqueue observers registered on the channel.
///
/// Same locking rules as [`GroupListener`].
pub trait ChannelListener: Send + Sync {
    /// Invoked synchronously during enqueue, before persistence. The
    /// listener may decorate the log in place.
    fn on_enqueuing_log(&self, _log: &mut LogRecord, _group: &str) {}

    /// Return `true` to drop the log before persistence.
    fn should_filter(&self, _log: &LogRecord) -> bool {
        false
    }

    /// A group was registered.
    fn on_group_added(&self, _group: &str) {}

    /// A group was removed.
    fn on_group_removed(&self, _group: &str) {}
}
