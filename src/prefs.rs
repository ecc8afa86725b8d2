//! Preference storage for the small amount of state that must survive
//! process restarts outside the log store: the enabled flag and the
//! install identifier.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Preference key for the channel enabled flag.
pub const KEY_ENABLED: &str = "allowedNetworkRequests";

/// Preference key for the per-install identifier.
pub const KEY_INSTALL_ID: &str = "installId";

/// Key/value preference storage.
///
/// Implementations must be cheap to read; the channel consults
/// [`KEY_ENABLED`] on every `is_enabled` call.
pub trait Preferences: Send + Sync {
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn put_bool(&self, key: &str, value: bool);
    fn get_string(&self, key: &str) -> Option<String>;
    fn put_string(&self, key: &str, value: &str);
}

/// In-memory preferences, for tests and hosts that persist elsewhere.
#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .lock()
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    fn put_bool(&self, key: &str, value: bool) {
        self.values
            .lock()
            .insert(key.to_string(), serde_json::Value::Bool(value));
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn put_string(&self, key: &str, value: &str) {
        self.values
            .lock()
            .insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }
}

/// Preferences persisted as a JSON object in a single file.
///
/// Writes are flushed on every put; a corrupt or missing file starts
/// empty. I/O failures are logged and otherwise ignored, preferences are
/// best-effort by contract.
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl FilePreferences {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn flush(&self, values: &HashMap<String, serde_json::Value>) {
        match serde_json::to_string_pretty(values) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&self.path, text) {
                    warn!(path = %self.path.display(), error = %e, "failed to write preferences");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize preferences"),
        }
    }
}

impl Preferences for FilePreferences {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .lock()
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    fn put_bool(&self, key: &str, value: bool) {
        let mut values = self.values.lock();
        values.insert(key.to_string(), serde_json::Value::Bool(value));
        self.flush(&values);
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn put_string(&self, key: &str, value: &str) {
        let mut values = self.values.lock();
        values.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        self.flush(&values);
    }
}
