// ── Persistent storage ──
//
// Small JSON documents keyed by name: the last resolved identity and the
// endpoint metrics snapshot. `FileStorage` writes one `<key>.json` per
// document in the data directory; `MemoryStorage` backs tests.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{DetectionMethod, MacAddress, ResolvedIdentity};

pub const IDENTITY_KEY: &str = "client_identity";
pub const METRICS_KEY: &str = "endpoint_metrics";

/// Key/value document store.
pub trait Storage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>, CoreError>;
    fn save(&self, key: &str, value: &serde_json::Value) -> Result<(), CoreError>;
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

impl dyn Storage {
    /// Load and decode a document. Undecodable documents read as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        let Some(value) = self.load(key)? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring unreadable stored document");
                Ok(None)
            }
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), CoreError> {
        let value = serde_json::to_value(doc).map_err(|e| CoreError::Storage {
            path: key.to_owned(),
            message: e.to_string(),
        })?;
        self.save(key, &value)
    }
}

// ── FileStorage ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> CoreError {
    CoreError::Storage {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>, CoreError> {
        let path = self.path_for(key);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, &e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CoreError::Storage {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, &e))?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        let body = serde_json::to_string_pretty(value).map_err(|e| CoreError::Storage {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(&tmp, body).map_err(|e| io_error(&tmp, &e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error(&path, &e))
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }
}

// ── MemoryStorage ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStorage {
    docs: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<serde_json::Value>, CoreError> {
        Ok(self
            .docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> Result<(), CoreError> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// ── Persisted identity document ──────────────────────────────────────

/// On-disk form of the `client_identity` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedIdentity {
    pub ip: Option<Ipv4Addr>,
    pub mac: Option<MacAddress>,
    pub method: DetectionMethod,
    pub confidence: f64,
    /// When the identity was cached, milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<String>,
}

impl PersistedIdentity {
    pub fn new(identity: &ResolvedIdentity, cached_at: DateTime<Utc>) -> Self {
        Self {
            ip: identity.ip,
            mac: identity.mac,
            method: identity.method,
            confidence: identity.confidence,
            timestamp: cached_at.timestamp_millis(),
            observed_at: Some(identity.observed_at),
            source: Some(identity.source.clone()),
        }
    }

    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    pub fn into_identity(self) -> Option<ResolvedIdentity> {
        let cached_at = self.cached_at()?;
        Some(ResolvedIdentity {
            ip: self.ip,
            mac: self.mac,
            confidence: self.confidence,
            method: self.method,
            observed_at: self.observed_at.unwrap_or(cached_at),
            source: self.source.unwrap_or_else(|| DetectionMethod::Cache.to_string()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity() -> ResolvedIdentity {
        ResolvedIdentity {
            ip: Some(Ipv4Addr::new(10, 5, 50, 23)),
            mac: MacAddress::parse("aa:bb:cc:dd:ee:01"),
            confidence: 0.95,
            method: DetectionMethod::LocalDiscovery,
            observed_at: Utc.timestamp_millis_opt(1_760_000_000_000).unwrap(),
            source: "ip=local_discovery(0.95) mac=url_param".into(),
        }
    }

    #[test]
    fn file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Box<dyn Storage> = Box::new(FileStorage::new(dir.path().join("data")));

        assert!(storage.get::<PersistedIdentity>(IDENTITY_KEY).unwrap().is_none());

        let doc = PersistedIdentity::new(&identity(), Utc::now());
        storage.put(IDENTITY_KEY, &doc).unwrap();
        assert!(dir.path().join("data/client_identity.json").exists());

        let loaded: PersistedIdentity = storage.get(IDENTITY_KEY).unwrap().unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(loaded.into_identity().unwrap(), identity());

        storage.remove(IDENTITY_KEY).unwrap();
        storage.remove(IDENTITY_KEY).unwrap();
        assert!(storage.get::<PersistedIdentity>(IDENTITY_KEY).unwrap().is_none());
    }

    #[test]
    fn persisted_shape_uses_plain_fields() {
        let doc = PersistedIdentity::new(&identity(), Utc.timestamp_millis_opt(1_760_000_060_000).unwrap());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["ip"], "10.5.50.23");
        assert_eq!(value["mac"], "aa:bb:cc:dd:ee:01");
        assert_eq!(value["method"], "local_discovery");
        assert_eq!(value["timestamp"], 1_760_000_060_000_i64);
    }

    #[test]
    fn unreadable_document_reads_as_absent() {
        let storage: Box<dyn Storage> = Box::new(MemoryStorage::new());
        storage
            .save(IDENTITY_KEY, &serde_json::json!({"ip": 42}))
            .unwrap();
        assert!(storage.get::<PersistedIdentity>(IDENTITY_KEY).unwrap().is_none());
    }
}
