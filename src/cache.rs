//! Content-addressed local response cache.
//!
//! One file per key under the configured directory; the filename is the
//! SHA-256 of the key. Each file holds a self-described envelope with a
//! format version, completeness flag, write timestamp, freshness hints, and
//! the payload. Writes go through a temp file in the same directory with an
//! fsync and an atomic rename, serialized per key by an exclusive file
//! lock. Unreadable entries are quarantined (renamed aside) and report a
//! miss so processing continues.
//!
//! Partial entries (`complete=false`) exist to carry resume tokens across
//! process restarts; they are never returned by a normal lookup.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::normalize::parse_date_tolerant;
use crate::CacheMode;

/// Envelope format version.
const ENVELOPE_VERSION: &str = "1";

/// Which endpoint's staleness rule applies to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEndpoint {
    /// getDataCode: TTL-driven, DATE is not a freshness source
    Code,
    /// getDataLayer: TTL-driven, DATE is not a freshness source
    Layer,
    /// getMetadata: observed DATE shifts the staleness reference
    Metadata,
}

/// Self-described on-disk entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    /// Envelope format version
    pub version: String,
    /// Whether the payload is a fully materialized result
    pub complete: bool,
    /// Unix seconds at write time
    pub written_at: i64,
    /// The API DATE observed when the payload was fetched
    pub api_date_observed: Option<String>,
    /// Greatest LAST_UPDATE across payload records
    pub last_update_snapshot: Option<String>,
    /// Serialized frame
    pub payload: serde_json::Value,
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The stored envelope
    pub envelope: CacheEnvelope,
    /// Whether the staleness rule considers it expired
    pub stale: bool,
}

/// File-backed cache gateway.
#[derive(Debug)]
pub struct FileCache {
    config: CacheConfig,
}

impl FileCache {
    /// Create a cache over the configured directory. The directory is
    /// created eagerly so later writes only contend on per-key locks.
    pub fn new(config: CacheConfig) -> Self {
        if let Some(dir) = &config.dir {
            if let Err(error) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), %error, "could not create cache directory");
            }
        }
        Self { config }
    }

    fn path_for_key(&self, key: &str) -> Option<PathBuf> {
        let dir = self.config.dir.as_ref()?;
        let digest = Sha256::digest(key.as_bytes());
        let mut name = String::with_capacity(64);
        for byte in digest {
            name.push_str(&format!("{byte:02x}"));
        }
        Some(dir.join(format!("{name}.json")))
    }

    fn quarantine(path: &Path) {
        let mut sibling = path.as_os_str().to_owned();
        sibling.push(".broken");
        if let Err(error) = std::fs::rename(path, PathBuf::from(&sibling)) {
            warn!(path = %path.display(), %error, "failed to quarantine cache entry");
        } else {
            warn!(path = %path.display(), "quarantined unreadable cache entry");
        }
    }

    fn is_stale(&self, envelope: &CacheEnvelope, endpoint: CacheEndpoint) -> bool {
        let now = Utc::now();
        let age_secs = now.timestamp().saturating_sub(envelope.written_at);
        if age_secs < 0 || age_secs as u64 > self.config.ttl.as_secs() {
            return true;
        }
        if endpoint == CacheEndpoint::Metadata {
            // A metadata entry observed before the most recent publish
            // window is stale once that window has passed, TTL or not.
            let window = self.config.publish_window;
            let now_fixed: DateTime<FixedOffset> = now.into();
            let refresh_point = window.latest_start(&now_fixed);
            let (observed, _) = parse_date_tolerant(envelope.api_date_observed.as_deref());
            if let Some(observed) = observed {
                if observed < refresh_point {
                    return true;
                }
            }
        }
        false
    }

    /// Look up an entry.
    ///
    /// Misses on: cache off or unconfigured, `ForceRefresh` mode, missing
    /// file, unreadable file (quarantined), or an incomplete entry without
    /// `allow_incomplete`.
    pub fn get(
        &self,
        key: &str,
        mode: CacheMode,
        allow_incomplete: bool,
        endpoint: CacheEndpoint,
    ) -> Option<CacheHit> {
        if mode == CacheMode::Off || mode == CacheMode::ForceRefresh {
            return None;
        }
        let path = self.path_for_key(key)?;
        if !path.exists() {
            return None;
        }

        let lock_path = path.with_extension("lock");
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .ok()?;
        let mut lock = RwLock::new(lock_file);
        let guard = lock.read().ok()?;

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => {
                drop(guard);
                Self::quarantine(&path);
                return None;
            }
        };
        let envelope: CacheEnvelope = match serde_json::from_str(&contents) {
            Ok(envelope) => envelope,
            Err(_) => {
                drop(guard);
                Self::quarantine(&path);
                return None;
            }
        };
        if envelope.version != ENVELOPE_VERSION {
            drop(guard);
            Self::quarantine(&path);
            return None;
        }
        if !envelope.complete && !allow_incomplete {
            return None;
        }
        let stale = self.is_stale(&envelope, endpoint);
        debug!(key, stale, complete = envelope.complete, "cache hit");
        Some(CacheHit { envelope, stale })
    }

    /// Store an entry atomically, replacing any previous value for the key.
    ///
    /// Write failures are logged and swallowed: the cache is an accelerator,
    /// never a correctness dependency.
    pub fn put(
        &self,
        key: &str,
        payload: serde_json::Value,
        complete: bool,
        api_date_observed: Option<String>,
        last_update_snapshot: Option<String>,
    ) {
        let Some(path) = self.path_for_key(key) else {
            return;
        };
        let envelope = CacheEnvelope {
            version: ENVELOPE_VERSION.to_string(),
            complete,
            written_at: Utc::now().timestamp(),
            api_date_observed,
            last_update_snapshot,
            payload,
        };
        if let Err(error) = self.write_envelope(&path, &envelope) {
            warn!(key, %error, "cache write failed");
        }
    }

    fn write_envelope(&self, path: &Path, envelope: &CacheEnvelope) -> std::io::Result<()> {
        let data = serde_json::to_vec(envelope)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let lock_path = path.with_extension("lock");
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
