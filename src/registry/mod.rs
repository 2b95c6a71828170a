//! API key registry
//!
//! A JSON document keyed by category, loaded eagerly at startup and re-read
//! on reload. Deactivation rewrites the document in place (whole-file
//! read-modify-write, serialized within the process).

mod entry;
mod permissions;

pub use entry::{
    mask_key, ApiKeyEntry, RateLimitOverride, PERMS_MEMBER, PUBLIC_DIRS_MEMBER,
    WILDCARD_PERMISSION,
};
pub use permissions::{PermissionIndex, PermissionResolver};

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::ratelimit::RateLimits;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to access key registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key registry is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Key registry must be a JSON object keyed by category")]
    NotAnObject,

    #[error("Invalid API key entry `{category}`: {reason}")]
    InvalidEntry { category: String, reason: String },

    #[error("Duplicate API key shared by categories `{first}` and `{second}`")]
    DuplicateKey { first: String, second: String },
}

/// Immutable view of the registry at one point in time
#[derive(Debug)]
pub struct RegistrySnapshot {
    /// Bumped on every reload or mutation
    pub generation: u64,
    /// Entries in document order
    pub entries: Vec<ApiKeyEntry>,
    /// Lowercased directory names mounted without admission checks
    pub public_dirs: Vec<String>,
}

impl RegistrySnapshot {
    fn from_document(doc: &Value, generation: u64) -> Result<Self, RegistryError> {
        let obj = doc.as_object().ok_or(RegistryError::NotAnObject)?;

        let mut entries = Vec::with_capacity(obj.len());
        let mut public_dirs = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();

        for (category, raw) in obj {
            match category.as_str() {
                PUBLIC_DIRS_MEMBER => {
                    public_dirs = parse_public_dirs(raw)?;
                }
                PERMS_MEMBER => {}
                _ => {
                    let entry = ApiKeyEntry::from_json(category, raw)?;
                    if let Some(first) = seen.insert(entry.key.clone(), category.clone()) {
                        return Err(RegistryError::DuplicateKey {
                            first,
                            second: category.clone(),
                        });
                    }
                    entries.push(entry);
                }
            }
        }

        Ok(Self {
            generation,
            entries,
            public_dirs,
        })
    }

    pub fn find(&self, key: &str) -> Option<&ApiKeyEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

fn parse_public_dirs(raw: &Value) -> Result<Vec<String>, RegistryError> {
    let items = raw.as_array().ok_or_else(|| RegistryError::InvalidEntry {
        category: PUBLIC_DIRS_MEMBER.to_string(),
        reason: "must be an array of directory names".to_string(),
    })?;
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect())
}

/// File-backed API key registry
pub struct KeyRegistry {
    path: PathBuf,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    write_lock: Mutex<()>,
}

impl KeyRegistry {
    /// Load the registry at startup. Any error here is fatal to the process.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;
        let doc: Value = serde_json::from_str(&raw)?;
        let snapshot = RegistrySnapshot::from_document(&doc, 1)?;

        info!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            public_dirs = ?snapshot.public_dirs,
            "Loaded API key registry"
        );

        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.read().generation
    }

    pub fn public_dirs(&self) -> Vec<String> {
        self.snapshot.read().public_dirs.clone()
    }

    /// Look up an entry by its key, valid or not
    pub fn find(&self, key: &str) -> Option<ApiKeyEntry> {
        self.snapshot.read().find(key).cloned()
    }

    /// Limits for a caller: the matching entry's override over the global
    /// default. Anonymous callers always get the default.
    pub fn limits_for(&self, api_key: Option<&str>, default: RateLimits) -> RateLimits {
        let Some(key) = api_key else {
            return default;
        };
        let snapshot = self.snapshot.read();
        snapshot
            .find(key)
            .and_then(|e| e.rate_limit)
            .map(|o| o.resolve(default))
            .unwrap_or(default)
    }

    /// Re-read the registry file, replacing the in-memory view
    pub async fn reload(&self) -> Result<usize, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let doc = self.read_document().await?;
        let count = self.install(&doc)?;
        info!(entries = count, "Reloaded API key registry");
        Ok(count)
    }

    /// Mark every entry carrying `key` as invalid and persist the change.
    /// Returns whether any entry matched; nothing is written when none did.
    pub async fn deactivate(&self, key: &str) -> Result<bool, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        let key = key.trim();

        let obj = doc.as_object_mut().ok_or(RegistryError::NotAnObject)?;
        let mut found = false;
        for (category, raw) in obj.iter_mut() {
            if category == PUBLIC_DIRS_MEMBER || category == PERMS_MEMBER {
                continue;
            }
            let Some(entry) = raw.as_object_mut() else {
                continue;
            };
            // Stored keys are trimmed at load
            let matches = ["key", "apiKey"]
                .iter()
                .any(|f| entry.get(*f).and_then(Value::as_str).map(str::trim) == Some(key));
            if matches {
                entry.insert("valid".to_string(), Value::Bool(false));
                found = true;
            }
        }

        if !found {
            return Ok(false);
        }

        self.write_document(&doc).await?;
        self.install(&doc)?;
        info!(key = %mask_key(key), "API key deactivated");
        Ok(true)
    }

    fn install(&self, doc: &Value) -> Result<usize, RegistryError> {
        let mut current = self.snapshot.write();
        let next = RegistrySnapshot::from_document(doc, current.generation + 1)?;
        let count = next.entries.len();
        *current = Arc::new(next);
        Ok(count)
    }

    async fn read_document(&self) -> Result<Value, RegistryError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RegistryError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write_document(&self, doc: &Value) -> Result<(), RegistryError> {
        let body = serde_json::to_string_pretty(doc)?;
        crate::fsutil::write_atomic(&self.path, body.as_bytes())
            .await
            .map_err(|source| RegistryError::Io {
                path: self.path.clone(),
                source,
            })
    }
}
