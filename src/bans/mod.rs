//! Banned client addresses
//!
//! A flat JSON object `{ "<ip>": { reason, bannedAt, bannedBy } }`. Checks
//! read the file fresh every time so edits made outside the process take
//! effect immediately; writes are whole-file read-modify-write under an
//! in-process lock.
//!
//! An address is banned when its key holds any truthy value. Hand-edited
//! entries like `"1.2.3.4": true` or records missing fields still ban.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::fsutil;

#[derive(Debug, Error)]
pub enum BanStoreError {
    #[error("Failed to access ban list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ban list is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BanRecord {
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub banned_by: String,
}

impl BanRecord {
    /// Interpret one value of the ban file. `None` means "not banned":
    /// `null`, `false`, `0` and `""`.
    fn from_value(ip: &str, value: Value) -> Option<Self> {
        let placeholder = Self {
            reason: String::new(),
            banned_at: None,
            banned_by: String::new(),
        };
        match value {
            Value::Null | Value::Bool(false) => None,
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(reason) => Some(Self { reason, ..placeholder }),
            Value::Object(fields) => match serde_json::from_value(Value::Object(fields.clone())) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(ip = %ip, error = %e, "Ban record has malformed fields, keeping the ban");
                    let text = |name: &str| {
                        fields
                            .get(name)
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    };
                    Some(Self {
                        reason: text("reason"),
                        banned_by: text("bannedBy"),
                        ..placeholder
                    })
                }
            },
            _ => Some(placeholder),
        }
    }
}

pub type BanList = BTreeMap<String, BanRecord>;

pub struct BanStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BanStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Whether `ip` is banned. An unreadable or corrupt list counts as empty.
    pub async fn is_banned(&self, ip: &str) -> bool {
        match self.read().await {
            Ok(bans) => bans.contains_key(ip),
            Err(e) => {
                warn!(error = %e, "Ban list unavailable, treating as empty");
                false
            }
        }
    }

    pub async fn list(&self) -> Result<BanList, BanStoreError> {
        self.read().await
    }

    /// Ban `ip`, replacing any existing record
    pub async fn ban(&self, ip: &str, reason: &str, actor: &str) -> Result<BanRecord, BanStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut bans = self.read().await?;

        let record = BanRecord {
            reason: reason.to_string(),
            banned_at: Some(Utc::now()),
            banned_by: actor.to_string(),
        };
        bans.insert(ip.to_string(), record.clone());
        self.write(&bans).await?;

        info!(ip = %ip, reason = %reason, banned_by = %actor, "IP banned");
        Ok(record)
    }

    /// Lift a ban. Returns whether `ip` was banned; the file is untouched
    /// when it was not.
    pub async fn unban(&self, ip: &str) -> Result<bool, BanStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut bans = self.read().await?;

        if bans.remove(ip).is_none() {
            return Ok(false);
        }
        self.write(&bans).await?;

        info!(ip = %ip, "IP unbanned");
        Ok(true)
    }

    async fn read(&self) -> Result<BanList, BanStoreError> {
        let raw = fsutil::read_or_empty(&self.path)
            .await
            .map_err(|source| BanStoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        if raw.trim().is_empty() {
            return Ok(BanList::new());
        }

        let doc: Map<String, Value> = serde_json::from_str(&raw)?;
        Ok(doc
            .into_iter()
            .filter_map(|(ip, value)| BanRecord::from_value(&ip, value).map(|record| (ip, record)))
            .collect())
    }

    async fn write(&self, bans: &BanList) -> Result<(), BanStoreError> {
        let json = serde_json::to_vec_pretty(bans)?;
        fsutil::write_atomic(&self.path, &json)
            .await
            .map_err(|source| BanStoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BanStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BanStore::new(dir.path().join("banned_ips.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_file_means_no_bans() {
        let (_dir, store) = store();
        assert!(!store.is_banned("1.2.3.4").await);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ban_then_check() {
        let (_dir, store) = store();
        let record = store.ban("9.9.9.9", "spam", "admin").await.unwrap();

        assert_eq!(record.reason, "spam");
        assert!(store.is_banned("9.9.9.9").await);
        assert!(!store.is_banned("9.9.9.8").await);

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&store.path).unwrap()).unwrap();
        assert_eq!(on_disk["9.9.9.9"]["bannedBy"], "admin");
        assert!(on_disk["9.9.9.9"]["bannedAt"].is_string());
    }

    #[tokio::test]
    async fn test_rebanning_overwrites_record() {
        let (_dir, store) = store();
        store.ban("9.9.9.9", "spam", "alice").await.unwrap();
        store.ban("9.9.9.9", "abuse", "bob").await.unwrap();

        let bans = store.list().await.unwrap();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans["9.9.9.9"].reason, "abuse");
        assert_eq!(bans["9.9.9.9"].banned_by, "bob");
    }

    #[tokio::test]
    async fn test_unban_unknown_does_not_touch_file() {
        let (_dir, store) = store();
        assert!(!store.unban("1.1.1.1").await.unwrap());
        assert!(!store.path.exists());

        store.ban("2.2.2.2", "x", "admin").await.unwrap();
        let before = std::fs::read_to_string(&store.path).unwrap();
        assert!(!store.unban("1.1.1.1").await.unwrap());
        assert_eq!(std::fs::read_to_string(&store.path).unwrap(), before);

        assert!(store.unban("2.2.2.2").await.unwrap());
        assert!(!store.is_banned("2.2.2.2").await);
    }

    #[tokio::test]
    async fn test_corrupt_file_degrades_to_no_bans() {
        let (_dir, store) = store();
        std::fs::write(&store.path, "{ not json").unwrap();

        assert!(!store.is_banned("9.9.9.9").await);
        assert!(matches!(store.list().await, Err(BanStoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_external_edits_are_seen() {
        let (_dir, store) = store();
        std::fs::write(
            &store.path,
            r#"{"5.5.5.5":{"reason":"manual","bannedAt":"2024-01-01T00:00:00Z","bannedBy":"ops"}}"#,
        )
        .unwrap();

        assert!(store.is_banned("5.5.5.5").await);
    }

    #[tokio::test]
    async fn test_partial_records_still_ban() {
        let (_dir, store) = store();
        std::fs::write(
            &store.path,
            r#"{
                "1.2.3.4": {"reason": "spam"},
                "5.6.7.8": true,
                "6.6.6.6": "scraping",
                "7.7.7.7": {"reason": "old", "bannedAt": "yesterday", "bannedBy": "ops"},
                "8.8.8.8": null,
                "9.9.9.9": false
            }"#,
        )
        .unwrap();

        for ip in ["1.2.3.4", "5.6.7.8", "6.6.6.6", "7.7.7.7"] {
            assert!(store.is_banned(ip).await, "{} should be banned", ip);
        }
        assert!(!store.is_banned("8.8.8.8").await);
        assert!(!store.is_banned("9.9.9.9").await);

        let bans = store.list().await.unwrap();
        assert_eq!(bans.len(), 4);
        assert_eq!(bans["1.2.3.4"].reason, "spam");
        assert_eq!(bans["1.2.3.4"].banned_at, None);
        assert_eq!(bans["6.6.6.6"].reason, "scraping");
        assert_eq!(bans["7.7.7.7"].banned_by, "ops");
        assert_eq!(bans["7.7.7.7"].banned_at, None);
    }

    #[tokio::test]
    async fn test_unban_removes_partial_record() {
        let (_dir, store) = store();
        std::fs::write(&store.path, r#"{"5.6.7.8": true}"#).unwrap();

        assert!(store.unban("5.6.7.8").await.unwrap());
        assert!(!store.is_banned("5.6.7.8").await);
    }
}
