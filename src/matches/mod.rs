//! Match history store
//!
//! Newline-delimited JSON, one match per line, appended as received.
//! Lines that no longer parse are skipped on read.

mod stats;

pub use stats::{parse_date, PlayerReport, PlayerStats, StatsQuery};

use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::fsutil;

#[derive(Debug, Error)]
pub enum MatchLogError {
    #[error("Invalid match data")]
    MissingSessionId,

    #[error("Match log unavailable: {0}")]
    Io(#[from] std::io::Error),
}

pub struct MatchLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl MatchLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            append_lock: Mutex::new(()),
        }
    }

    /// Append one match. The record must carry a non-empty `sessionId`.
    pub async fn append(&self, record: &Value) -> Result<(), MatchLogError> {
        if session_id_of(record).is_none() {
            return Err(MatchLogError::MissingSessionId);
        }

        let _guard = self.append_lock.lock().await;
        fsutil::append_line(&self.path, &record.to_string()).await?;
        debug!(session_id = ?session_id_of(record), "Match recorded");
        Ok(())
    }

    /// Every stored match, or only those whose `sessionId` equals `session_id`
    pub async fn list(&self, session_id: Option<&str>) -> Result<Vec<Value>, MatchLogError> {
        let matches = self.read_all().await?;
        Ok(match session_id.filter(|s| !s.is_empty()) {
            Some(wanted) => matches
                .into_iter()
                .filter(|m| session_id_of(m).as_deref() == Some(wanted))
                .collect(),
            None => matches,
        })
    }

    /// Aggregate one player's stats across the stored matches
    pub async fn player_stats(&self, query: &StatsQuery) -> Result<PlayerReport, MatchLogError> {
        let matches = self.read_all().await?;
        Ok(stats::aggregate(&matches, query))
    }

    async fn read_all(&self) -> Result<Vec<Value>, MatchLogError> {
        let raw = fsutil::read_or_empty(&self.path).await?;
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

/// `sessionId` rendered as a string, when present and non-empty
fn session_id_of(record: &Value) -> Option<String> {
    match record.get("sessionId")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log() -> (tempfile::TempDir, MatchLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = MatchLog::new(dir.path().join("data/matches.log"));
        (dir, log)
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let (_dir, log) = log();
        assert!(log.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_requires_session_id() {
        let (_dir, log) = log();
        assert!(matches!(
            log.append(&json!({"placeName": "x"})).await,
            Err(MatchLogError::MissingSessionId)
        ));
        assert!(matches!(
            log.append(&json!({"sessionId": ""})).await,
            Err(MatchLogError::MissingSessionId)
        ));
    }

    #[tokio::test]
    async fn test_filter_by_session_id() {
        let (_dir, log) = log();
        log.append(&json!({"sessionId": "abc", "n": 1})).await.unwrap();
        log.append(&json!({"sessionId": "abcd", "n": 2})).await.unwrap();
        log.append(&json!({"sessionId": 42, "n": 3})).await.unwrap();
        fsutil::append_line(&log.path, "{broken").await.unwrap();

        assert_eq!(log.list(None).await.unwrap().len(), 3);

        let abc = log.list(Some("abc")).await.unwrap();
        assert_eq!(abc, vec![json!({"sessionId": "abc", "n": 1})]);

        assert_eq!(log.list(Some("42")).await.unwrap().len(), 1);
        assert!(log.list(Some("zzz")).await.unwrap().is_empty());
    }
}
