//! Append-only access log
//!
//! One text line per completed `/api/` request. The same file backs the
//! log-tail and per-day stats endpoints, which parse the lines back.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::fsutil;

pub const DEFAULT_TAIL: usize = 100;
pub const MAX_TAIL: usize = 1000;

/// Longest request body kept in a log line
pub const MAX_LOGGED_BODY_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Could not read log file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Could not clear log file: {0}")]
    Clear(#[source] std::io::Error),
}

/// Everything recorded about one request
#[derive(Debug, Clone)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub method: String,
    /// Path plus query string as received
    pub url: String,
    pub api_key: Option<String>,
    /// Client-supplied `timestamp` header
    pub timestamp: Option<String>,
    /// Serialized JSON body, when one was captured
    pub body: Option<String>,
    /// Url-encoded query, when present
    pub query: Option<String>,
    pub status: u16,
    pub ip: String,
    pub rate_left: u32,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} - api-key: {} - timestamp: {} - body: {} - query: {} - response: {} - ip: {} - rateLeft: {}",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.method,
            self.url,
            self.api_key.as_deref().unwrap_or("none"),
            self.timestamp.as_deref().unwrap_or("none"),
            self.body.as_deref().unwrap_or(""),
            self.query.as_deref().filter(|q| !q.is_empty()).unwrap_or("No Query"),
            self.status,
            self.ip,
            self.rate_left,
        )
    }
}

/// Truncate a captured body for logging, on a char boundary
pub fn clip_body(body: &str) -> String {
    match body.char_indices().nth(MAX_LOGGED_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total: usize,
    /// Request count per UTC day (`YYYY-MM-DD`)
    pub per_day: BTreeMap<String, usize>,
}

pub struct AccessLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl AccessLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a line. Failures are reported on the diagnostic channel only.
    pub async fn record(&self, line: &LogLine) {
        let text = line.to_string();
        info!(
            target: "access",
            method = %line.method,
            url = %line.url,
            status = line.status,
            ip = %line.ip,
            rate_left = line.rate_left,
            "{}",
            text
        );

        let _guard = self.append_lock.lock().await;
        if let Err(e) = fsutil::append_line(&self.path, &text).await {
            error!(path = %self.path.display(), error = %e, "Failed to write access log");
        }
    }

    /// The last `n` lines in chronological order; `n` is clamped to 1..=1000
    pub async fn tail(&self, n: usize) -> Result<Vec<String>, AuditError> {
        let n = n.clamp(1, MAX_TAIL);
        let raw = fsutil::read_or_empty(&self.path)
            .await
            .map_err(AuditError::Read)?;

        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }

    pub async fn clear(&self) -> Result<(), AuditError> {
        let _guard = self.append_lock.lock().await;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuditError::Clear(e)),
        }
    }

    /// Total line count and requests per day, from each line's leading timestamp
    pub async fn stats(&self) -> Result<LogStats, AuditError> {
        let raw = fsutil::read_or_empty(&self.path)
            .await
            .map_err(AuditError::Read)?;

        let mut stats = LogStats::default();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            stats.total += 1;
            if let Some(day) = line_day(line) {
                *stats.per_day.entry(day).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }
}

fn line_day(line: &str) -> Option<String> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    let at = DateTime::parse_from_rfc3339(&rest[..end]).ok()?;
    Some(at.with_timezone(&Utc).format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn line(status: u16) -> LogLine {
        LogLine {
            at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            method: "GET".to_string(),
            url: "/api/events?x=1".to_string(),
            api_key: Some("K1".to_string()),
            timestamp: None,
            body: None,
            query: Some("x=1".to_string()),
            status,
            ip: "1.2.3.4".to_string(),
            rate_left: 59,
        }
    }

    #[test]
    fn test_line_layout() {
        assert_eq!(
            line(200).to_string(),
            "[2024-03-01T12:00:00.000Z] GET /api/events?x=1 - api-key: K1 - timestamp: none - body:  - query: x=1 - response: 200 - ip: 1.2.3.4 - rateLeft: 59"
        );

        let mut anon = line(401);
        anon.api_key = None;
        anon.query = None;
        anon.body = Some(r#"{"a":1}"#.to_string());
        let text = anon.to_string();
        assert!(text.contains("api-key: none"));
        assert!(text.contains(r#"body: {"a":1}"#));
        assert!(text.contains("query: No Query"));
        assert!(text.contains("response: 401"));
    }

    #[test]
    fn test_clip_body() {
        let long = "é".repeat(MAX_LOGGED_BODY_CHARS + 5);
        let clipped = clip_body(&long);
        assert_eq!(clipped.chars().count(), MAX_LOGGED_BODY_CHARS + 3);
        assert_eq!(clip_body("{}"), "{}");
    }

    #[tokio::test]
    async fn test_record_tail_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path().join("access.log"));

        assert!(log.tail(10).await.unwrap().is_empty());

        for status in [200, 403, 429] {
            log.record(&line(status)).await;
        }

        let tail = log.tail(2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail[0].contains("response: 403"));
        assert!(tail[1].contains("response: 429"));

        // clamped up to one line
        assert_eq!(log.tail(0).await.unwrap().len(), 1);

        log.clear().await.unwrap();
        assert!(log.tail(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path().join("access.log"));

        log.record(&line(200)).await;
        let mut next_day = line(200);
        next_day.at = Utc.with_ymd_and_hms(2024, 3, 2, 0, 30, 0).unwrap();
        log.record(&next_day).await;
        log.record(&next_day).await;
        fsutil::append_line(log.path(), "garbage line").await.unwrap();

        let stats = log.stats().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.per_day.get("2024-03-01"), Some(&1));
        assert_eq!(stats.per_day.get("2024-03-02"), Some(&2));
    }
}
