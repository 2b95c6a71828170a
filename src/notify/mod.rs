//! Best-effort push notifications for abuse signals
//!
//! Dispatch never blocks or fails a request: delivery runs on a spawned
//! task with a bounded timeout and at most one retry, and failures are
//! only logged.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::NotifySettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification service returned {0}")]
    Status(u16),

    #[error("Notification timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Excess over the rate limit reached a multiple of the alert step
    RateLimitExceeded {
        identity: String,
        ip: String,
        method: String,
        path: String,
        count: u32,
        max: u32,
        excess: u32,
    },
    /// A relayed webhook was rejected as a repeat of the previous payload
    WebhookDenied {
        api_key: Option<String>,
        ip: String,
        has_ping: bool,
        has_keyword: bool,
        duplicate: bool,
    },
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self {
            Notification::RateLimitExceeded { .. } => "Rate limit exceeded",
            Notification::WebhookDenied { .. } => "Webhook denied",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notification::RateLimitExceeded {
                identity,
                ip,
                method,
                path,
                count,
                max,
                excess,
            } => format!(
                "{} ({}) sent {} requests against a limit of {} ({} over) - last: {} {}",
                identity, ip, count, max, excess, method, path
            ),
            Notification::WebhookDenied {
                api_key,
                ip,
                has_ping,
                has_keyword,
                duplicate,
            } => format!(
                "Webhook from {} ({}) denied - ping: {}, keyword: {}, duplicate: {}",
                api_key.as_deref().unwrap_or("none"),
                ip,
                has_ping,
                has_keyword,
                duplicate
            ),
        }
    }

    fn priority(&self) -> u8 {
        match self {
            Notification::RateLimitExceeded { .. } => 4,
            Notification::WebhookDenied { .. } => 3,
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct NtfyMessage<'a> {
    topic: &'a str,
    title: &'a str,
    message: String,
    priority: u8,
}

/// Publishes to an ntfy-compatible JSON endpoint
pub struct NtfySink {
    client: reqwest::Client,
    url: String,
    topic: String,
}

impl NtfySink {
    pub fn new(url: &str, topic: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("storcale-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for NtfySink {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = NtfyMessage {
            topic: &self.topic,
            title: notification.title(),
            message: notification.message(),
            priority: notification.priority(),
        };
        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Clone)]
pub struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, timeout: Duration) -> Self {
        Self {
            sink: Some(sink),
            timeout,
        }
    }

    /// A notifier that drops everything
    pub fn disabled() -> Self {
        Self {
            sink: None,
            timeout: Duration::ZERO,
        }
    }

    /// Build from settings; no topic means notifications are off
    pub fn from_settings(settings: &NotifySettings) -> Result<Self, NotifyError> {
        let timeout = Duration::from_millis(settings.timeout_ms);
        match settings.topic.as_deref().filter(|t| !t.is_empty()) {
            Some(topic) => {
                let sink = NtfySink::new(&settings.url, topic, timeout)?;
                Ok(Self::new(Arc::new(sink), timeout))
            }
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Fire and forget
    pub fn dispatch(&self, notification: Notification) {
        if self.sink.is_none() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(&notification).await {
                warn!(error = %e, title = notification.title(), "Notification dropped");
            }
        });
    }

    /// Deliver with a bounded timeout, retrying once on failure
    pub async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };

        match self.attempt(sink.as_ref(), notification).await {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!(error = %first, "Notification failed, retrying once");
                self.attempt(sink.as_ref(), notification).await
            }
        }
    }

    async fn attempt(
        &self,
        sink: &dyn NotificationSink,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        match tokio::time::timeout(self.timeout, sink.send(notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Captures notifications instead of sending them. The first
    /// `fail_first` sends report an error.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<Notification>>,
        attempts: AtomicU32,
        fail_first: u32,
    }

    impl RecordingSink {
        pub fn failing(fail_first: u32) -> Self {
            Self {
                fail_first,
                ..Default::default()
            }
        }

        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }

        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(NotifyError::Status(503));
            }
            self.sent.lock().push(notification.clone());
            Ok(())
        }
    }

    /// Never answers
    pub struct StallingSink;

    #[async_trait]
    impl NotificationSink for StallingSink {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingSink, StallingSink};
    use super::*;

    fn sample() -> Notification {
        Notification::RateLimitExceeded {
            identity: "key:K1".to_string(),
            ip: "1.2.3.4".to_string(),
            method: "GET".to_string(),
            path: "/api/events".to_string(),
            count: 15,
            max: 5,
            excess: 10,
        }
    }

    #[tokio::test]
    async fn test_single_retry_recovers() {
        let sink = Arc::new(RecordingSink::failing(1));
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(1));

        notifier.deliver(&sample()).await.unwrap();
        assert_eq!(sink.attempts(), 2);
        assert_eq!(sink.sent(), vec![sample()]);
    }

    #[tokio::test]
    async fn test_gives_up_after_one_retry() {
        let sink = Arc::new(RecordingSink::failing(5));
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(1));

        assert!(matches!(
            notifier.deliver(&sample()).await,
            Err(NotifyError::Status(503))
        ));
        assert_eq!(sink.attempts(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_bounded() {
        let notifier = Notifier::new(Arc::new(StallingSink), Duration::from_millis(20));
        assert!(matches!(
            notifier.deliver(&sample()).await,
            Err(NotifyError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_silent() {
        let notifier = Notifier::from_settings(&NotifySettings::default()).unwrap();
        assert!(!notifier.is_enabled());
        notifier.dispatch(sample());
        notifier.deliver(&sample()).await.unwrap();
    }

    #[test]
    fn test_message_mentions_identity_and_excess() {
        let msg = sample().message();
        assert!(msg.contains("key:K1"));
        assert!(msg.contains("10 over"));
        assert!(msg.contains("GET /api/events"));
    }
}
