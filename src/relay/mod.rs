//! Discord webhook relay with moderation
//!
//! Payloads are screened (no files, no pings outside the whitelist, a
//! required keyword, no exact repeat of the previous payload), reduced to
//! the fields Discord accepts, sent with notifications suppressed, and
//! forwarded to a target URL taken from configuration.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::WebhookSettings;
use crate::notify::{Notification, Notifier};

/// Discord's SUPPRESS_NOTIFICATIONS message flag
pub const SUPPRESS_NOTIFICATIONS: u64 = 4096;

/// Target name used by the maps channel
pub const MAPS_TARGET: &str = "maps";

const ALLOWED_FIELDS: &[&str] = &[
    "content",
    "username",
    "avatar_url",
    "tts",
    "embeds",
    "allowed_mentions",
    "components",
    "attachments",
    "flags",
    "thread_name",
    "thread_id",
];

static PING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@(&?)(\d+)>|@everyone|@here").expect("valid regex literal"));

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Denied(String),

    #[error("Unknown webhook target `{0}`")]
    UnknownTarget(String),

    #[error("Failed to forward webhook: {0}")]
    Upstream(String),
}

/// Which relay route a payload arrived on. Each keeps its own duplicate
/// memory and moderation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Named target from the query, whitelisted pings, configured keywords
    Main,
    /// Fixed target, no pings at all, signature footer required
    Maps,
}

/// Who sent the payload, for denial notifications
#[derive(Debug, Clone)]
pub struct Caller {
    pub api_key: Option<String>,
    pub ip: String,
}

pub struct WebhookRelay {
    client: reqwest::Client,
    targets: HashMap<String, String>,
    keywords: Vec<String>,
    whitelisted_ids: HashSet<String>,
    maps_signature: String,
    last_payload: Mutex<HashMap<Channel, String>>,
    notifier: Notifier,
}

impl WebhookRelay {
    pub fn new(settings: &WebhookSettings, notifier: Notifier) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            targets: settings.targets.clone(),
            keywords: settings.keywords.iter().filter(|k| !k.is_empty()).cloned().collect(),
            whitelisted_ids: settings.whitelisted_ids.iter().cloned().collect(),
            maps_signature: settings.maps_signature.clone(),
            last_payload: Mutex::new(HashMap::new()),
            notifier,
        })
    }

    /// Screen, clean and forward one payload
    pub async fn relay(
        &self,
        channel: Channel,
        target: Option<&str>,
        body: &Value,
        caller: &Caller,
    ) -> Result<(), RelayError> {
        let (url, payload) = self.prepare(channel, target, body, caller)?;
        let serialized = body.to_string();

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), detail = %detail, "Webhook target rejected payload");
            return Err(RelayError::Upstream(format!("target returned {}", status.as_u16())));
        }

        self.last_payload.lock().insert(channel, serialized);
        info!(channel = ?channel, "Webhook forwarded");
        Ok(())
    }

    /// Run moderation and resolve the target, returning the URL and the
    /// payload to send
    pub fn prepare(
        &self,
        channel: Channel,
        target: Option<&str>,
        body: &Value,
        caller: &Caller,
    ) -> Result<(String, Value), RelayError> {
        let obj = body
            .as_object()
            .ok_or_else(|| RelayError::InvalidPayload("Invalid webhook payload".to_string()))?;

        let target = match channel {
            Channel::Main => target
                .filter(|t| !t.is_empty())
                .ok_or_else(|| RelayError::InvalidPayload("Invalid webhook payload/target Webhook".to_string()))?,
            Channel::Maps => MAPS_TARGET,
        };

        let serialized = body.to_string();

        if carries_files(obj) {
            self.remember(channel, serialized);
            return Err(RelayError::Denied(
                "Webhook denied: files/attachments not allowed.".to_string(),
            ));
        }

        let whitelist = match channel {
            Channel::Main => Some(&self.whitelisted_ids),
            Channel::Maps => None,
        };
        let has_ping = contains_ping(body, whitelist);
        let has_keyword = match channel {
            Channel::Main => has_keyword(obj, &self.keywords),
            Channel::Maps => has_keyword(obj, std::slice::from_ref(&self.maps_signature)),
        };
        let duplicate = self
            .last_payload
            .lock()
            .get(&channel)
            .is_some_and(|last| *last == serialized);

        if has_ping || !has_keyword || duplicate {
            if duplicate {
                self.notifier.dispatch(Notification::WebhookDenied {
                    api_key: caller.api_key.clone(),
                    ip: caller.ip.clone(),
                    has_ping,
                    has_keyword,
                    duplicate,
                });
            }
            self.remember(channel, serialized);
            warn!(channel = ?channel, has_ping, has_keyword, duplicate, "Webhook denied");
            return Err(RelayError::Denied("Webhook denied.".to_string()));
        }

        let url = self
            .targets
            .get(target)
            .cloned()
            .ok_or_else(|| RelayError::UnknownTarget(target.to_string()))?;

        let payload = clean_payload(obj);
        if !payload.contains_key("content") && !payload.contains_key("embeds") {
            return Err(RelayError::InvalidPayload(
                "Payload must have content or embeds.".to_string(),
            ));
        }

        Ok((url, Value::Object(payload)))
    }

    fn remember(&self, channel: Channel, serialized: String) {
        self.last_payload.lock().insert(channel, serialized);
    }
}

/// JavaScript-style truthiness, which is how senders flag attachments
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn carries_files(obj: &Map<String, Value>) -> bool {
    let flagged = |o: &Map<String, Value>| {
        o.get("files").is_some_and(truthy) || o.get("attachments").is_some_and(truthy)
    };
    flagged(obj)
        || obj
            .get("embeds")
            .and_then(Value::as_array)
            .is_some_and(|embeds| embeds.iter().filter_map(Value::as_object).any(flagged))
}

/// Whether any string in the payload pings someone. With a whitelist,
/// user and role pings of whitelisted ids are allowed; `@everyone` and
/// `@here` never are.
fn contains_ping(value: &Value, whitelist: Option<&HashSet<String>>) -> bool {
    match value {
        Value::String(s) => PING.captures_iter(s).any(|caps| match caps.get(2) {
            Some(id) => !whitelist.is_some_and(|w| w.contains(id.as_str())),
            None => true,
        }),
        Value::Array(items) => items.iter().any(|v| contains_ping(v, whitelist)),
        Value::Object(map) => map.values().any(|v| contains_ping(v, whitelist)),
        _ => false,
    }
}

/// A keyword appears in `content` or in any embed footer's text
fn has_keyword(obj: &Map<String, Value>, keywords: &[String]) -> bool {
    let hit = |text: &str| keywords.iter().any(|k| !k.is_empty() && text.contains(k.as_str()));

    if obj.get("content").and_then(Value::as_str).is_some_and(hit) {
        return true;
    }
    obj.get("embeds")
        .and_then(Value::as_array)
        .is_some_and(|embeds| {
            embeds.iter().any(|e| {
                e.pointer("/footer/text")
                    .and_then(Value::as_str)
                    .is_some_and(hit)
            })
        })
}

fn clean_payload(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::new();
    for field in ALLOWED_FIELDS {
        if let Some(v) = obj.get(*field).filter(|v| !v.is_null()) {
            cleaned.insert(field.to_string(), v.clone());
        }
    }

    let no_embeds_left = match cleaned.get_mut("embeds") {
        Some(Value::Array(embeds)) => {
            embeds.retain(Value::is_object);
            embeds.is_empty()
        }
        _ => false,
    };
    if no_embeds_left {
        cleaned.remove("embeds");
    }

    cleaned.insert("flags".to_string(), Value::from(SUPPRESS_NOTIFICATIONS));
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingSink;
    use serde_json::json;
    use std::sync::Arc;

    fn settings() -> WebhookSettings {
        WebhookSettings {
            targets: HashMap::from([
                ("events".to_string(), "http://127.0.0.1:9/events".to_string()),
                (MAPS_TARGET.to_string(), "http://127.0.0.1:9/maps".to_string()),
            ]),
            keywords: vec!["[TNIV]".to_string()],
            whitelisted_ids: vec!["111".to_string()],
            ..WebhookSettings::default()
        }
    }

    fn caller() -> Caller {
        Caller {
            api_key: Some("K1".to_string()),
            ip: "1.2.3.4".to_string(),
        }
    }

    fn relay() -> WebhookRelay {
        WebhookRelay::new(&settings(), Notifier::disabled()).unwrap()
    }

    #[test]
    fn test_clean_payload_keeps_allowed_fields() {
        let relay = relay();
        let body = json!({
            "content": "[TNIV] round over",
            "username": "bot",
            "secret": "drop me",
            "embeds": [1, {"title": "t"}],
            "flags": 0
        });

        let (url, payload) = relay.prepare(Channel::Main, Some("events"), &body, &caller()).unwrap();
        assert_eq!(url, "http://127.0.0.1:9/events");
        assert_eq!(
            payload,
            json!({
                "content": "[TNIV] round over",
                "username": "bot",
                "embeds": [{"title": "t"}],
                "flags": 4096
            })
        );
    }

    #[test]
    fn test_rejects_files_and_attachments() {
        let relay = relay();
        let in_embed = json!({"content": "[TNIV]", "embeds": [{"attachments": [{"id": 1}]}]});
        assert!(matches!(
            relay.prepare(Channel::Main, Some("events"), &in_embed, &caller()),
            Err(RelayError::Denied(msg)) if msg.contains("files/attachments")
        ));

        let top = json!({"content": "[TNIV] x", "files": ["a.png"]});
        assert!(matches!(
            relay.prepare(Channel::Main, Some("events"), &top, &caller()),
            Err(RelayError::Denied(_))
        ));
    }

    #[test]
    fn test_ping_whitelist() {
        let whitelist: HashSet<String> = ["111".to_string()].into();

        assert!(!contains_ping(&json!({"content": "hi <@111>"}), Some(&whitelist)));
        assert!(!contains_ping(&json!({"content": "hi <@&111>"}), Some(&whitelist)));
        assert!(contains_ping(&json!({"content": "hi <@111> and <@222>"}), Some(&whitelist)));
        assert!(contains_ping(&json!({"embeds": [{"description": "@everyone"}]}), Some(&whitelist)));
        assert!(contains_ping(&json!({"content": "<@111>"}), None));
        assert!(!contains_ping(&json!({"content": "email me @ home", "n": 5}), None));
    }

    #[test]
    fn test_keyword_in_content_or_footer() {
        let keywords = vec!["[TNIV]".to_string()];
        let footer = json!({"embeds": [{"footer": {"text": "sent by [TNIV]"}}]});
        assert!(has_keyword(footer.as_object().unwrap(), &keywords));

        let none = json!({"content": "hello"});
        assert!(!has_keyword(none.as_object().unwrap(), &keywords));
        assert!(!has_keyword(none.as_object().unwrap(), &[]));
    }

    #[tokio::test]
    async fn test_duplicate_after_denial_notifies() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), Duration::from_secs(1));
        let relay = WebhookRelay::new(&settings(), notifier).unwrap();

        // no keyword: denied, and remembered
        let body = json!({"content": "no keyword here"});
        assert!(relay.prepare(Channel::Main, Some("events"), &body, &caller()).is_err());
        assert!(sink.sent().is_empty());

        // exact repeat: denied as duplicate, which raises a notification
        assert!(matches!(
            relay.prepare(Channel::Main, Some("events"), &body, &caller()),
            Err(RelayError::Denied(_))
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            Notification::WebhookDenied { duplicate: true, has_keyword: false, .. }
        ));
    }

    #[test]
    fn test_target_and_content_validation() {
        let relay = relay();
        let body = json!({"content": "[TNIV] hi"});

        assert!(matches!(
            relay.prepare(Channel::Main, None, &body, &caller()),
            Err(RelayError::InvalidPayload(_))
        ));
        assert!(matches!(
            relay.prepare(Channel::Main, Some("nope"), &body, &caller()),
            Err(RelayError::UnknownTarget(t)) if t == "nope"
        ));

        let empty = json!({"username": "x", "embeds": [{"footer": {"text": "[TNIV]"}}, null]});
        // the footer embed survives cleaning, so this one is fine
        assert!(relay.prepare(Channel::Main, Some("events"), &empty, &caller()).is_ok());

        assert!(matches!(
            relay.prepare(Channel::Main, Some("events"), &json!([1, 2]), &caller()),
            Err(RelayError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_maps_channel_requires_signature() {
        let relay = relay();
        let unsigned = json!({"content": "[TNIV] new map"});
        assert!(relay.prepare(Channel::Maps, None, &unsigned, &caller()).is_err());

        let signed = json!({"embeds": [{"title": "Map", "footer": {"text": "The Vanguard Development Team"}}]});
        let (url, _) = relay.prepare(Channel::Maps, None, &signed, &caller()).unwrap();
        assert_eq!(url, "http://127.0.0.1:9/maps");

        // whitelisted ids don't apply on the maps channel
        let pinged = json!({"content": "<@111> The Vanguard Development Team"});
        assert!(relay.prepare(Channel::Maps, None, &pinged, &caller()).is_err());
    }

    #[actix_web::test]
    async fn test_relay_forwards_to_target() {
        use actix_web::{web, App, HttpResponse, HttpServer};

        let received: web::Data<Mutex<Vec<Value>>> = web::Data::new(Mutex::new(Vec::new()));
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let data = received.clone();
        let server = HttpServer::new(move || {
            App::new().app_data(data.clone()).route(
                "/hook",
                web::post().to(|body: web::Json<Value>, seen: web::Data<Mutex<Vec<Value>>>| async move {
                    seen.lock().push(body.into_inner());
                    HttpResponse::NoContent().finish()
                }),
            )
        })
        .workers(1)
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let mut settings = settings();
        settings
            .targets
            .insert("events".to_string(), format!("http://127.0.0.1:{}/hook", port));
        let relay = WebhookRelay::new(&settings, Notifier::disabled()).unwrap();

        let body = json!({"content": "[TNIV] match ended", "tts": false});
        relay.relay(Channel::Main, Some("events"), &body, &caller()).await.unwrap();

        let got = received.lock().clone();
        assert_eq!(got, vec![json!({"content": "[TNIV] match ended", "tts": false, "flags": 4096})]);

        // forwarding the same payload again is a duplicate
        assert!(matches!(
            relay.relay(Channel::Main, Some("events"), &body, &caller()).await,
            Err(RelayError::Denied(_))
        ));

        handle.stop(false).await;
    }
}
