//! Canonical API key entry and the normalization of registry documents.
//!
//! The registry file has grown several spellings for the same fields over
//! time (`key`/`apiKey`, `perm`/`permissions`, nested or flat rate limit
//! fields, windows in seconds or milliseconds). Everything is folded into
//! [`ApiKeyEntry`] here, once, at load time.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::RegistryError;
use crate::ratelimit::{RateLimits, MAX_WINDOW_SECS};

/// Permission token granting every protected endpoint
pub const WILDCARD_PERMISSION: &str = "all";

/// Top-level members of the registry document that are not key entries
pub const PUBLIC_DIRS_MEMBER: &str = "publicDirs";
pub const PERMS_MEMBER: &str = "perms";

const KNOWN_FIELDS: &[&str] = &[
    "key",
    "apiKey",
    "perm",
    "permissions",
    "valid",
    "meta",
    "name",
    "description",
    "rateLimit",
    "rateLimitWindowSec",
    "rateLimitMax",
    "rateWindow",
    "rateMax",
    "rate_window",
    "rate_max",
    "window",
    "max",
];

/// Window values at or above this are taken to be milliseconds
const MILLIS_THRESHOLD: f64 = 1000.0;

/// Per-key override of the global rate limit. Missing halves fall back to
/// the global default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RateLimitOverride {
    pub window_secs: Option<u64>,
    pub max: Option<u32>,
}

impl RateLimitOverride {
    pub fn resolve(&self, default: RateLimits) -> RateLimits {
        RateLimits::new(
            self.window_secs.unwrap_or(default.window_secs),
            self.max.unwrap_or(default.max),
        )
    }

    fn is_empty(&self) -> bool {
        self.window_secs.is_none() && self.max.is_none()
    }
}

/// One registered API key category
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeyEntry {
    pub category: String,
    pub key: String,
    pub valid: bool,
    /// Endpoint paths (relative to `/api`) or the wildcard `all`
    pub permissions: Vec<String>,
    pub rate_limit: Option<RateLimitOverride>,
    pub meta: Value,
}

impl ApiKeyEntry {
    pub fn grants_all(&self) -> bool {
        self.permissions.iter().any(|p| p == WILDCARD_PERMISSION)
    }

    /// Normalize one category of the registry document
    pub fn from_json(category: &str, raw: &Value) -> Result<Self, RegistryError> {
        let obj = raw.as_object().ok_or_else(|| RegistryError::InvalidEntry {
            category: category.to_string(),
            reason: "entry is not an object".to_string(),
        })?;

        let key = first_field(obj, &["key", "apiKey"])
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RegistryError::InvalidEntry {
                category: category.to_string(),
                reason: "missing key".to_string(),
            })?
            .to_string();

        let valid = match obj.get("valid") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(RegistryError::InvalidEntry {
                    category: category.to_string(),
                    reason: format!("`valid` must be a boolean, got {}", other),
                })
            }
        };

        let permissions = parse_permissions(category, first_field(obj, &["perm", "permissions"]))?;
        let rate_limit = parse_rate_limit(obj);

        let unknown: Vec<&str> = obj
            .keys()
            .map(String::as_str)
            .filter(|k| !KNOWN_FIELDS.contains(k))
            .collect();
        if !unknown.is_empty() {
            warn!(category = %category, fields = ?unknown, "Unrecognized fields in API key entry");
        }

        Ok(ApiKeyEntry {
            category: category.to_string(),
            key,
            valid,
            permissions,
            rate_limit,
            meta: obj.get("meta").cloned().unwrap_or_else(|| Value::Object(Map::new())),
        })
    }
}

fn first_field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n).filter(|v| !v.is_null()))
}

fn parse_permissions(category: &str, raw: Option<&Value>) -> Result<Vec<String>, RegistryError> {
    let tokens: Vec<String> = match raw {
        None => Vec::new(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| RegistryError::InvalidEntry {
                        category: category.to_string(),
                        reason: "permission list must contain strings".to_string(),
                    })
            })
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(RegistryError::InvalidEntry {
                category: category.to_string(),
                reason: format!("unsupported permission value {}", other),
            })
        }
    };

    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !token.is_empty() && !out.contains(&token) {
            out.push(token);
        }
    }
    Ok(out)
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Seconds from a window value that may be expressed in milliseconds
fn window_from_ambiguous(v: f64) -> f64 {
    if v >= MILLIS_THRESHOLD {
        (v / 1000.0).floor()
    } else {
        v
    }
}

fn positive_u64(v: f64) -> Option<u64> {
    (v.is_finite() && v >= 1.0).then(|| v as u64)
}

fn parse_rate_limit(obj: &Map<String, Value>) -> Option<RateLimitOverride> {
    let nested = obj.get("rateLimit").and_then(Value::as_object);

    let nested_window = nested.and_then(|rl| {
        if let Some(ms) = rl.get("windowMs").and_then(as_number) {
            return Some((ms / 1000.0).floor());
        }
        if let Some(secs) = rl.get("windowSec").and_then(as_number) {
            return Some(secs);
        }
        rl.get("window").and_then(as_number).map(window_from_ambiguous)
    });
    let flat_window = || {
        ["rateLimitWindowSec", "rateWindow", "window", "rate_window"]
            .iter()
            .find_map(|f| obj.get(*f).and_then(as_number))
            .map(window_from_ambiguous)
    };

    let nested_max = nested.and_then(|rl| {
        ["limit", "max"].iter().find_map(|f| rl.get(*f).and_then(as_number))
    });
    let flat_max = || {
        ["rateLimitMax", "rateMax", "max", "rate_max"]
            .iter()
            .find_map(|f| obj.get(*f).and_then(as_number))
    };

    let over = RateLimitOverride {
        window_secs: nested_window
            .or_else(flat_window)
            .and_then(positive_u64)
            .map(|w| w.min(MAX_WINDOW_SECS)),
        max: nested_max
            .or_else(flat_max)
            .and_then(positive_u64)
            .map(|m| m.min(u32::MAX as u64) as u32),
    };

    (!over.is_empty()).then_some(over)
}

/// Mask a secret for display: `abcd...wxyz`, or all `*` when 8 chars or fewer
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comma_separated_permissions() {
        let entry = ApiKeyEntry::from_json(
            "tniv",
            &json!({ "key": "K1", "perm": "events, tniv/DB/match ,,events" }),
        )
        .unwrap();

        assert_eq!(entry.permissions, vec!["events", "tniv/DB/match"]);
        assert!(entry.valid);
        assert!(entry.rate_limit.is_none());
    }

    #[test]
    fn test_aliases_and_array_permissions() {
        let entry = ApiKeyEntry::from_json(
            "bot",
            &json!({ "apiKey": "K2", "permissions": ["all"], "valid": false }),
        )
        .unwrap();

        assert_eq!(entry.key, "K2");
        assert!(entry.grants_all());
        assert!(!entry.valid);
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let err = ApiKeyEntry::from_json("broken", &json!({ "perm": "all" })).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidEntry { .. }));

        let err = ApiKeyEntry::from_json("broken", &json!("just-a-string")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidEntry { .. }));
    }

    #[test]
    fn test_rate_limit_shapes() {
        let nested_ms = ApiKeyEntry::from_json(
            "a",
            &json!({ "key": "A", "rateLimit": { "windowMs": 120000, "limit": 30 } }),
        )
        .unwrap();
        assert_eq!(
            nested_ms.rate_limit,
            Some(RateLimitOverride { window_secs: Some(120), max: Some(30) })
        );

        let flat = ApiKeyEntry::from_json(
            "b",
            &json!({ "key": "B", "rateLimitWindowSec": 10, "rateLimitMax": "5" }),
        )
        .unwrap();
        assert_eq!(
            flat.rate_limit,
            Some(RateLimitOverride { window_secs: Some(10), max: Some(5) })
        );

        let ambiguous = ApiKeyEntry::from_json(
            "c",
            &json!({ "key": "C", "rateLimit": { "window": 5000 } }),
        )
        .unwrap();
        let resolved = ambiguous.rate_limit.unwrap().resolve(RateLimits::new(60, 60));
        assert_eq!(resolved, RateLimits::new(5, 60));
    }

    #[test]
    fn test_huge_window_is_capped_at_load() {
        let entry = ApiKeyEntry::from_json(
            "d",
            &json!({ "key": "D", "rateLimit": { "windowSec": 1.0e30, "max": 3 } }),
        )
        .unwrap();
        assert_eq!(
            entry.rate_limit,
            Some(RateLimitOverride { window_secs: Some(MAX_WINDOW_SECS), max: Some(3) })
        );
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("abcdefghijkl"), "abcd...ijkl");
        assert_eq!(mask_key("short"), "*****");
        assert_eq!(mask_key("12345678"), "********");
    }
}
