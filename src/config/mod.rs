//! Configuration module for the gateway

use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::ratelimit::RateLimits;

/// Main application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub rate_limit: RateLimitSettings,
    pub sessions: SessionSettings,
    pub notify: NotifySettings,
    pub admin_ui: AdminUiSettings,
    pub webhooks: WebhookSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Locations of the file-backed stores
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub api_keys: PathBuf,
    pub bans: PathBuf,
    pub access_log: PathBuf,
    pub match_log: PathBuf,
}

/// Global sliding-window defaults, applied to anonymous callers and to keys
/// without an override in the registry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub window_secs: u64,
    pub max: u32,
    /// Apply ban checks and rate limiting to public routes as well
    pub guard_public_routes: bool,
}

impl RateLimitSettings {
    pub fn limits(&self) -> RateLimits {
        RateLimits::new(self.window_secs, self.max)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub default_ttl_secs: u64,
    /// Interval of the background sweep for expired sessions and idle rate windows
    pub sweep_interval_secs: u64,
}

/// Push notification (ntfy-compatible) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub url: String,
    /// Notifications are disabled when no topic is set
    pub topic: Option<String>,
    pub timeout_ms: u64,
}

/// Cookie signing secret shipped in the default configuration
pub const DEFAULT_SESSION_SECRET: &str = "change_this_secret";

/// Credentials and signing secret for the admin UI cookie session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminUiSettings {
    pub username: Option<String>,
    pub password: Option<String>,
    pub session_secret: String,
    pub cookie_ttl_secs: u64,
}

/// Discord webhook relay configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Target name -> webhook URL
    pub targets: HashMap<String, String>,
    /// At least one keyword must appear in the content or an embed footer
    pub keywords: Vec<String>,
    /// User/role ids that may be pinged
    pub whitelisted_ids: Vec<String>,
    /// Signature required on payloads relayed to the `maps` target
    pub maps_signature: String,
    pub timeout_ms: u64,
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables (prefixed with STORCALE__)
    /// 2. config/local.toml (gitignored)
    /// 3. config/default.toml
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // STORCALE__RATE_LIMIT__MAX, STORCALE__SERVER__PORT, ...
            .add_source(
                Environment::with_prefix("STORCALE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            );

        builder.build()?.try_deserialize()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: ServerSettings::default(),
            storage: StorageSettings::default(),
            rate_limit: RateLimitSettings::default(),
            sessions: SessionSettings::default(),
            notify: NotifySettings::default(),
            admin_ui: AdminUiSettings::default(),
            webhooks: WebhookSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".to_string(),
            port: 9902,
            workers: None,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            api_keys: PathBuf::from("envs/apikeys.env.json"),
            bans: PathBuf::from("envs/banned_ips.json"),
            access_log: PathBuf::from("access.log"),
            match_log: PathBuf::from("data/matches.log"),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            window_secs: 60,
            max: 60,
            guard_public_routes: true,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            default_ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for NotifySettings {
    fn default() -> Self {
        NotifySettings {
            url: "https://ntfy.sh".to_string(),
            topic: None,
            timeout_ms: 5_000,
        }
    }
}

impl AdminUiSettings {
    /// Login is enabled but cookies are still signed with the shipped secret
    pub fn uses_default_secret(&self) -> bool {
        self.username.is_some()
            && self.password.is_some()
            && self.session_secret == DEFAULT_SESSION_SECRET
    }
}

impl Default for AdminUiSettings {
    fn default() -> Self {
        AdminUiSettings {
            username: None,
            password: None,
            session_secret: DEFAULT_SESSION_SECRET.to_string(),
            cookie_ttl_secs: 3600,
        }
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        WebhookSettings {
            targets: HashMap::new(),
            keywords: Vec::new(),
            whitelisted_ids: Vec::new(),
            maps_signature: "The Vanguard Development Team".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let settings = Settings::default();
        let limits = settings.rate_limit.limits();
        assert_eq!(limits.window_secs, 60);
        assert_eq!(limits.max, 60);
        assert_eq!(settings.bind_addr(), "0.0.0.0:9902");
    }

    #[test]
    fn test_partial_section_deserializes() {
        let settings: Settings = Config::builder()
            .add_source(config::File::from_str(
                "[rate_limit]\nwindow_secs = 10\nmax = 2\nguard_public_routes = false\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.rate_limit.max, 2);
        assert!(!settings.rate_limit.guard_public_routes);
        // untouched sections fall back to defaults
        assert_eq!(settings.server.port, 9902);
    }

    #[test]
    fn test_default_secret_flagged_only_with_login_enabled() {
        let mut admin = AdminUiSettings::default();
        assert!(!admin.uses_default_secret());

        admin.username = Some("admin".to_string());
        admin.password = Some("hunter2".to_string());
        assert!(admin.uses_default_secret());

        admin.session_secret = "rotated".to_string();
        assert!(!admin.uses_default_secret());
    }
}
