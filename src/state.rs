//! Application state shared across all handlers and middleware

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::audit::AccessLog;
use crate::auth::{CookieSigner, SessionStore};
use crate::bans::BanStore;
use crate::clock::Clock;
use crate::config::Settings;
use crate::matches::MatchLog;
use crate::notify::Notifier;
use crate::ratelimit::RateLimiter;
use crate::registry::{KeyRegistry, PermissionResolver};
use crate::relay::WebhookRelay;

pub struct AppState {
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<KeyRegistry>,
    pub permissions: PermissionResolver,
    pub sessions: SessionStore,
    pub limiter: RateLimiter,
    pub bans: BanStore,
    pub access_log: AccessLog,
    pub notifier: Notifier,
    pub matches: MatchLog,
    pub relay: WebhookRelay,
    pub cookies: CookieSigner,
    pub started_at: Instant,
    /// Set once the route table has been mounted
    pub routes_mounted: AtomicUsize,
}

impl AppState {
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        registry: Arc<KeyRegistry>,
        relay: WebhookRelay,
        notifier: Notifier,
    ) -> Self {
        Self {
            permissions: PermissionResolver::new(registry.clone()),
            sessions: SessionStore::new(clock.clone(), settings.sessions.default_ttl_secs),
            limiter: RateLimiter::new(clock.clone()),
            bans: BanStore::new(&settings.storage.bans),
            access_log: AccessLog::new(&settings.storage.access_log),
            matches: MatchLog::new(&settings.storage.match_log),
            cookies: CookieSigner::new(&settings.admin_ui.session_secret),
            started_at: Instant::now(),
            routes_mounted: AtomicUsize::new(0),
            settings,
            clock,
            registry,
            relay,
            notifier,
        }
    }

    /// Drop expired sessions and rate windows that have gone idle
    pub fn sweep(&self) -> (usize, usize) {
        let sessions = self.sessions.purge_expired();
        let windows = self.limiter.sweep_idle();
        if sessions > 0 || windows > 0 {
            debug!(sessions, windows, "Swept expired state");
        }
        (sessions, windows)
    }
}

/// Run [`AppState::sweep`] forever on a fixed interval
pub async fn run_sweeper(state: actix_web::web::Data<AppState>) {
    let period = Duration::from_secs(state.settings.sessions.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        state.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::RateLimits;

    #[tokio::test]
    async fn test_sweep_drops_expired_sessions_and_idle_windows() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("apikeys.json");
        std::fs::write(&keys, "{}").unwrap();

        let mut settings = Settings::default();
        settings.storage.api_keys = keys.clone();
        settings.storage.bans = dir.path().join("bans.json");

        let clock = Arc::new(ManualClock::at_epoch_secs(1_700_000_000));
        let registry = Arc::new(KeyRegistry::load(&keys).unwrap());
        let notifier = Notifier::disabled();
        let relay = WebhookRelay::new(&settings.webhooks, notifier.clone()).unwrap();
        let state = AppState::new(settings, clock.clone(), registry, relay, notifier);

        state.sessions.create("k1", Some(10));
        state.limiter.admit("ip:1.2.3.4", RateLimits::new(5, 3));
        assert_eq!(state.sweep(), (0, 0));

        clock.advance_secs(60);
        assert_eq!(state.sweep(), (1, 1));
        assert_eq!(state.sessions.len(), 0);
        assert_eq!(state.limiter.tracked(), 0);
    }
}
