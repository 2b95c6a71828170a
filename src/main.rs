//! Storcale Gateway
//!
//! Multi-tenant HTTP gateway for game-community integrations using Rust + Actix-Web.
//! Every route sits behind API-key admission, per-identity rate limiting and
//! an IP ban list, with an append-only access log of all API traffic.

use actix_web::{middleware, web, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

mod api;
mod audit;
mod auth;
mod bans;
mod clock;
mod config;
mod error;
mod fsutil;
mod matches;
mod notify;
mod ratelimit;
mod registry;
mod relay;
mod state;

use crate::clock::SystemClock;
use crate::config::Settings;
use crate::notify::Notifier;
use crate::registry::KeyRegistry;
use crate::relay::WebhookRelay;
use crate::state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storcale_gateway=info,actix_web=info".into()),
        )
        .json()
        .init();

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    let bind_addr = settings.bind_addr();

    if settings.admin_ui.uses_default_secret() {
        warn!("Admin UI login is enabled with the default session_secret; set admin_ui.session_secret");
    }

    info!(
        "Starting Storcale Gateway v{} on {}",
        env!("CARGO_PKG_VERSION"),
        bind_addr
    );

    // The registry must load; there is nothing to admit against without it
    let registry = Arc::new(
        KeyRegistry::load(&settings.storage.api_keys).context("Failed to load API key registry")?,
    );

    let notifier = Notifier::from_settings(&settings.notify)
        .context("Failed to initialize notifier")?;
    if !notifier.is_enabled() {
        info!("No notification topic configured, notifications disabled");
    }

    let relay = WebhookRelay::new(&settings.webhooks, notifier.clone())
        .context("Failed to initialize webhook relay")?;

    let workers = settings.server.workers.unwrap_or_else(|| num_cpus::get() * 2);

    // Create shared application state
    let app_state = web::Data::new(AppState::new(
        settings,
        Arc::new(SystemClock),
        registry,
        relay,
        notifier,
    ));

    actix_rt::spawn(state::run_sweeper(app_state.clone()));

    // Configure and start HTTP server
    HttpServer::new(move || {
        api::app(app_state.clone(), api::ROUTES)
            .wrap(TracingLogger::default())
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("X-Service", "storcale-gateway"))
                    .add(("X-Version", env!("CARGO_PKG_VERSION")))
            )
    })
    .workers(workers)
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await?;

    Ok(())
}
