//! OpenAPI 3.0 specification definition

use utoipa::OpenApi;

use crate::api::handlers::{
    admin_ui::{BanRequest, BansResponse, DeactivateRequest, KeySummary, LoginRequest},
    health::HealthResponse,
    internal::{
        CreateSessionRequest, DeleteSessionRequest, KeyRequest, MessageResponse,
        RateResetRequest, RateStatusResponse,
    },
    logs::LogsResponse,
};
use crate::audit::LogStats;
use crate::auth::Session;
use crate::bans::BanRecord;
use crate::error::ErrorBody;
use crate::matches::{PlayerReport, PlayerStats};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storcale Gateway API",
        version = "1.0.0",
        description = "Multi-tenant API gateway: key-based admission, rate limiting, IP bans, audit logging and game-community integrations",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "admin", description = "API-key authenticated administration"),
        (name = "admin-ui", description = "Cookie authenticated admin dashboard API"),
        (name = "tniv", description = "Match log, player stats and webhook relay")
    ),
    paths(
        crate::api::handlers::health::health_check,
        crate::api::handlers::internal::rate_status,
        crate::api::handlers::internal::rate_reset,
        crate::api::handlers::internal::deactivate,
        crate::api::handlers::internal::reload,
        crate::api::handlers::internal::create_session,
        crate::api::handlers::internal::delete_session,
        crate::api::handlers::logs::tail_logs,
        crate::api::handlers::logs::clear_logs,
        crate::api::handlers::admin_ui::login,
        crate::api::handlers::admin_ui::logs,
        crate::api::handlers::admin_ui::stats,
        crate::api::handlers::admin_ui::list_bans,
        crate::api::handlers::admin_ui::add_ban,
        crate::api::handlers::admin_ui::remove_ban,
        crate::api::handlers::admin_ui::list_keys,
        crate::api::handlers::admin_ui::deactivate_key,
        crate::api::handlers::matches::record_match,
        crate::api::handlers::matches::list_matches,
        crate::api::handlers::matches::player_stats,
        crate::api::handlers::webhooks::relay_webhook,
        crate::api::handlers::webhooks::relay_maps_webhook,
    ),
    components(
        schemas(
            ErrorBody,
            HealthResponse,
            // Admin schemas
            RateStatusResponse,
            RateResetRequest,
            KeyRequest,
            CreateSessionRequest,
            DeleteSessionRequest,
            MessageResponse,
            Session,
            LogsResponse,
            // Admin UI schemas
            LoginRequest,
            BanRequest,
            BanRecord,
            BansResponse,
            KeySummary,
            DeactivateRequest,
            LogStats,
            // Match schemas
            PlayerStats,
            PlayerReport,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_admin_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/admin/internal/rate-status"));
        assert!(doc.paths.paths.contains_key("/api/admin-ui/bans"));
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
