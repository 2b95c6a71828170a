//! Admin internal endpoints (`/api/admin/internal`)
//!
//! Rate-limit inspection and reset, key deactivation, registry reload and
//! admin session issuance. Mounted behind the admission middleware, so the
//! caller's identity is always an API key here.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::middleware::{supplied_session_token, Identity};
use crate::auth::{Session, MAX_TTL_SECS};
use crate::error::{ApiError, ErrorBody};
use crate::registry::mask_key;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/rate-status", web::get().to(rate_status))
        .route("/rate-reset", web::post().to(rate_reset))
        .route("/deactivate", web::put().to(deactivate))
        .route("/reload", web::post().to(reload))
        .route("/session", web::post().to(create_session))
        .route("/session", web::delete().to(delete_session));
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateStatusResponse {
    pub identifier: String,
    pub count: u32,
    pub window_sec: u64,
    pub max: u32,
    pub rate_left: u32,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RateResetRequest {
    /// Identity to reset (`key:<apiKey>` or `ip:<address>`); defaults to the caller
    pub identifier: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct KeyRequest {
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeleteSessionRequest {
    pub token: Option<String>,
}

/// Message-only success body
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub body: String,
}

/// GET /api/admin/internal/rate-status
#[utoipa::path(
    get,
    path = "/api/admin/internal/rate-status",
    tag = "admin",
    responses(
        (status = 200, description = "Caller's current window", body = RateStatusResponse),
        (status = 401, description = "No identity", body = ErrorBody)
    )
)]
pub async fn rate_status(state: web::Data<AppState>, identity: Identity) -> HttpResponse {
    let limits = state
        .registry
        .limits_for(identity.api_key(), state.settings.rate_limit.limits());
    let status = state.limiter.status(&identity.to_string(), limits);

    HttpResponse::Ok().json(RateStatusResponse {
        identifier: identity.to_string(),
        count: status.count,
        window_sec: limits.window_secs,
        max: limits.max,
        rate_left: status.remaining,
    })
}

/// POST /api/admin/internal/rate-reset
#[utoipa::path(
    post,
    path = "/api/admin/internal/rate-reset",
    tag = "admin",
    request_body(content = RateResetRequest, description = "Optional identity to reset"),
    responses(
        (status = 200, description = "Window cleared"),
        (status = 400, description = "Malformed identifier", body = ErrorBody)
    )
)]
pub async fn rate_reset(
    state: web::Data<AppState>,
    identity: Identity,
    body: Option<web::Json<RateResetRequest>>,
) -> Result<HttpResponse, ApiError> {
    let identifier = match body.and_then(|b| b.into_inner().identifier).filter(|i| !i.is_empty()) {
        Some(raw) => Identity::parse(&raw)
            .ok_or_else(|| ApiError::BadRequest("Identifier must be key:<apiKey> or ip:<address>.".to_string()))?
            .to_string(),
        None => identity.to_string(),
    };

    let cleared = state.limiter.reset(&identifier);
    info!(identifier = %identifier, by = %identity, cleared, "Rate limit reset");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "body": "Rate limit reset.",
        "identifier": identifier,
        "cleared": cleared,
    })))
}

/// PUT /api/admin/internal/deactivate
#[utoipa::path(
    put,
    path = "/api/admin/internal/deactivate",
    tag = "admin",
    request_body = KeyRequest,
    responses(
        (status = 200, description = "Key deactivated", body = MessageResponse),
        (status = 400, description = "Missing key", body = ErrorBody),
        (status = 404, description = "Unknown key", body = ErrorBody)
    )
)]
pub async fn deactivate(
    state: web::Data<AppState>,
    identity: Identity,
    body: Option<web::Json<KeyRequest>>,
) -> Result<HttpResponse, ApiError> {
    let key = body
        .and_then(|b| b.into_inner().key)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing key.".to_string()))?;

    if !state.registry.deactivate(&key).await? {
        return Err(ApiError::NotFound("API key not found.".to_string()));
    }

    info!(key = %mask_key(&key), by = %identity, "API key deactivated");
    Ok(HttpResponse::Ok().json(MessageResponse {
        body: format!("API key {} deactivated.", mask_key(&key)),
    }))
}

/// POST /api/admin/internal/reload
#[utoipa::path(
    post,
    path = "/api/admin/internal/reload",
    tag = "admin",
    responses((status = 200, description = "Registry re-read", body = MessageResponse))
)]
pub async fn reload(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let entries = state.registry.reload().await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        body: format!("Reloaded {} API keys.", entries),
    }))
}

/// POST /api/admin/internal/session
#[utoipa::path(
    post,
    path = "/api/admin/internal/session",
    tag = "admin",
    request_body(content = CreateSessionRequest, description = "Optional TTL in seconds"),
    responses(
        (status = 200, description = "Session issued", body = Session),
        (status = 400, description = "TTL out of range", body = ErrorBody)
    )
)]
pub async fn create_session(
    state: web::Data<AppState>,
    identity: Identity,
    body: Option<web::Json<CreateSessionRequest>>,
) -> Result<HttpResponse, ApiError> {
    let key = identity.api_key().ok_or_else(ApiError::api_key_required)?;
    let ttl = body.and_then(|b| b.into_inner().ttl_seconds);
    if ttl.is_some_and(|t| t == 0 || t > MAX_TTL_SECS) {
        return Err(ApiError::BadRequest(format!(
            "ttlSeconds must be between 1 and {}.",
            MAX_TTL_SECS
        )));
    }

    let session = state.sessions.create(key, ttl);
    info!(key = %mask_key(key), expires_at = %session.expires_at, "Admin session created");
    Ok(HttpResponse::Ok().json(session))
}

/// DELETE /api/admin/internal/session
#[utoipa::path(
    delete,
    path = "/api/admin/internal/session",
    tag = "admin",
    responses(
        (status = 200, description = "Whether a session was removed"),
        (status = 400, description = "No token supplied", body = ErrorBody)
    )
)]
pub async fn delete_session(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: Option<web::Json<DeleteSessionRequest>>,
) -> Result<HttpResponse, ApiError> {
    let token = supplied_session_token(&req)
        .or_else(|| body.and_then(|b| b.into_inner().token))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Session token required.".to_string()))?;

    let deleted = state.sessions.delete(&token);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": deleted })))
}
