//! Discord webhook relay (`/api/tniv/webhooks`)

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::Value;

use crate::api::middleware::{client_ip, query_param, Identity};
use crate::error::{ApiError, ErrorBody};
use crate::relay::{Caller, Channel};
use crate::state::AppState;

pub fn configure_relay(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(relay_webhook));
}

pub fn configure_maps(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(relay_maps_webhook));
}

fn caller(req: &HttpRequest, identity: &Identity) -> Caller {
    Caller {
        api_key: identity.api_key().map(str::to_string),
        ip: client_ip(req),
    }
}

fn payload(body: Option<web::Json<Value>>) -> Result<Value, ApiError> {
    body.map(|b| b.into_inner())
        .ok_or_else(|| ApiError::BadRequest("Invalid webhook payload".to_string()))
}

/// POST /api/tniv/webhooks?target=
#[utoipa::path(
    post,
    path = "/api/tniv/webhooks",
    tag = "tniv",
    params(("target" = String, Query, description = "Configured target name")),
    responses(
        (status = 200, description = "Webhook forwarded"),
        (status = 400, description = "Invalid payload or target", body = ErrorBody),
        (status = 403, description = "Denied by moderation", body = ErrorBody),
        (status = 500, description = "Target unreachable", body = ErrorBody)
    )
)]
pub async fn relay_webhook(
    state: web::Data<AppState>,
    identity: Identity,
    req: HttpRequest,
    body: Option<web::Json<Value>>,
) -> Result<HttpResponse, ApiError> {
    let body = payload(body)?;
    let target = query_param(&req, "target");

    state
        .relay
        .relay(Channel::Main, target.as_deref(), &body, &caller(&req, &identity))
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "body": "Webhook forwarded." })))
}

/// POST /api/tniv/webhooks/maps
#[utoipa::path(
    post,
    path = "/api/tniv/webhooks/maps",
    tag = "tniv",
    responses(
        (status = 200, description = "Webhook forwarded"),
        (status = 403, description = "Denied by moderation", body = ErrorBody)
    )
)]
pub async fn relay_maps_webhook(
    state: web::Data<AppState>,
    identity: Identity,
    req: HttpRequest,
    body: Option<web::Json<Value>>,
) -> Result<HttpResponse, ApiError> {
    let body = payload(body)?;

    state
        .relay
        .relay(Channel::Maps, None, &body, &caller(&req, &identity))
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "body": "Webhook forwarded." })))
}
