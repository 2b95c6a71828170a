//! Admin UI API (`/api/admin-ui`)
//!
//! Authenticated with a signed cookie issued by `login` rather than an API
//! key, so this scope sits outside the key permission pipeline.

use actix_web::{
    dev::Payload, http::header::SET_COOKIE, web, FromRequest, HttpRequest, HttpResponse,
};
use futures::future::{ready, Ready};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::logs::{tail_len, LogsResponse};
use crate::api::middleware::query_param;
use crate::audit::LogStats;
use crate::auth::{clear_cookie_header, session_cookie_header, COOKIE_NAME};
use crate::bans::BanList;
use crate::error::{ApiError, ErrorBody};
use crate::registry::mask_key;
use crate::state::AppState;

const DEFAULT_UI_TAIL: usize = 500;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/login", web::post().to(login))
        .route("/logout", web::post().to(logout))
        .route("/logs", web::get().to(logs))
        .route("/stats", web::get().to(stats))
        .route("/bans", web::get().to(list_bans))
        .route("/bans", web::post().to(add_ban))
        .route("/bans", web::delete().to(remove_ban))
        .route("/keys", web::get().to(list_keys))
        .route("/keys/deactivate", web::put().to(deactivate_key))
        .route("/reload", web::post().to(reload));
}

/// Signed-in admin UI user
#[derive(Debug, Clone)]
pub struct AdminUser(pub String);

impl FromRequest for AdminUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req.app_data::<web::Data<AppState>>().and_then(|state| {
            let cookie = req.cookie(COOKIE_NAME)?;
            state
                .cookies
                .verify(cookie.value(), state.clock.now().timestamp_millis())
        });

        ready(
            user.map(AdminUser)
                .ok_or_else(|| ApiError::Unauthenticated("Not authenticated".to_string())),
        )
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct BanRequest {
    pub ip: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BansResponse {
    pub ok: bool,
    pub bans: BanList,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KeySummary {
    pub name: String,
    pub id: String,
    pub masked: String,
    pub valid: bool,
    #[schema(value_type = Object)]
    pub meta: Value,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeactivateRequest {
    pub key: Option<String>,
}

fn ok_body() -> Value {
    serde_json::json!({ "ok": true })
}

fn credentials_match(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// POST /api/admin-ui/login
#[utoipa::path(
    post,
    path = "/api/admin-ui/login",
    tag = "admin-ui",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session cookie set"),
        (status = 400, description = "Missing credentials", body = ErrorBody),
        (status = 403, description = "Wrong credentials", body = ErrorBody)
    )
)]
pub async fn login(
    state: web::Data<AppState>,
    body: Option<web::Json<LoginRequest>>,
) -> Result<HttpResponse, ApiError> {
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    let (Some(username), Some(password)) = (
        body.username.filter(|u| !u.is_empty()),
        body.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("username/password required".to_string()));
    };

    let settings = &state.settings.admin_ui;
    let accepted = match (&settings.username, &settings.password) {
        (Some(user), Some(pass)) => {
            // evaluate both so timing doesn't reveal which one matched
            let user_ok = credentials_match(&username, user);
            let pass_ok = credentials_match(&password, pass);
            user_ok && pass_ok
        }
        _ => false,
    };
    if !accepted {
        warn!(username = %username, "Admin UI login rejected");
        return Err(ApiError::Unauthorized("Invalid creds".to_string()));
    }

    let expires_at_ms =
        state.clock.now().timestamp_millis() + (settings.cookie_ttl_secs as i64) * 1000;
    let cookie = state.cookies.sign(&username, expires_at_ms);
    info!(username = %username, "Admin UI login");

    Ok(HttpResponse::Ok()
        .insert_header((SET_COOKIE, session_cookie_header(&cookie)))
        .json(ok_body()))
}

/// POST /api/admin-ui/logout
pub async fn logout() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((SET_COOKIE, clear_cookie_header()))
        .json(ok_body())
}

/// GET /api/admin-ui/logs?n=
#[utoipa::path(
    get,
    path = "/api/admin-ui/logs",
    tag = "admin-ui",
    params(("n" = Option<i64>, Query, description = "Lines to return (default 500)")),
    responses(
        (status = 200, description = "Last N access log lines", body = LogsResponse),
        (status = 401, description = "Not signed in", body = ErrorBody)
    )
)]
pub async fn logs(
    state: web::Data<AppState>,
    _user: AdminUser,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let n = tail_len(query_param(&req, "n").as_deref(), DEFAULT_UI_TAIL);
    let logs = state.access_log.tail(n).await?;
    Ok(HttpResponse::Ok().json(LogsResponse { logs }))
}

/// GET /api/admin-ui/stats
#[utoipa::path(
    get,
    path = "/api/admin-ui/stats",
    tag = "admin-ui",
    responses((status = 200, description = "Request totals", body = LogStats))
)]
pub async fn stats(state: web::Data<AppState>, _user: AdminUser) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.access_log.stats().await?))
}

/// GET /api/admin-ui/bans
#[utoipa::path(
    get,
    path = "/api/admin-ui/bans",
    tag = "admin-ui",
    responses((status = 200, description = "Banned addresses"))
)]
pub async fn list_bans(state: web::Data<AppState>, _user: AdminUser) -> Result<HttpResponse, ApiError> {
    let bans = state.bans.list().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "bans": bans })))
}

/// POST /api/admin-ui/bans
#[utoipa::path(
    post,
    path = "/api/admin-ui/bans",
    tag = "admin-ui",
    request_body = BanRequest,
    responses(
        (status = 200, description = "Ban recorded", body = BansResponse),
        (status = 400, description = "Missing ip", body = ErrorBody)
    )
)]
pub async fn add_ban(
    state: web::Data<AppState>,
    user: AdminUser,
    body: Option<web::Json<BanRequest>>,
) -> Result<HttpResponse, ApiError> {
    let body = body.map(|b| b.into_inner()).unwrap_or_default();
    let ip = body
        .ip
        .filter(|ip| !ip.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("ip required".to_string()))?;
    let reason = body
        .reason
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "admin".to_string());

    state.bans.ban(ip.trim(), &reason, &user.0).await?;
    let bans = state.bans.list().await?;
    Ok(HttpResponse::Ok().json(BansResponse { ok: true, bans }))
}

/// DELETE /api/admin-ui/bans?ip=
#[utoipa::path(
    delete,
    path = "/api/admin-ui/bans",
    tag = "admin-ui",
    params(("ip" = Option<String>, Query, description = "Address to unban")),
    responses(
        (status = 200, description = "Ban lifted", body = BansResponse),
        (status = 404, description = "Address was not banned", body = ErrorBody)
    )
)]
pub async fn remove_ban(
    state: web::Data<AppState>,
    _user: AdminUser,
    req: HttpRequest,
    body: Option<web::Json<BanRequest>>,
) -> Result<HttpResponse, ApiError> {
    let ip = query_param(&req, "ip")
        .or_else(|| body.and_then(|b| b.into_inner().ip))
        .filter(|ip| !ip.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("ip required".to_string()))?;

    if !state.bans.unban(ip.trim()).await? {
        return Err(ApiError::NotFound("not found".to_string()));
    }
    let bans = state.bans.list().await?;
    Ok(HttpResponse::Ok().json(BansResponse { ok: true, bans }))
}

/// GET /api/admin-ui/keys
#[utoipa::path(
    get,
    path = "/api/admin-ui/keys",
    tag = "admin-ui",
    responses((status = 200, description = "Registered keys, masked"))
)]
pub async fn list_keys(state: web::Data<AppState>, _user: AdminUser) -> HttpResponse {
    let snapshot = state.registry.snapshot();
    let keys: Vec<KeySummary> = snapshot
        .entries
        .iter()
        .map(|e| KeySummary {
            name: e.category.clone(),
            id: e.category.clone(),
            masked: mask_key(&e.key),
            valid: e.valid,
            meta: if e.meta.is_null() {
                serde_json::json!({})
            } else {
                e.meta.clone()
            },
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({ "keys": keys }))
}

/// PUT /api/admin-ui/keys/deactivate
#[utoipa::path(
    put,
    path = "/api/admin-ui/keys/deactivate",
    tag = "admin-ui",
    request_body = DeactivateRequest,
    responses(
        (status = 200, description = "Key deactivated"),
        (status = 400, description = "Missing key", body = ErrorBody),
        (status = 404, description = "Unknown key", body = ErrorBody)
    )
)]
pub async fn deactivate_key(
    state: web::Data<AppState>,
    user: AdminUser,
    req: HttpRequest,
    body: Option<web::Json<DeactivateRequest>>,
) -> Result<HttpResponse, ApiError> {
    let key = body
        .and_then(|b| b.into_inner().key)
        .or_else(|| query_param(&req, "key"))
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::BadRequest("key required".to_string()))?;

    if !state.registry.deactivate(&key).await? {
        return Err(ApiError::NotFound("API key not found".to_string()));
    }
    info!(key = %mask_key(&key), by = %user.0, "API key deactivated from admin UI");
    Ok(HttpResponse::Ok().json(ok_body()))
}

/// POST /api/admin-ui/reload
pub async fn reload(state: web::Data<AppState>, _user: AdminUser) -> Result<HttpResponse, ApiError> {
    let entries = state.registry.reload().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "output": format!("Reloaded {} API keys", entries),
    })))
}
