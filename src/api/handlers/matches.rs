//! Match log and player stats (`/api/tniv/DB/...`)

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::Value;
use utoipa::IntoParams;

use crate::error::{ApiError, ErrorBody};
use crate::matches::{PlayerReport, StatsQuery};
use crate::state::AppState;

pub fn configure_match_log(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(record_match))
        .route("", web::get().to(list_matches));
}

pub fn configure_player_stats(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::get().to(player_stats));
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct MatchQuery {
    pub session_id: Option<String>,
}

/// POST /api/tniv/DB/match
#[utoipa::path(
    post,
    path = "/api/tniv/DB/match",
    tag = "tniv",
    responses(
        (status = 200, description = "Match stored"),
        (status = 400, description = "Invalid match data", body = ErrorBody)
    )
)]
pub async fn record_match(
    state: web::Data<AppState>,
    body: Option<web::Json<Value>>,
) -> Result<HttpResponse, ApiError> {
    let record = body
        .map(|b| b.into_inner())
        .ok_or_else(|| ApiError::BadRequest("Invalid match data".to_string()))?;

    state.matches.append(&record).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "body": "Logged!" })))
}

/// GET /api/tniv/DB/match?sessionId=
#[utoipa::path(
    get,
    path = "/api/tniv/DB/match",
    tag = "tniv",
    params(MatchQuery),
    responses((status = 200, description = "Stored matches, oldest first"))
)]
pub async fn list_matches(
    state: web::Data<AppState>,
    query: web::Query<MatchQuery>,
) -> Result<HttpResponse, ApiError> {
    let matches = state.matches.list(query.session_id.as_deref()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "body": matches })))
}

/// GET /api/tniv/DB/player/stats
#[utoipa::path(
    get,
    path = "/api/tniv/DB/player/stats",
    tag = "tniv",
    params(StatsQuery),
    responses(
        (status = 200, description = "Aggregated player stats", body = PlayerReport),
        (status = 400, description = "Missing userId", body = ErrorBody)
    )
)]
pub async fn player_stats(
    state: web::Data<AppState>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse, ApiError> {
    if query.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("userId required".to_string()));
    }
    let report = state.matches.player_stats(&query).await?;
    Ok(HttpResponse::Ok().json(report))
}
