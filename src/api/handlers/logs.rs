//! Access log tail (`/api/admin/logs`)

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::api::middleware::{query_param, Identity};
use crate::audit::{DEFAULT_TAIL, MAX_TAIL};
use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::get().to(tail_logs))
        .route("", web::delete().to(clear_logs));
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogsResponse {
    /// Oldest first
    pub logs: Vec<String>,
}

/// Requested line count: missing, unparseable or zero means `default`,
/// anything else is clamped to 1..=1000
pub fn tail_len(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|n| *n != 0)
        .unwrap_or(default as i64)
        .clamp(1, MAX_TAIL as i64) as usize
}

/// GET /api/admin/logs?n=
#[utoipa::path(
    get,
    path = "/api/admin/logs",
    tag = "admin",
    params(("n" = Option<i64>, Query, description = "Lines to return (1-1000, default 100)")),
    responses(
        (status = 200, description = "Last N access log lines", body = LogsResponse),
        (status = 500, description = "Log unreadable", body = ErrorBody)
    )
)]
pub async fn tail_logs(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, ApiError> {
    let n = tail_len(query_param(&req, "n").as_deref(), DEFAULT_TAIL);
    let logs = state.access_log.tail(n).await?;
    Ok(HttpResponse::Ok().json(LogsResponse { logs }))
}

/// DELETE /api/admin/logs
#[utoipa::path(
    delete,
    path = "/api/admin/logs",
    tag = "admin",
    responses((status = 200, description = "Access log truncated"))
)]
pub async fn clear_logs(state: web::Data<AppState>, identity: Identity) -> Result<HttpResponse, ApiError> {
    state.access_log.clear().await?;
    info!(by = %identity, "Access log cleared");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Log file cleared successfully"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_len() {
        assert_eq!(tail_len(None, 100), 100);
        assert_eq!(tail_len(Some("abc"), 100), 100);
        assert_eq!(tail_len(Some("0"), 100), 100);
        assert_eq!(tail_len(Some("-4"), 100), 1);
        assert_eq!(tail_len(Some("25"), 100), 25);
        assert_eq!(tail_len(Some("5000"), 100), 1000);
        assert_eq!(tail_len(None, 500), 500);
    }
}
