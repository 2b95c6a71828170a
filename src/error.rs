//! HTTP-facing error taxonomy
//!
//! Every rejection leaves the gateway as `{"error": "<message>"}` with the
//! status mapped below. Internal failures carry a message only.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::audit::AuditError;
use crate::bans::BanStoreError;
use crate::matches::MatchLogError;
use crate::registry::RegistryError;
use crate::relay::RelayError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No identity supplied
    #[error("{0}")]
    Unauthenticated(String),

    /// Identity supplied but not permitted for the resource
    #[error("{0}")]
    Unauthorized(String),

    #[error("Your IP is banned.")]
    Banned,

    #[error("Rate limit exceeded.")]
    RateLimited,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn api_key_required() -> Self {
        ApiError::Unauthenticated("API key required".to_string())
    }

    pub fn invalid_api_key() -> Self {
        ApiError::Unauthorized("Invalid API key".to_string())
    }

    pub fn route_not_found() -> Self {
        ApiError::NotFound("Sorry, can't find that".to_string())
    }
}

/// JSON body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Unauthorized(_) | ApiError::Banned => StatusCode::FORBIDDEN,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

// Store failures are logged in full here; callers only see a short message

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        error!(error = %err, "Key registry operation failed");
        ApiError::Internal("Failed to update API key registry".to_string())
    }
}

impl From<BanStoreError> for ApiError {
    fn from(err: BanStoreError) -> Self {
        error!(error = %err, "Ban list operation failed");
        ApiError::Internal("Failed to access ban list".to_string())
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        error!(error = %err, "Access log operation failed");
        ApiError::Internal(err.to_string())
    }
}

impl From<MatchLogError> for ApiError {
    fn from(err: MatchLogError) -> Self {
        match err {
            MatchLogError::MissingSessionId => ApiError::BadRequest(err.to_string()),
            MatchLogError::Io(ref e) => {
                error!(error = %e, "Match log operation failed");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidPayload(msg) => ApiError::BadRequest(msg),
            RelayError::UnknownTarget(_) => ApiError::BadRequest(err.to_string()),
            RelayError::Denied(msg) => ApiError::Unauthorized(msg),
            RelayError::Upstream(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::api_key_required().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::invalid_api_key().status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Banned.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::route_not_found().status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_collaborator_errors_map_to_statuses() {
        let denied: ApiError = RelayError::Denied("Webhook denied.".into()).into();
        assert_eq!(denied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(denied.to_string(), "Webhook denied.");

        let target: ApiError = RelayError::UnknownTarget("x".into()).into();
        assert_eq!(target.status_code(), StatusCode::BAD_REQUEST);

        let upstream: ApiError = RelayError::Upstream("timed out".into()).into();
        assert_eq!(upstream.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(upstream.to_string().contains("timed out"));

        let invalid: ApiError = MatchLogError::MissingSessionId.into();
        assert_eq!(invalid.to_string(), "Invalid match data");

        // file locations stay out of responses
        let io: ApiError = RegistryError::Io {
            path: "/srv/secret/apikeys.json".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
        .into();
        assert!(!io.to_string().contains("/srv/secret"));
    }

    #[actix_web::test]
    async fn test_error_body_shape() {
        let body = to_bytes(ApiError::RateLimited.error_response().into_body())
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"error":"Rate limit exceeded."}"#);
    }
}
