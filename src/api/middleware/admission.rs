//! Admission middleware
//!
//! Wraps every mounted route. For protected routes the order is: ban check,
//! identity resolution (admin session or API key), allow-list check for the
//! route and each protected ancestor, then rate limiting. Public routes only
//! get the ban check and rate limiting, and only when guarding is enabled.

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderMap, HeaderName, HeaderValue},
    web, Error, HttpMessage, ResponseError,
};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;
use tracing::{debug, info};

use super::identity::{client_ip, supplied_api_key, supplied_session_token, Identity};
use crate::error::ApiError;
use crate::notify::Notification;
use crate::ratelimit::RateDecision;
use crate::state::AppState;

/// Rate limit headers
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
pub const RETRY_AFTER: &str = "retry-after";

/// What a mounted route requires of its callers
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    /// Endpoint paths whose allow-lists must all accept the caller, ancestors
    /// first. Empty for public routes.
    pub permission_paths: Vec<String>,
}

impl AdmissionPolicy {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn protected(permission_paths: Vec<String>) -> Self {
        Self { permission_paths }
    }

    pub fn is_protected(&self) -> bool {
        !self.permission_paths.is_empty()
    }
}

/// Middleware factory enforcing an [`AdmissionPolicy`]
pub struct Admission {
    state: web::Data<AppState>,
    policy: Rc<AdmissionPolicy>,
}

impl Admission {
    pub fn new(state: web::Data<AppState>, policy: AdmissionPolicy) -> Self {
        Self {
            state,
            policy: Rc::new(policy),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Admission
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Transform = AdmissionService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AdmissionService {
            service: Rc::new(service),
            state: self.state.clone(),
            policy: self.policy.clone(),
        })
    }
}

pub struct AdmissionService<S> {
    service: Rc<S>,
    state: web::Data<AppState>,
    policy: Rc<AdmissionPolicy>,
}

fn reject<B>(req: ServiceRequest, err: ApiError) -> ServiceResponse<EitherBody<B, BoxBody>> {
    req.into_response(err.error_response()).map_into_right_body()
}

/// Resolve the caller of a protected route to an API key
fn resolve_key(req: &ServiceRequest, state: &AppState) -> Result<String, ApiError> {
    let http = req.request();
    let session = supplied_session_token(http);

    if let Some(key) = session.as_deref().and_then(|t| state.sessions.validate(t)) {
        return Ok(key);
    }
    if let Some(key) = supplied_api_key(http) {
        return Ok(key);
    }
    match session {
        Some(_) => Err(ApiError::Unauthenticated(
            "Session expired or invalid".to_string(),
        )),
        None => Err(ApiError::api_key_required()),
    }
}

fn set_rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_LIMIT),
        HeaderValue::from(decision.limits.max),
    );
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_REMAINING),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_RESET),
        HeaderValue::from(decision.reset_at),
    );
}

impl<S, B> Service<ServiceRequest> for AdmissionService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut core::task::Context<'_>) -> core::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let state = self.state.clone();
        let policy = self.policy.clone();

        Box::pin(async move {
            let protected = policy.is_protected();
            let guarded = protected || state.settings.rate_limit.guard_public_routes;

            if !guarded {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let ip = client_ip(req.request());

            // Bans are checked before anything else, including the limiter
            if state.bans.is_banned(&ip).await {
                info!(ip = %ip, path = %req.path(), "Rejected banned IP");
                return Ok(reject(req, ApiError::Banned));
            }

            let identity = if protected {
                let key = match resolve_key(&req, &state) {
                    Ok(key) => key,
                    Err(e) => return Ok(reject(req, e)),
                };

                req.extensions_mut().insert(Identity::Key(key.clone()));

                let index = state.permissions.index();
                if let Some(denied) = policy
                    .permission_paths
                    .iter()
                    .find(|p| !index.is_authorized(p, &key))
                {
                    debug!(endpoint = %denied, path = %req.path(), "API key not authorized");
                    return Ok(reject(req, ApiError::invalid_api_key()));
                }
                Identity::Key(key)
            } else {
                Identity::for_request(req.request())
            };

            let limits = state
                .registry
                .limits_for(identity.api_key(), state.settings.rate_limit.limits());
            let decision = state.limiter.admit(&identity.to_string(), limits);
            req.extensions_mut().insert(identity.clone());

            if let Some(excess) = decision.alert_excess() {
                state.notifier.dispatch(Notification::RateLimitExceeded {
                    identity: identity.to_string(),
                    ip: ip.clone(),
                    method: req.method().to_string(),
                    path: req.path().to_string(),
                    count: decision.current_count,
                    max: limits.max,
                    excess,
                });
            }

            if !decision.allowed {
                let retry_after = (decision.reset_at - state.clock.epoch_secs()).max(1);
                let mut res = reject(req, ApiError::RateLimited);
                let headers = res.headers_mut();
                set_rate_headers(headers, &decision);
                headers.insert(HeaderName::from_static(RETRY_AFTER), HeaderValue::from(retry_after));
                return Ok(res);
            }

            let mut res = service.call(req).await?.map_into_left_body();
            set_rate_headers(res.headers_mut(), &decision);
            Ok(res)
        })
    }
}
