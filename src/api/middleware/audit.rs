//! Access log middleware
//!
//! Records one line per `/api/` request once the response status is final.
//! Small JSON bodies are buffered so they can be logged, then handed back
//! to the handler untouched.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{CONTENT_LENGTH, CONTENT_TYPE},
    web::{self, BytesMut},
    Error, HttpMessage, HttpRequest,
};
use chrono::Utc;
use futures::future::{ok, LocalBoxFuture, Ready};
use futures::StreamExt;
use std::rc::Rc;

use super::identity::{client_ip, supplied_api_key, supplied_timestamp, Identity};
use crate::audit::{clip_body, LogLine};
use crate::state::AppState;

/// Bodies larger than this are not captured
pub const MAX_CAPTURED_BODY: usize = 64 * 1024;

pub struct AccessLogger {
    state: web::Data<AppState>,
}

impl AccessLogger {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self { state }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AccessLoggerService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AccessLoggerService {
            service: Rc::new(service),
            state: self.state.clone(),
        })
    }
}

pub struct AccessLoggerService<S> {
    service: Rc<S>,
    state: web::Data<AppState>,
}

/// Only API traffic is logged; the API docs are not
fn is_audited(path: &str) -> bool {
    path.starts_with("/api/") && !path.starts_with("/api-docs")
}

fn capturable(req: &ServiceRequest) -> bool {
    let is_json = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    let small = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .is_some_and(|len| len > 0 && len <= MAX_CAPTURED_BODY);
    is_json && small
}

/// Read the body and put it back so extractors still see it
async fn capture_body(req: &mut ServiceRequest) -> Result<Option<String>, Error> {
    let mut payload = req.take_payload();
    let mut buf = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        buf.extend_from_slice(&chunk?);
    }
    let bytes = buf.freeze();

    let (_, mut replay) = actix_http::h1::Payload::create(true);
    replay.unread_data(bytes.clone());
    req.set_payload(replay.into());

    let text = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
    };
    Ok(Some(clip_body(&text)))
}

/// Query string re-encoded from its parsed pairs
fn normalized_query(req: &HttpRequest) -> Option<String> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(req.query_string().as_bytes())
        .into_owned()
        .collect();
    if pairs.is_empty() {
        return None;
    }
    Some(
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish(),
    )
}

/// The parts of a log line known before the request is dispatched
struct PendingLine {
    method: String,
    url: String,
    api_key: Option<String>,
    timestamp: Option<String>,
    body: Option<String>,
    query: Option<String>,
    ip: String,
}

impl PendingLine {
    fn from_request(http: &HttpRequest, body: Option<String>) -> Self {
        Self {
            method: http.method().to_string(),
            url: http
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| http.path().to_string()),
            api_key: supplied_api_key(http),
            timestamp: supplied_timestamp(http),
            body,
            query: normalized_query(http),
            ip: client_ip(http),
        }
    }

    /// Same attribution as [`Identity::for_request`]
    fn fallback_identity(&self) -> Identity {
        match &self.api_key {
            Some(key) => Identity::Key(key.clone()),
            None => Identity::Ip(self.ip.clone()),
        }
    }

    fn finish(self, identity: &Identity, status: u16, rate_left: u32) -> LogLine {
        LogLine {
            at: Utc::now(),
            method: self.method,
            url: self.url,
            api_key: self.api_key.or_else(|| identity.api_key().map(str::to_string)),
            timestamp: self.timestamp,
            body: self.body,
            query: self.query,
            status,
            ip: self.ip,
            rate_left,
        }
    }
}

impl<S, B> Service<ServiceRequest> for AccessLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut core::task::Context<'_>) -> core::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let state = self.state.clone();

        Box::pin(async move {
            if !is_audited(req.path()) {
                return service.call(req).await;
            }

            let body = if capturable(&req) {
                capture_body(&mut req).await?
            } else {
                None
            };

            // Everything read from the request is taken now: the router needs
            // the request to be uniquely owned, so it must not be cloned here
            let pending = PendingLine::from_request(req.request(), body);
            let res = service.call(req).await?;

            // The admission layer leaves the resolved identity behind; requests
            // it never saw are attributed the same way it would have
            let identity = res
                .request()
                .extensions()
                .get::<Identity>()
                .cloned()
                .unwrap_or_else(|| pending.fallback_identity());
            let limits = state
                .registry
                .limits_for(identity.api_key(), state.settings.rate_limit.limits());
            let rate_left = state.limiter.status(&identity.to_string(), limits).remaining;

            let line = pending.finish(&identity, res.status().as_u16(), rate_left);
            state.access_log.record(&line).await;

            Ok(res)
        })
    }
}
