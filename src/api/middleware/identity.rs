//! Caller identity: who a request is counted and logged as

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};
use std::fmt;
use std::net::IpAddr;

use crate::error::ApiError;

/// Header and query parameter carrying the API key
pub const API_KEY_HEADER: &str = "api-key";
pub const SESSION_HEADER: &str = "x-admin-session";
pub const SESSION_QUERY: &str = "admin-session";
/// Client-supplied request timestamp, echoed into the access log
pub const TIMESTAMP_HEADER: &str = "timestamp";

/// Rate-limit and audit key for a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Key(String),
    Ip(String),
}

impl Identity {
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Identity::Key(key) => Some(key),
            Identity::Ip(_) => None,
        }
    }

    /// Key when one was supplied, otherwise the client address
    pub fn for_request(req: &HttpRequest) -> Self {
        match supplied_api_key(req) {
            Some(key) => Identity::Key(key),
            None => Identity::Ip(client_ip(req)),
        }
    }

    /// Parse the `key:`/`ip:` form used by the admin endpoints
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(key) = raw.strip_prefix("key:") {
            return (!key.is_empty()).then(|| Identity::Key(key.to_string()));
        }
        if let Some(ip) = raw.strip_prefix("ip:") {
            return (!ip.is_empty()).then(|| Identity::Ip(ip.to_string()));
        }
        None
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Key(key) => write!(f, "key:{}", key),
            Identity::Ip(ip) => write!(f, "ip:{}", ip),
        }
    }
}

/// Handlers behind the admission middleware can take the resolved identity
impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    /// The identity admission resolved, or the one it would have used on
    /// an unguarded route
    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let resolved = req.extensions().get::<Identity>().cloned();
        ready(Ok(resolved.unwrap_or_else(|| Identity::for_request(req))))
    }
}

/// First value of a query parameter
pub fn query_param(req: &HttpRequest, name: &str) -> Option<String> {
    url::form_urlencoded::parse(req.query_string().as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn header_str(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// API key from the `api-key` header, falling back to the query parameter
pub fn supplied_api_key(req: &HttpRequest) -> Option<String> {
    header_str(req, API_KEY_HEADER)
        .or_else(|| query_param(req, API_KEY_HEADER).filter(|k| !k.is_empty()))
}

/// Admin session token from the header or query parameter
pub fn supplied_session_token(req: &HttpRequest) -> Option<String> {
    header_str(req, SESSION_HEADER)
        .or_else(|| query_param(req, SESSION_QUERY).filter(|t| !t.is_empty()))
}

pub fn supplied_timestamp(req: &HttpRequest) -> Option<String> {
    header_str(req, TIMESTAMP_HEADER)
}

/// Extract client IP address from request
pub fn client_ip(req: &HttpRequest) -> String {
    // Try X-Forwarded-For first (for proxied requests)
    if let Some(forwarded) = header_str(req, "x-forwarded-for") {
        // X-Forwarded-For may contain multiple IPs, take the first (client)
        if let Some(ip) = forwarded
            .split(',')
            .next()
            .and_then(|first| first.trim().parse::<IpAddr>().ok())
        {
            return ip.to_string();
        }
    }

    // Try X-Real-IP
    if let Some(ip) = header_str(req, "x-real-ip").and_then(|v| v.parse::<IpAddr>().ok()) {
        return ip.to_string();
    }

    // Fall back to connection info
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_client_ip_precedence() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "1.2.3.4, 10.0.0.1"))
            .insert_header(("X-Real-IP", "5.6.7.8"))
            .to_http_request();
        assert_eq!(client_ip(&req), "1.2.3.4");

        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "garbage"))
            .insert_header(("X-Real-IP", "5.6.7.8"))
            .to_http_request();
        assert_eq!(client_ip(&req), "5.6.7.8");

        let req = TestRequest::default()
            .peer_addr("9.9.9.9:4000".parse().unwrap())
            .to_http_request();
        assert_eq!(client_ip(&req), "9.9.9.9");

        assert_eq!(client_ip(&TestRequest::default().to_http_request()), "unknown");
    }

    #[test]
    fn test_api_key_header_then_query() {
        let req = TestRequest::with_uri("/api/x?api-key=FROMQUERY")
            .insert_header(("api-key", "FROMHEADER"))
            .to_http_request();
        assert_eq!(supplied_api_key(&req).as_deref(), Some("FROMHEADER"));

        let req = TestRequest::with_uri("/api/x?api-key=K%201").to_http_request();
        assert_eq!(supplied_api_key(&req).as_deref(), Some("K 1"));

        let req = TestRequest::with_uri("/api/x?api-key=").to_http_request();
        assert!(supplied_api_key(&req).is_none());
    }

    #[test]
    fn test_identity_forms() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "1.2.3.4"))
            .to_http_request();
        assert_eq!(Identity::for_request(&req).to_string(), "ip:1.2.3.4");

        assert_eq!(Identity::parse("key:K1"), Some(Identity::Key("K1".to_string())));
        assert_eq!(Identity::parse("ip:1.2.3.4"), Some(Identity::Ip("1.2.3.4".to_string())));
        assert_eq!(Identity::parse("K1"), None);
        assert_eq!(Identity::parse("key:"), None);
    }
}
