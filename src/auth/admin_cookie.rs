//! Signed admin UI session cookie
//!
//! Format: `<base64(json {user, exp})>.<hex hmac-sha256(payload)>` where
//! `exp` is epoch milliseconds.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "admin_ui_session";

#[derive(Debug, Serialize, Deserialize)]
struct CookiePayload {
    user: String,
    exp: i64,
}

/// Signs and verifies admin UI cookies with a shared secret
#[derive(Clone)]
pub struct CookieSigner {
    secret: Vec<u8>,
}

impl CookieSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length")
    }

    /// Cookie value for `user`, expiring at `expires_at_ms`
    pub fn sign(&self, user: &str, expires_at_ms: i64) -> String {
        let payload = CookiePayload {
            user: user.to_string(),
            exp: expires_at_ms,
        };
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        let encoded = STANDARD.encode(json);

        let mut mac = self.mac();
        mac.update(encoded.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        format!("{}.{}", encoded, sig)
    }

    /// The signed-in user, if the cookie is authentic and unexpired
    pub fn verify(&self, cookie: &str, now_ms: i64) -> Option<String> {
        let (encoded, sig) = cookie.split_once('.')?;
        if sig.contains('.') {
            return None;
        }
        let sig = hex::decode(sig).ok()?;

        let mut mac = self.mac();
        mac.update(encoded.as_bytes());
        mac.verify_slice(&sig).ok()?;

        let json = STANDARD.decode(encoded).ok()?;
        let payload: CookiePayload = serde_json::from_slice(&json).ok()?;
        if now_ms > payload.exp {
            return None;
        }
        Some(payload.user)
    }
}

/// `Set-Cookie` value establishing the session
pub fn session_cookie_header(value: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", COOKIE_NAME, value)
}

/// `Set-Cookie` value expiring the session
pub fn clear_cookie_header() -> String {
    format!("{}=; Path=/; HttpOnly; Max-Age=0", COOKIE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_sign_then_verify() {
        let signer = CookieSigner::new("secret");
        let cookie = signer.sign("admin", NOW + 60_000);
        assert_eq!(signer.verify(&cookie, NOW).as_deref(), Some("admin"));
    }

    #[test]
    fn test_expired_cookie_rejected() {
        let signer = CookieSigner::new("secret");
        let cookie = signer.sign("admin", NOW);
        assert!(signer.verify(&cookie, NOW + 1).is_none());
    }

    #[test]
    fn test_tampered_or_foreign_cookie_rejected() {
        let signer = CookieSigner::new("secret");
        let cookie = signer.sign("admin", NOW + 60_000);

        let other = CookieSigner::new("other-secret");
        assert!(other.verify(&cookie, NOW).is_none());

        let (payload, sig) = cookie.split_once('.').unwrap();
        let forged_payload = STANDARD.encode(br#"{"user":"root","exp":9999999999999}"#);
        assert!(signer.verify(&format!("{}.{}", forged_payload, sig), NOW).is_none());
        assert!(signer.verify(payload, NOW).is_none());
        assert!(signer.verify("garbage", NOW).is_none());
    }
}
