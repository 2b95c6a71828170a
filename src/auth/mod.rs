//! Credentials other than the API key itself: admin session tokens that
//! resolve to a key, and the signed cookie used by the admin UI.

pub mod admin_cookie;
pub mod sessions;

pub use admin_cookie::{clear_cookie_header, session_cookie_header, CookieSigner, COOKIE_NAME};
pub use sessions::{Session, SessionStore, MAX_TTL_SECS};
