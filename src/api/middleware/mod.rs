//! API Middleware Module
//!
//! Admission control (bans, identity, permissions, rate limiting) for each
//! mounted route, and access logging for all API traffic.

pub mod admission;
pub mod audit;
pub mod identity;

pub use admission::{Admission, AdmissionPolicy};
pub use audit::AccessLogger;
pub use identity::{client_ip, query_param, supplied_session_token, Identity};
