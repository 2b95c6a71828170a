//! HTTP request handlers

pub mod admin_ui;
pub mod health;
pub mod internal;
pub mod logs;
pub mod matches;
pub mod webhooks;
