//! Route table and mounting
//!
//! Every API route is declared here with its endpoint path (relative to
//! `/api`). At startup each one is classified as public or protected from
//! the registry's `publicDirs` and mounted behind the admission middleware.

use actix_web::web;
use tracing::info;

use super::handlers;
use super::middleware::{Admission, AdmissionPolicy};
use crate::state::AppState;

pub const API_PREFIX: &str = "/api";

/// One mountable route
pub struct RouteSpec {
    /// Endpoint path relative to `/api`, also the permission token
    pub path: &'static str,
    pub configure: fn(&mut web::ServiceConfig),
}

pub static ROUTES: &[RouteSpec] = &[
    RouteSpec {
        path: "admin/internal",
        configure: handlers::internal::configure,
    },
    RouteSpec {
        path: "admin/logs",
        configure: handlers::logs::configure,
    },
    RouteSpec {
        path: "tniv/DB/match",
        configure: handlers::matches::configure_match_log,
    },
    RouteSpec {
        path: "tniv/DB/player/stats",
        configure: handlers::matches::configure_player_stats,
    },
    RouteSpec {
        path: "tniv/webhooks",
        configure: handlers::webhooks::configure_relay,
    },
    RouteSpec {
        path: "tniv/webhooks/maps",
        configure: handlers::webhooks::configure_maps,
    },
];

/// A route with its admission requirements resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    pub path: String,
    pub public: bool,
    /// Protected routes among this one and its mounted ancestors, outermost
    /// first
    pub permission_paths: Vec<String>,
}

impl MountPlan {
    pub fn url(&self) -> String {
        format!("{}/{}", API_PREFIX, self.path)
    }

    pub fn policy(&self) -> AdmissionPolicy {
        if self.permission_paths.is_empty() {
            AdmissionPolicy::public()
        } else {
            AdmissionPolicy::protected(self.permission_paths.clone())
        }
    }
}

/// Public when the last path segment is a listed public directory
pub fn is_public(path: &str, public_dirs: &[String]) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    public_dirs.iter().any(|d| *d == last)
}

/// `ancestor` is `path` itself or a whole-segment prefix of it
fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Classify every route and work out which allow-lists guard it. The
/// result is in lexicographic path order.
pub fn plan(routes: &[RouteSpec], public_dirs: &[String]) -> Vec<MountPlan> {
    let mut paths: Vec<&str> = routes.iter().map(|r| r.path).collect();
    paths.sort_unstable();
    paths.dedup();

    paths
        .iter()
        .map(|path| {
            let permission_paths = paths
                .iter()
                .filter(|other| is_ancestor_or_self(other, path))
                .filter(|other| !is_public(other, public_dirs))
                .map(|other| other.to_string())
                .collect();
            MountPlan {
                path: path.to_string(),
                public: is_public(path, public_dirs),
                permission_paths,
            }
        })
        .collect()
}

/// Mount `routes` under `/api`, each behind its own admission middleware.
/// Returns the number of routes mounted.
pub fn mount(cfg: &mut web::ServiceConfig, state: &web::Data<AppState>, routes: &[RouteSpec]) -> usize {
    let plans = plan(routes, &state.registry.public_dirs());

    for plan in &plans {
        info!(
            route = %plan.url(),
            visibility = if plan.public { "PUBLIC" } else { "PROTECTED" },
            "Mounted route"
        );
    }

    // actix scopes don't fall through, so deeper paths register first
    for plan in plans.iter().rev() {
        let Some(spec) = routes.iter().find(|r| r.path == plan.path) else {
            continue;
        };
        cfg.service(
            web::scope(&plan.url())
                .wrap(Admission::new(state.clone(), plan.policy()))
                .configure(spec.configure)
                .default_service(web::to(super::not_found)),
        );
    }

    plans.len()
}
