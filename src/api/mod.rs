//! API module - HTTP routes and handlers

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;


use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    web, App, HttpResponse,
};
use std::sync::atomic::Ordering;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::middleware::{AccessLogger, Admission, AdmissionPolicy};
use crate::api::openapi::ApiDoc;
use crate::error::ApiError;
use crate::state::AppState;

pub use routes::{RouteSpec, ROUTES};

/// Largest JSON body accepted by any handler
pub const MAX_JSON_BODY: usize = 1024 * 1024;

pub async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::route_not_found())
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_JSON_BODY)
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

/// Configure all API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &web::Data<AppState>, routes: &[RouteSpec]) {
    let mounted = routes::mount(cfg, state, routes);
    state.routes_mounted.store(mounted, Ordering::Relaxed);

    cfg.service(
        // Cookie-authenticated; only the ban check and rate limit apply
        web::scope("/api/admin-ui")
            .wrap(Admission::new(state.clone(), AdmissionPolicy::public()))
            .configure(handlers::admin_ui::configure)
            .default_service(web::to(not_found)),
    )
    .route("/health", web::get().to(handlers::health::health_check))
    // Swagger UI and OpenAPI spec
    .service(
        SwaggerUi::new("/swagger-ui/{_:.*}")
            .url("/api-docs/openapi.json", ApiDoc::openapi())
    );
}

/// The complete application: shared state, access logging, every route and
/// the JSON 404 fallback
pub fn app(
    state: web::Data<AppState>,
    routes: &'static [RouteSpec],
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(state.clone())
        .app_data(json_config())
        .app_data(query_config())
        .wrap(AccessLogger::new(state.clone()))
        .configure(|cfg| configure_routes(cfg, &state, routes))
        .default_service(web::to(not_found))
}
