use axum::{
    http::{HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::auth;
use crate::api::handlers::{query, status, AppState};
use crate::config::CorsConfig;
use crate::services::database::PoolFactory;

/// Create router with application state.
///
/// Query concurrency is bounded inside the query handler so that a slot stays taken
/// while the result body streams.
pub fn create_router_with_state<F: PoolFactory>(state: AppState<F>) -> Router {
    let cors = cors_layer(&state.config.pgrest.cors);

    let path_routes = Router::new()
        .route("/api/{connection}/query", post(query::execute_query::<F>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authorize_path_connection::<F>,
        ));

    let body_routes = Router::new()
        .route("/api/query", post(query::execute_query_from_body::<F>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authorize_body_connection::<F>,
        ));

    Router::new()
        .route("/status", get(status::status::<F>))
        .merge(path_routes)
        .merge(body_routes)
        .fallback(status::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS layer from the configured allow-lists. `*` means any.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins = if config.allows_any_origin() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            config
                .allow_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    let headers = if config.allow_headers.iter().any(|h| h == "*") {
        AllowHeaders::from(Any)
    } else {
        AllowHeaders::list(
            config
                .allow_headers
                .iter()
                .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok()),
        )
    };

    let methods = if config.allow_methods.iter().any(|m| m == "*") {
        AllowMethods::from(Any)
    } else {
        AllowMethods::list(
            config
                .allow_methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_headers(headers)
        .allow_methods(methods)
}
