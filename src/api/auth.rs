use axum::{
    body::{self, Body},
    extract::{Path, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::connection_from_body;
use crate::services::auth_service;
use crate::services::database::PoolFactory;

/// Largest request body accepted for signing
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Auth gate for `/api/{connection}/query`
pub async fn authorize_path_connection<F: PoolFactory>(
    State(state): State<AppState<F>>,
    Path(connection): Path<String>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(state, Some(connection), request, next).await
}

/// Auth gate for `/api/query`, where the connection comes from the body
pub async fn authorize_body_connection<F: PoolFactory>(
    State(state): State<AppState<F>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authenticate(state, None, request, next).await
}

async fn authenticate<F: PoolFactory>(
    state: AppState<F>,
    path_connection: Option<String>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // The signature covers the exact bytes, so buffer them and replay them downstream
    let (parts, body) = request.into_parts();
    let bytes = body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::bad_request_with_details("Failed to read request body", e.to_string()))?;

    let connection = match path_connection {
        Some(name) if !name.is_empty() => name,
        _ => connection_from_body(&bytes),
    };

    let profile = state.config.connection(&connection).ok_or_else(|| {
        AppError::bad_request(format!("Requested connection '{}' not found", connection))
    })?;

    let header_str = |name: header::HeaderName| parts.headers.get(name).and_then(|v| v.to_str().ok());
    auth_service::authorize(
        &state.config,
        profile,
        header_str(header::AUTHORIZATION),
        header_str(header::ORIGIN),
        &bytes,
    )?;

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}
