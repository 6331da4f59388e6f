use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::QueryRequest;
use crate::services::database::PoolFactory;
use crate::services::encoder::{Compression, EncoderPlan, ResultEncoder};
use crate::services::lifecycle::RequestLifecycle;

/// Execute a query against the connection named in the path
pub async fn execute_query<F: PoolFactory>(
    State(state): State<AppState<F>>,
    Path(connection): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    run_query(state, Some(connection), &headers, &body).await
}

/// Execute a query against the connection named in the body (`default` if absent)
pub async fn execute_query_from_body<F: PoolFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    run_query(state, None, &headers, &body).await
}

async fn run_query<F: PoolFactory>(
    state: AppState<F>,
    path_connection: Option<String>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, AppError> {
    let request: QueryRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request_with_details("Invalid request body", e.to_string()))?;

    let connection = request.connection_name(path_connection.as_deref()).to_string();
    let format = request.format;
    let query = request.query;
    let compression = Compression::from_accept_encoding(
        headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok()),
    );

    let lifecycle = RequestLifecycle::new(state.requests.child_token(), state.config.request_timeout());

    // Waiting for a slot counts against the request's deadline
    let slots = state.query_slots.clone();
    let permit = lifecycle
        .watch(async move {
            slots
                .acquire_owned()
                .await
                .map_err(|_| AppError::internal("Server is shutting down"))
        })
        .await?;

    tracing::info!(connection = %connection, format = %format, "Executing query");
    let service = state.query_service.clone();

    // Opening the cursor, checking the format and opening the writers run as one cancellable unit
    let result = lifecycle
        .run(async move {
            let cursor = service.execute(&connection, &query).await?;
            let plan = EncoderPlan::prepare(format, &cursor.columns)?;
            ResultEncoder::open(plan, cursor, compression)
        })
        .await?;

    let content_type = result.content_type();
    let body = result.into_body(lifecycle, Some(permit));

    let mut response = body.into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Some(coding) = compression.content_encoding() {
        response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(coding));
        response_headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }
    Ok(response)
}
