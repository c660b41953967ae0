//! The single HTTP entry point: every method and path not otherwise
//! intercepted flows through here, into the auth pipeline, and into the
//! consumer dispatch tree.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;

use custodia_core::request::{Output, PeerCreds};

use crate::error::AppError;
use crate::middleware::authenticate;
use crate::state::AppState;
use crate::uds::UdsConnectInfo;

/// Maximum accepted request body size: 1 MiB. Secret values are small; this
/// bounds memory use against a client streaming an unbounded body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Forwarder loop-prevention header: a comma-separated list of forwarder
/// UUIDs a request has already passed through.
static LOOP_HEADER: HeaderName = HeaderName::from_static("x-loop-custodia");

/// Build the application router. Every request is handled by [`handle`] —
/// the consumer dispatch tree, not Axum's router, decides what exists.
#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new().fallback(handle)
}

async fn handle(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    connect_info: Result<ConnectInfo<UdsConnectInfo>, axum::extract::rejection::ExtensionRejection>,
    request: Request,
) -> Response {
    let creds = connect_info.ok().and_then(|ConnectInfo(info)| info.peer);
    match handle_inner(&state, query, creds, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle_inner(
    state: &AppState,
    query: HashMap<String, String>,
    creds: Option<PeerCreds>,
    request: Request,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    check_loop_header(&parts.headers, &state.forwarder_id)?;

    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("body too large or unreadable: {e}")))?;
    let body = if body_bytes.is_empty() { None } else { Some(body_bytes.to_vec()) };

    let pipeline_request =
        authenticate(state, &parts.method, path, query, &parts.headers, creds, body).await?;

    let response = state.consumers.dispatch(pipeline_request).await?;
    Ok(into_axum_response(response))
}

/// Reject a request that has already passed through this instance, per
/// `X-LOOP-CUSTODIA`'s comma-separated list of forwarder ids.
fn check_loop_header(headers: &axum::http::HeaderMap, forwarder_id: &str) -> Result<(), AppError> {
    let Some(value) = headers.get(&LOOP_HEADER).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    if value.split(',').any(|id| id.trim() == forwarder_id) {
        return Err(AppError::LoopDetected);
    }
    Ok(())
}

fn into_axum_response(response: custodia_core::request::Response) -> Response {
    let status = StatusCode::from_u16(response.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.output {
        Output::Json(value) => (status, axum::Json(value)).into_response(),
        Output::Raw { content_type, bytes } => {
            (status, [(axum::http::header::CONTENT_TYPE, content_type)], Body::from(bytes))
                .into_response()
        }
        Output::Empty => status.into_response(),
    }
}
