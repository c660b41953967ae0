//! Transport-to-pipeline adapter: turns an incoming HTTP request into a
//! [`custodia_core::request::Request`] and runs it through the
//! authentication/authorization chain.
//!
//! `creds` comes from `SO_PEERCRED` when the listener is a Unix-domain
//! socket (see [`crate::uds`]) and is always `None` over TCP. `client_cert`
//! has no transport in this binary to populate it from and is always `None`;
//! a deployment fronting this server with an mTLS-terminating proxy would
//! need to forward it some other way before the pipeline runs.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderMap, Method as HttpMethod};

use custodia_core::request::{Method, PeerCreds, Request};

use crate::error::AppError;
use crate::state::AppState;

fn convert_method(method: &HttpMethod) -> Option<Method> {
    match *method {
        HttpMethod::GET => Some(Method::Get),
        HttpMethod::PUT => Some(Method::Put),
        HttpMethod::POST => Some(Method::Post),
        HttpMethod::DELETE => Some(Method::Delete),
        _ => None,
    }
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Build a pipeline [`Request`] from the raw HTTP parts and run it through
/// `state.auth_chain`.
///
/// # Errors
///
/// Returns [`AppError::MethodNotAllowed`] for a method the pipeline does not
/// model, and whatever [`AppError`] the auth chain's denial maps to.
pub async fn authenticate(
    state: &AppState,
    method: &HttpMethod,
    path: String,
    query: HashMap<String, String>,
    headers: &HeaderMap,
    creds: Option<PeerCreds>,
    body: Option<Vec<u8>>,
) -> Result<Request, AppError> {
    let method = convert_method(method).ok_or(AppError::MethodNotAllowed)?;
    let client_id = uuid::Uuid::new_v4().to_string();

    let mut request = Request::new(method, path, client_id);
    request.query = query;
    request.headers = header_map(headers);
    request.creds = creds;
    request.body = body;

    state.auth_chain.run(&mut request).await?;
    Ok(request)
}
