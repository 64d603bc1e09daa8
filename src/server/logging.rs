//! Per-request logging.

use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const MASKED: &str = "***MASKED***";

/// Header names whose values never reach the log.
pub const SENSITIVE_HEADER_NAMES: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "proxy-authorization",
    "x-auth-token",
    "x-access-token",
];

/// Identifier assigned to each request, stored in request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADER_NAMES.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Header pairs with sensitive values replaced by [`MASKED`].
pub fn masked_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if is_sensitive(name.as_str()) {
                MASKED.to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name.as_str().to_string(), shown)
        })
        .collect()
}

pub async fn log_requests(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(request_id = %request_id, %method, path = %path, headers = ?masked_headers(req.headers()), "request");
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let started = Instant::now();
    let mut resp = next.run(req).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    let status = resp.status().as_u16();

    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    if status >= 500 {
        error!(request_id = %request_id, %method, path = %path, status, duration_ms, "request failed");
    } else if status >= 400 {
        warn!(request_id = %request_id, %method, path = %path, status, duration_ms, "request rejected");
    } else {
        info!(request_id = %request_id, %method, path = %path, status, duration_ms, "request completed");
    }
    resp
}
