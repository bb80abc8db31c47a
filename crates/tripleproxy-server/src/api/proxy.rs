//! Catch-all proxy handler

use crate::ProxyServer;
use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use serde_json::json;
use std::error::Error as StdError;
use std::sync::Arc;
use tripleproxy_core::{InboundRequest, ProxyRequest};
use tripleproxy_protocol::NodeResponse;
use tripleproxy_protocol::rest::forwardable_headers;

/// Forward any request to the cluster
pub async fn proxy(State(server): State<Arc<ProxyServer>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, server.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Rejected body for {} {}: {}", parts.method, parts.uri, e);
            return body_error_response(&e);
        }
    };

    let inbound = InboundRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(parse_query).unwrap_or_default(),
        headers: parts.headers,
        body: (!body.is_empty()).then_some(body),
        is_base64_encoded: false,
    };
    let request = ProxyRequest::from(inbound);

    match server.router.route(&request).await {
        Ok(response) => into_response(response),
        Err(e) => {
            tracing::error!(
                "Error processing {} {}: {}",
                request.method(),
                request.path(),
                e
            );
            super::internal_error()
        }
    }
}

/// 413 when the body hit the size limit, 400 when it could not be read
fn body_error_response(error: &axum::Error) -> Response {
    if is_length_limit(error) {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({ "error": "Payload Too Large" })),
        )
            .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Bad Request" })),
        )
            .into_response()
    }
}

fn is_length_limit(error: &axum::Error) -> bool {
    std::iter::successors(Some(error as &(dyn StdError + 'static)), |e: &&(dyn StdError + 'static)| (*e).source())
        .any(|e| e.is::<LengthLimitError>())
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn into_response(response: NodeResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = forwardable_headers(&response.headers);
    out
}
