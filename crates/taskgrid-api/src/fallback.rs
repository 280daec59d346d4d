//! The fallback collaborator for unmatched routes.
//!
//! Configured once at startup: either an in-process handler mounted by
//! the embedding application, or a reverse proxy to a remote base URL
//! with a bounded timeout. With no fallback configured, misses are
//! plain 404s.

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http_body_util::BodyExt;
use tower::util::ServiceExt;
use tracing::{debug, warn};

/// Destination for requests the route table does not match.
pub enum Fallback {
    /// No fallback configured.
    None,
    /// In-process mounted handler.
    Mounted(Router),
    /// Reverse proxy to a remote service.
    Proxy { base_url: String, timeout: Duration },
}

impl Fallback {
    pub async fn handle(&self, req: Request) -> Response {
        match self {
            Fallback::None => not_found(req.uri().path()),
            Fallback::Mounted(router) => match router.clone().oneshot(req).await {
                Ok(response) => response,
                // Router's error type is Infallible; this arm is
                // unreachable but keeps the match total.
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            },
            Fallback::Proxy { base_url, timeout } => {
                let path = req.uri().path().to_string();
                match tokio::time::timeout(*timeout, proxy_request(base_url, req)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(err)) => {
                        warn!(%path, error = %err, "fallback proxy failed");
                        bad_gateway(&err)
                    }
                    Err(_) => {
                        warn!(%path, "fallback proxy timed out");
                        (
                            StatusCode::GATEWAY_TIMEOUT,
                            Json(serde_json::json!({
                                "success": false,
                                "error": "fallback service timed out",
                            })),
                        )
                            .into_response()
                    }
                }
            }
        }
    }
}

/// Forward one request to the fallback service and relay its response.
async fn proxy_request(base_url: &str, req: Request) -> Result<Response, String> {
    let base: http::Uri = base_url
        .parse()
        .map_err(|e| format!("invalid fallback target: {e}"))?;
    let authority = base
        .authority()
        .ok_or_else(|| "fallback target has no authority".to_string())?
        .clone();

    let query = req
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let target_uri = format!(
        "http://{}{}{}",
        authority,
        req.uri().path(),
        query
    );
    debug!(target = %target_uri, "proxying unmatched request");

    let stream = tokio::net::TcpStream::connect(authority.as_str())
        .await
        .map_err(|e| format!("connect failed: {e}"))?;
    let io = hyper_util::rt::TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| format!("handshake failed: {e}"))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| format!("failed to read request body: {e}"))?;

    let mut builder = http::Request::builder()
        .method(parts.method)
        .uri(&target_uri);
    for (name, value) in parts.headers.iter() {
        if name != http::header::HOST {
            builder = builder.header(name, value);
        }
    }
    let proxied = builder
        .header(http::header::HOST, authority.as_str())
        .body(http_body_util::Full::new(body_bytes))
        .map_err(|e| format!("failed to build request: {e}"))?;

    let response = sender
        .send_request(proxied)
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    let (parts, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| format!("failed to read response body: {e}"))?
        .to_bytes();

    let mut builder = Response::builder().status(parts.status);
    for (name, value) in parts.headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(bytes))
        .map_err(|e| format!("failed to build response: {e}"))
}

fn not_found(path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "success": false,
            "error": format!("no route matches {path}"),
        })),
    )
        .into_response()
}

fn bad_gateway(err: &str) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({
            "success": false,
            "error": err,
        })),
    )
        .into_response()
}
