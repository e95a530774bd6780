//! Header construction, forwarding, and hop-by-hop stripping.
//!
//! [`build_forwarded_headers`] clones the client's headers, strips
//! hop-by-hop headers, rewrites `Host` to the chosen backend, and adds
//! proxy metadata (`X-Forwarded-For`, `X-Real-IP`, `Via`,
//! `X-Correlation-Id`) plus the load balancer's own identification
//! (`X-Forwarded-By`, `X-Backend-Server`).

use std::sync::LazyLock;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::registry::Backend;

pub const FORWARDED_BY: &str = "fulcrum";

pub static X_BACKEND_SERVER: HeaderName = HeaderName::from_static("x-backend-server");
pub static X_FORWARDED_BY: HeaderName = HeaderName::from_static("x-forwarded-by");
pub static X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

/// Strip hop-by-hop headers and `content-length` from an upstream response.
///
/// The body has already been fully collected by the transport, so
/// `transfer-encoding` and `content-length` from the origin are no longer
/// accurate. Axum will set the correct `content-length` based on the actual
/// body bytes.
pub fn strip_response_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove(hyper::header::CONTENT_LENGTH);
}

/// Tag a response with the backend that served it.
pub fn tag_backend(headers: &mut HeaderMap, backend: &Backend) {
    if let Ok(val) = HeaderValue::from_str(&backend.id) {
        headers.insert(X_BACKEND_SERVER.clone(), val);
    }
}

pub fn build_forwarded_headers(
    original: &HeaderMap,
    client_ip: &str,
    backend: &Backend,
    correlation_id: &str,
) -> HeaderMap {
    let mut headers = original.clone();

    for header_name in HOP_BY_HOP.iter() {
        headers.remove(header_name);
    }

    if let Ok(val) = HeaderValue::from_str(&backend.address()) {
        headers.insert("host", val);
    }

    // X-Forwarded-For: append to chain
    let xff = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map_or_else(
            || client_ip.to_string(),
            |existing| format!("{existing}, {client_ip}"),
        );
    if let Ok(val) = HeaderValue::from_str(&xff) {
        headers.insert("x-forwarded-for", val);
    }

    // X-Real-IP (first IP in chain)
    let real_ip = xff.split(',').next().unwrap_or(client_ip).trim();
    if let Ok(val) = HeaderValue::from_str(real_ip) {
        headers.insert("x-real-ip", val);
    }

    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));

    if let Some(original_host) = original.get("host") {
        headers.insert("x-forwarded-host", original_host.clone());
    }

    headers.insert("via", HeaderValue::from_static("1.1 fulcrum"));

    if let Ok(val) = HeaderValue::from_str(correlation_id) {
        headers.insert(X_CORRELATION_ID.clone(), val);
    }

    headers.insert(X_FORWARDED_BY.clone(), HeaderValue::from_static(FORWARDED_BY));
    tag_backend(&mut headers, backend);

    headers
}
