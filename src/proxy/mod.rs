//! Core HTTP request forwarding handler.
//!
//! The [`forward_handler`] function is the Axum fallback that receives
//! every request not served by the load balancer itself and hands it to
//! the [`Dispatcher`](dispatch::Dispatcher). Submodules handle backend
//! selection and forwarding ([`dispatch`]) and header construction
//! ([`headers`]).

pub mod dispatch;
pub mod headers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::server::AppState;
use dispatch::{Dispatched, InboundRequest};

pub async fn forward_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    req_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = req_headers
        .get(&headers::X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

    tracing::debug!(
        correlation_id = %correlation_id,
        method = %method,
        path = %uri.path(),
        "request received"
    );

    let request = InboundRequest {
        method,
        path_and_query: uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), ToString::to_string),
        headers: req_headers,
        body,
        client_ip: addr.ip().to_string(),
        correlation_id: correlation_id.clone(),
    };

    match state.dispatcher.dispatch(request).await {
        Ok(dispatched) => into_response(&state, dispatched, &correlation_id),
        Err(e) => e.into_response(),
    }
}

fn into_response(state: &AppState, dispatched: Dispatched, correlation_id: &str) -> Response {
    let Dispatched {
        backend,
        pin,
        response,
    } = dispatched;

    let mut resp_headers = response.headers;
    headers::strip_response_hop_by_hop(&mut resp_headers);
    headers::tag_backend(&mut resp_headers, &backend);
    state
        .dispatcher
        .affinity()
        .apply(pin, &backend, &mut resp_headers);

    let mut builder = Response::builder().status(response.status);
    for (key, value) in &resp_headers {
        builder = builder.header(key, value);
    }
    builder
        .header(&headers::X_CORRELATION_ID, correlation_id)
        .body(axum::body::Body::from(response.body))
        .unwrap_or_else(|e| {
            tracing::error!(
                correlation_id = %correlation_id,
                error = %e,
                "failed to build response"
            );
            StatusCode::BAD_GATEWAY.into_response()
        })
}
