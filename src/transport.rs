//! Outbound HTTP to backends.
//!
//! The dispatcher and health checker talk to backends only through the
//! [`Transport`] and [`Prober`] traits so tests can swap in scripted
//! implementations. [`HyperTransport`] is the production implementation
//! on a pooled hyper client. Every failure to obtain a response is
//! classified into a [`TransportError`] as refused, timeout, or reset.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::{TransportError, TransportErrorKind};

#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path plus optional query, always starting with `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn forward(
        &self,
        request: ForwardRequest,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError>;
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        path: &str,
        timeout: Duration,
    ) -> Result<StatusCode, TransportError>;
}

pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

#[derive(Clone)]
pub struct HyperTransport {
    client: HttpClient,
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransport {
    #[must_use]
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(connector);
        Self { client }
    }

    async fn send(
        &self,
        request: hyper::Request<Full<Bytes>>,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError> {
        let exchange = async {
            let response = self.client.request(request).await.map_err(classify)?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| TransportError::new(TransportErrorKind::Reset, e.to_string()))?
                .to_bytes();
            Ok::<_, TransportError>(UpstreamResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TransportError::timeout(timeout))?
    }
}

fn uri(host: &str, port: u16, path_and_query: &str) -> String {
    format!("http://{host}:{port}{path_and_query}")
}

/// Map a client error onto the three transport failure kinds by looking
/// for the underlying I/O error.
fn classify(error: hyper_util::client::legacy::Error) -> TransportError {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            let kind = match io.kind() {
                std::io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
                std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
                _ => TransportErrorKind::Reset,
            };
            return TransportError::new(kind, io.to_string());
        }
        source = err.source();
    }

    let kind = if error.is_connect() {
        TransportErrorKind::Refused
    } else {
        TransportErrorKind::Reset
    };
    TransportError::new(kind, error.to_string())
}

#[async_trait]
impl Transport for HyperTransport {
    async fn forward(
        &self,
        request: ForwardRequest,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError> {
        let mut builder = hyper::Request::builder()
            .method(request.method)
            .uri(uri(host, port, &request.path_and_query));
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        let outbound = builder
            .body(Full::new(request.body))
            .map_err(|e| TransportError::new(TransportErrorKind::Reset, e.to_string()))?;

        self.send(outbound, timeout).await
    }
}

#[async_trait]
impl Prober for HyperTransport {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        path: &str,
        timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        let outbound = hyper::Request::builder()
            .uri(uri(host, port, path))
            .header(hyper::header::USER_AGENT, concat!("fulcrum/", env!("CARGO_PKG_VERSION")))
            .body(Full::new(Bytes::new()))
            .map_err(|e| TransportError::new(TransportErrorKind::Reset, e.to_string()))?;

        self.send(outbound, timeout).await.map(|r| r.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_classified() {
        // Bind then drop to get a port nothing is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = HyperTransport::new();
        let err = transport
            .probe("127.0.0.1", port, "/healthcheck", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Refused);
    }

    #[tokio::test]
    async fn silent_backend_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let transport = HyperTransport::new();
        let err = transport
            .probe("127.0.0.1", port, "/", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Timeout);
        hold.abort();
    }

    #[test]
    fn uri_joins_host_port_and_path() {
        assert_eq!(uri("10.0.0.1", 8080, "/a?b=1"), "http://10.0.0.1:8080/a?b=1");
    }
}
