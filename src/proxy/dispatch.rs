//! Per-request routing and forwarding.
//!
//! [`Dispatcher::dispatch`] runs the full pipeline for one request:
//! snapshot the healthy set, let the affinity cookie override the
//! balancer, count the request, forward once, and classify the result.
//! A transport failure demotes the backend on the spot so the very next
//! request skips it; the health checker brings it back later.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;

use super::headers::build_forwarded_headers;
use crate::affinity::{Affinity, Pin};
use crate::balancer::Balancer;
use crate::error::{DispatchError, NoHealthyBackends};
use crate::metrics::Metrics;
use crate::registry::{Backend, HealthSource, Registry};
use crate::transport::{ForwardRequest, Transport, UpstreamResponse};

#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct Dispatched {
    pub backend: Backend,
    pub pin: Pin,
    pub response: UpstreamResponse,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    balancer: Balancer,
    affinity: Affinity,
    metrics: Arc<Metrics>,
    transport: Arc<dyn Transport>,
    forward_timeout: Duration,
}

/// Records an error for the backend unless the forward completed. The
/// handler future is dropped when the client goes away mid-forward, and
/// that request must not read as a success.
struct InFlight<'a> {
    metrics: &'a Metrics,
    backend_id: &'a str,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.metrics.record_error(self.backend_id);
            tracing::warn!(backend = %self.backend_id, "client disconnected before backend responded");
        }
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        balancer: Balancer,
        affinity: Affinity,
        metrics: Arc<Metrics>,
        transport: Arc<dyn Transport>,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            balancer,
            affinity,
            metrics,
            transport,
            forward_timeout,
        }
    }

    #[must_use]
    pub const fn affinity(&self) -> &Affinity {
        &self.affinity
    }

    /// Pick the target for a request: affinity first, then the balancer.
    pub fn choose(&self, headers: &HeaderMap) -> Result<(Backend, Pin), NoHealthyBackends> {
        let healthy = self.registry.healthy();
        if healthy.is_empty() {
            return Err(NoHealthyBackends);
        }

        let token = self.affinity.token(headers);
        let backend = match self.affinity.resolve(token, &healthy) {
            Some(pinned) => pinned,
            None => self.balancer.select_server(&healthy)?,
        };
        let pin = self.affinity.pin(token, &backend);
        Ok((backend, pin))
    }

    pub async fn dispatch(&self, request: InboundRequest) -> Result<Dispatched, DispatchError> {
        let (backend, pin) = match self.choose(&request.headers) {
            Ok(choice) => choice,
            Err(e) => {
                tracing::warn!(correlation_id = %request.correlation_id, "no healthy backends available");
                return Err(e.into());
            }
        };

        tracing::debug!(
            correlation_id = %request.correlation_id,
            backend = %backend.id,
            pin = ?pin,
            strategy = %self.balancer.kind(),
            "backend selected"
        );

        self.metrics.record_request(&backend.id);

        let forward = ForwardRequest {
            method: request.method,
            headers: build_forwarded_headers(
                &request.headers,
                &request.client_ip,
                &backend,
                &request.correlation_id,
            ),
            path_and_query: request.path_and_query,
            body: request.body,
        };

        let mut guard = InFlight {
            metrics: &self.metrics,
            backend_id: &backend.id,
            settled: false,
        };
        let result = self
            .transport
            .forward(forward, &backend.host, backend.port, self.forward_timeout)
            .await;
        guard.settled = true;
        drop(guard);

        match result {
            Ok(response) => {
                if response.status.is_server_error() {
                    self.metrics.record_error(&backend.id);
                }
                tracing::info!(
                    correlation_id = %request.correlation_id,
                    backend = %backend.id,
                    status = response.status.as_u16(),
                    "request forwarded"
                );
                Ok(Dispatched {
                    backend,
                    pin,
                    response,
                })
            }
            Err(source) => {
                self.metrics.record_error(&backend.id);
                tracing::error!(
                    correlation_id = %request.correlation_id,
                    backend = %backend.id,
                    error = %source,
                    "forward failed"
                );
                if let Some(t) = self
                    .registry
                    .set_health(&backend.id, false, HealthSource::Demotion)
                {
                    tracing::warn!(backend = %t.id, from = %t.from, to = %t.to, "backend demoted after transport failure");
                }
                Err(DispatchError::Transport {
                    backend_id: backend.id,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::http::header::COOKIE;
    use axum::http::StatusCode;

    use super::*;
    use crate::balancer::StrategyKind;
    use crate::config::model::AffinityConfig;
    use crate::error::{TransportError, TransportErrorKind};

    /// Scripted transport: answers per port, records what it saw.
    #[derive(Default)]
    struct ScriptedTransport {
        outcomes: HashMap<u16, Result<StatusCode, TransportErrorKind>>,
        seen: Mutex<Vec<(u16, HeaderMap)>>,
    }

    impl ScriptedTransport {
        fn with(mut self, port: u16, outcome: Result<StatusCode, TransportErrorKind>) -> Self {
            self.outcomes.insert(port, outcome);
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn forward(
            &self,
            request: ForwardRequest,
            _host: &str,
            port: u16,
            _timeout: Duration,
        ) -> Result<UpstreamResponse, TransportError> {
            self.seen.lock().unwrap().push((port, request.headers));
            match self.outcomes.get(&port).copied().unwrap_or(Ok(StatusCode::OK)) {
                Ok(status) => Ok(UpstreamResponse {
                    status,
                    headers: HeaderMap::new(),
                    body: Bytes::from_static(b"ok"),
                }),
                Err(kind) => Err(TransportError::new(kind, "scripted")),
            }
        }
    }

    /// Never completes, used to simulate a client disconnect.
    struct Hang;

    #[async_trait]
    impl Transport for Hang {
        async fn forward(
            &self,
            _request: ForwardRequest,
            _host: &str,
            _port: u16,
            _timeout: Duration,
        ) -> Result<UpstreamResponse, TransportError> {
            std::future::pending().await
        }
    }

    struct Fixture {
        registry: Arc<Registry>,
        metrics: Arc<Metrics>,
        dispatcher: Dispatcher,
    }

    fn fixture(strategy: StrategyKind, transport: Arc<dyn Transport>) -> Fixture {
        let registry = Arc::new(Registry::new(vec![
            Backend::new("a", "localhost", 3001, 1),
            Backend::new("b", "localhost", 3002, 1),
            Backend::new("c", "localhost", 3003, 1),
        ]));
        let metrics = Arc::new(Metrics::from_registry(&registry));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Balancer::new(strategy),
            Affinity::new(AffinityConfig::default()),
            metrics.clone(),
            transport,
            Duration::from_secs(1),
        );
        Fixture {
            registry,
            metrics,
            dispatcher,
        }
    }

    fn request(cookie: Option<&str>) -> InboundRequest {
        let mut headers = HeaderMap::new();
        if let Some(c) = cookie {
            headers.insert(COOKIE, c.parse().unwrap());
        }
        InboundRequest {
            method: Method::GET,
            path_and_query: "/".into(),
            headers,
            body: Bytes::new(),
            client_ip: "127.0.0.1".into(),
            correlation_id: "test".into(),
        }
    }

    #[tokio::test]
    async fn first_request_pins_strategy_choice() {
        let f = fixture(StrategyKind::RoundRobin, Arc::new(ScriptedTransport::default()));
        let out = f.dispatcher.dispatch(request(None)).await.unwrap();
        assert_eq!(out.backend.id, "a");
        assert_eq!(out.pin, Pin::Fresh);
        assert_eq!(f.metrics.requests("a"), 1);
        assert_eq!(f.metrics.total_requests(), 1);
    }

    #[tokio::test]
    async fn affinity_overrides_every_strategy() {
        for strategy in [
            StrategyKind::Random,
            StrategyKind::RoundRobin,
            StrategyKind::Weighted,
        ] {
            let f = fixture(strategy, Arc::new(ScriptedTransport::default()));
            for _ in 0..10 {
                let out = f
                    .dispatcher
                    .dispatch(request(Some("lb-affinity=c")))
                    .await
                    .unwrap();
                assert_eq!(out.backend.id, "c");
                assert_eq!(out.pin, Pin::Kept);
            }
        }
    }

    #[tokio::test]
    async fn stale_token_is_repinned() {
        let f = fixture(StrategyKind::RoundRobin, Arc::new(ScriptedTransport::default()));
        f.registry.set_health("c", false, HealthSource::Probe);
        let out = f
            .dispatcher
            .dispatch(request(Some("lb-affinity=c")))
            .await
            .unwrap();
        assert_ne!(out.backend.id, "c");
        assert_eq!(out.pin, Pin::Repinned);
    }

    #[tokio::test]
    async fn empty_pool_fails_fast() {
        let f = fixture(StrategyKind::Random, Arc::new(ScriptedTransport::default()));
        for id in ["a", "b", "c"] {
            f.registry.set_health(id, false, HealthSource::Probe);
        }
        let err = f.dispatcher.dispatch(request(None)).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoHealthyBackends(_)));
        assert_eq!(f.metrics.total_requests(), 0);
    }

    #[tokio::test]
    async fn refused_connection_demotes_immediately() {
        let transport = ScriptedTransport::default().with(3001, Err(TransportErrorKind::Refused));
        let f = fixture(StrategyKind::RoundRobin, Arc::new(transport));

        let err = f.dispatcher.dispatch(request(None)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport { ref backend_id, .. } if backend_id == "a"));
        assert_eq!(f.metrics.errors("a"), 1);

        let healthy: Vec<String> = f.registry.healthy().into_iter().map(|b| b.id).collect();
        assert_eq!(healthy, ["b", "c"]);
        assert!(f.registry.get("a").unwrap().last_checked_at.is_none());

        let next = f.dispatcher.dispatch(request(None)).await.unwrap();
        assert_ne!(next.backend.id, "a");
    }

    #[tokio::test]
    async fn server_error_is_counted_and_passed_through() {
        let transport =
            ScriptedTransport::default().with(3001, Ok(StatusCode::INTERNAL_SERVER_ERROR));
        let f = fixture(StrategyKind::RoundRobin, Arc::new(transport));

        let out = f.dispatcher.dispatch(request(None)).await.unwrap();
        assert_eq!(out.response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(f.metrics.errors("a"), 1);
        assert!(f.registry.get("a").unwrap().healthy);
    }

    #[tokio::test]
    async fn forwards_identification_headers() {
        let transport = Arc::new(ScriptedTransport::default());
        let f = fixture(StrategyKind::RoundRobin, transport.clone());
        f.dispatcher.dispatch(request(None)).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let (port, headers) = &seen[0];
        assert_eq!(*port, 3001);
        assert_eq!(headers.get("x-forwarded-by").unwrap(), "fulcrum");
        assert_eq!(headers.get("x-backend-server").unwrap(), "a");
    }

    #[tokio::test]
    async fn dropped_request_counts_as_error() {
        let f = fixture(StrategyKind::RoundRobin, Arc::new(Hang));
        let pending = f.dispatcher.dispatch(request(None));
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(timed_out.is_err());

        assert_eq!(f.metrics.requests("a"), 1);
        assert_eq!(f.metrics.errors("a"), 1);
        assert!(f.registry.get("a").unwrap().healthy);
    }
}
