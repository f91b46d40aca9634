//! Tower/axum integration.
//!
//! ```rust,no_run
//! use axum::{Router, routing::post};
//! use s402::{ExactEvmScheme, ResourceServer};
//! use s402_http::HttpFacilitatorClient;
//! use s402_http::engine::HttpResourceServer;
//! use s402_http::server::{MiddlewareConfig, PaymentLayer, SettlementTiming};
//! use s402_http::types::{PaymentOption, RouteConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let facilitator = HttpFacilitatorClient::try_from("https://x402.org/facilitator")?;
//! let server = ResourceServer::new()
//!     .with_facilitator(facilitator)
//!     .register("eip155:*", ExactEvmScheme::new());
//! let engine = HttpResourceServer::new(server).route(
//!     "POST /orders",
//!     RouteConfig::single(PaymentOption::exact("eip155:84532", "0xRecipient", "$1.50")),
//! )?;
//!
//! let config = MiddlewareConfig::new().with_settlement_timing(SettlementTiming::Before);
//! let app: Router = Router::new()
//!     .route("/orders", post(|| async { "created" }))
//!     .layer(PaymentLayer::start(engine, config).await);
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::extract::Request;
use axum_core::response::Response;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use super::config::MiddlewareConfig;
use super::orchestrator::Orchestrator;
use crate::engine::ProtocolEngine;

/// Layer that puts routes behind the settlement orchestrator.
#[derive(Clone, Debug)]
pub struct PaymentLayer {
    orchestrator: Arc<Orchestrator>,
}

impl PaymentLayer {
    /// Creates the layer without contacting facilitators.
    pub fn new(engine: impl ProtocolEngine, config: MiddlewareConfig) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(engine, config)),
        }
    }

    /// Creates the layer and, if enabled, syncs the engine with its
    /// facilitators. A failed sync is logged and retried lazily by the engine.
    pub async fn start(engine: impl ProtocolEngine, config: MiddlewareConfig) -> Self {
        let layer = Self::new(engine, config);
        if layer.orchestrator.config().sync_facilitator_on_start {
            if let Err(err) = layer.orchestrator.engine().initialize().await {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %err, "facilitator sync failed at startup; continuing");
                #[cfg(not(feature = "telemetry"))]
                let _ = err;
            }
        }
        layer
    }

    /// Returns the orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

impl<S> Layer<S> for PaymentLayer
where
    S: Service<Request, Response = Response> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Service = PaymentService<S::Error>;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentService {
            orchestrator: Arc::clone(&self.orchestrator),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service produced by [`PaymentLayer`].
#[allow(missing_debug_implementations)] // BoxCloneSyncService does not implement Debug
pub struct PaymentService<E> {
    orchestrator: Arc<Orchestrator>,
    inner: BoxCloneSyncService<Request, Response, E>,
}

impl<E> Clone for PaymentService<E> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            inner: self.inner.clone(),
        }
    }
}

impl<E> Service<Request> for PaymentService<E>
where
    E: Send + 'static,
{
    type Response = Response;
    type Error = E;
    type Future = Pin<Box<dyn Future<Output = Result<Response, E>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let orchestrator = Arc::clone(&self.orchestrator);
        let inner = self.inner.clone();
        Box::pin(async move {
            orchestrator
                .handle(request, inner)
                .await
                .map(|handled| handled.response)
        })
    }
}
