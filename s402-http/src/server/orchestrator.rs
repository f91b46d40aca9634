//! The settlement orchestrator.
//!
//! Per request: ask the engine whether the route is paid, capture the body,
//! verify, then settle before or after the handler according to
//! [`SettlementTiming`]. The fixed order is verify, hook, settle; only the
//! handler's position moves.
//!
//! Invariants:
//!
//! - In before-timing the handler runs only after settlement succeeded.
//! - In after-timing the handler's output is buffered and released only
//!   after settlement succeeded; otherwise it is discarded.
//! - [`PaymentData`] is visible only once settlement succeeded.
//! - Settlement is attempted at most once per request, and at most once per
//!   authorization while the replay guard is on.

use std::sync::Arc;
use std::time::Duration;

use axum_core::extract::Request;
use axum_core::response::Response;
use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use serde_json::json;
use tokio::time::{Instant, timeout_at};
use tower::{Service, ServiceExt};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::body::capture_body;
use super::capture::{OutgoingResponse, ResponseCapture, ResponseWriter};
use super::config::{MiddlewareConfig, SettlementTiming};
use super::error::SettlementError;
use super::hooks::{HookContext, HookDecision};
use super::payment_data::PaymentData;
use super::replay::SettlementLedger;
use crate::constants::EXPOSED_PAYMENT_HEADERS;
use crate::engine::{
    PartsAdapter, ProcessResult, ProtocolEngine, SettlementResult, VerifiedPayment,
};
use crate::scope::RequestScope;

/// Timeouts longer than this are clamped when a deadline is set.
const MAX_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How a request left the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler ran and its response is returned.
    Continue,
    /// The engine answered instead of the handler (discovery, bad payment).
    PaymentErrorResponse,
    /// Processing stopped with an error response; nothing was settled for
    /// this request.
    Aborted,
}

/// The orchestrator's result.
#[derive(Debug)]
pub struct Handled {
    /// How the request was handled.
    pub outcome: Outcome,
    /// The response to send.
    pub response: Response,
}

impl Handled {
    const fn new(outcome: Outcome, response: Response) -> Self {
        Self { outcome, response }
    }

    const fn aborted(response: Response) -> Self {
        Self::new(Outcome::Aborted, response)
    }
}

/// Runs the settlement state machine around an inner service.
pub struct Orchestrator {
    engine: Arc<dyn ProtocolEngine>,
    config: MiddlewareConfig,
    ledger: Option<SettlementLedger>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator for `engine`.
    pub fn new(engine: impl ProtocolEngine, config: MiddlewareConfig) -> Self {
        Self::from_arc(Arc::new(engine), config)
    }

    /// Creates an orchestrator for a shared engine.
    #[must_use]
    pub fn from_arc(engine: Arc<dyn ProtocolEngine>, config: MiddlewareConfig) -> Self {
        let ledger = config.replay_guard.then(SettlementLedger::new);
        Self {
            engine,
            config,
            ledger,
        }
    }

    /// Returns the engine.
    #[must_use]
    pub fn engine(&self) -> &dyn ProtocolEngine {
        &*self.engine
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    /// Handles one request, calling `inner` when the payment state allows it.
    ///
    /// # Errors
    ///
    /// Only the inner service's own error, which is propagated untouched.
    /// Payment failures are responses, never errors.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "s402.handle_request",
            skip_all,
            fields(method = %request.method(), path = %request.uri().path())
        )
    )]
    pub async fn handle<S>(&self, request: Request, inner: S) -> Result<Handled, S::Error>
    where
        S: Service<Request, Response = Response> + Send,
        S::Future: Send,
    {
        let (mut parts, request_body) = request.into_parts();
        let scope = RequestScope::ensure(&mut parts.extensions);

        // Free routes keep their body stream untouched and unlimited.
        let unread = Bytes::new();
        if !self
            .engine
            .requires_payment(&PartsAdapter::new(&parts, &unread, &scope))
        {
            let response = inner.oneshot(Request::from_parts(parts, request_body)).await?;
            return Ok(Handled::new(Outcome::Continue, response));
        }

        let request = Request::from_parts(parts, request_body);
        let (request, body) = match capture_body(request, self.config.max_body_bytes).await {
            Ok(captured) => captured,
            Err(err) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(error = %err, "request body rejected");
                return Ok(Handled::aborted(err.to_response()));
            }
        };
        let (parts, request_body) = request.into_parts();
        let adapter = PartsAdapter::new(&parts, &body, &scope);

        let deadline = self.deadline();
        let processed = timeout_at(
            deadline,
            self.engine
                .process_request(&adapter, self.config.paywall.as_ref()),
        )
        .await;
        let verified = match processed {
            Ok(ProcessResult::NoPaymentRequired) => {
                let response = inner.oneshot(Request::from_parts(parts, request_body)).await?;
                return Ok(Handled::new(Outcome::Continue, response));
            }
            Ok(ProcessResult::PaymentError(instructions)) => {
                let mut response = instructions.into_response();
                expose_payment_headers(response.headers_mut());
                return Ok(Handled::new(Outcome::PaymentErrorResponse, response));
            }
            Ok(ProcessResult::PaymentVerified(verified)) => verified,
            Err(_) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(timeout = ?self.config.timeout, "payment verification timed out");
                let response = super::json_response(
                    StatusCode::PAYMENT_REQUIRED,
                    &json!({
                        "error": "Payment verification failed",
                        "details": format!("timed out after {}s", self.config.timeout.as_secs_f32()),
                    }),
                );
                return Ok(Handled::new(Outcome::PaymentErrorResponse, response));
            }
        };

        #[cfg(feature = "telemetry")]
        tracing::debug!(
            timing = %self.config.settlement_timing,
            payer = verified.verification.payer.as_deref().unwrap_or_default(),
            "payment verified"
        );

        match self.config.settlement_timing {
            SettlementTiming::Before => {
                self.settle_before(verified, parts, request_body, body, scope, deadline, inner)
                    .await
            }
            SettlementTiming::After => {
                self.settle_after(verified, parts, request_body, body, scope, inner)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle_before<S>(
        &self,
        verified: VerifiedPayment,
        parts: Parts,
        request_body: axum_core::body::Body,
        body: Bytes,
        scope: RequestScope,
        deadline: Instant,
        inner: S,
    ) -> Result<Handled, S::Error>
    where
        S: Service<Request, Response = Response> + Send,
        S::Future: Send,
    {
        let hook_ctx = HookContext::new(
            &verified,
            parts.method.clone(),
            parts.uri.clone(),
            scope.clone(),
            body.clone(),
        );
        let settlement = match self.settle(&verified, hook_ctx, deadline).await {
            Ok(settlement) => settlement,
            Err(err) => return Ok(Handled::aborted(self.error_response(&err))),
        };

        let headers = self.publish(&verified, &settlement, &scope, body);
        let mut response = inner.oneshot(Request::from_parts(parts, request_body)).await?;
        for (name, value) in &headers {
            response.headers_mut().insert(name, value.clone());
        }
        expose_payment_headers(response.headers_mut());
        Ok(Handled::new(Outcome::Continue, response))
    }

    async fn settle_after<S>(
        &self,
        verified: VerifiedPayment,
        mut parts: Parts,
        request_body: axum_core::body::Body,
        body: Bytes,
        scope: RequestScope,
        inner: S,
    ) -> Result<Handled, S::Error>
    where
        S: Service<Request, Response = Response> + Send,
        S::Future: Send,
    {
        let hook_ctx = HookContext::new(
            &verified,
            parts.method.clone(),
            parts.uri.clone(),
            scope.clone(),
            body.clone(),
        );
        parts.extensions.insert(verified.clone());

        let response = inner.oneshot(Request::from_parts(parts, request_body)).await?;
        let capture = ResponseCapture::new();
        if let Err(err) = capture.record(response).await {
            #[cfg(feature = "telemetry")]
            tracing::warn!(error = %err, "handler response body failed; not settling");
            capture.discard();
            return Ok(Handled::aborted(super::json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "error": "Handler response failed", "details": err.to_string() }),
            )));
        }

        let status = capture.status().unwrap_or(StatusCode::OK);
        if status.is_client_error() || status.is_server_error() {
            #[cfg(feature = "telemetry")]
            tracing::debug!(%status, "handler failed; skipping settlement");
            let outgoing = OutgoingResponse::new();
            capture.flush(&outgoing);
            return Ok(Handled::new(Outcome::Continue, outgoing.into_response()));
        }

        let deadline = self.deadline();
        let settlement = match self.settle(&verified, hook_ctx, deadline).await {
            Ok(settlement) => settlement,
            Err(err) => {
                capture.discard();
                return Ok(Handled::aborted(self.error_response(&err)));
            }
        };

        let headers = self.publish(&verified, &settlement, &scope, body);
        let outgoing = OutgoingResponse::new();
        capture.flush(&outgoing);
        for (name, value) in &headers {
            outgoing.insert_header(name.clone(), value.clone());
        }
        let mut response = outgoing.into_response();
        expose_payment_headers(response.headers_mut());
        Ok(Handled::new(Outcome::Continue, response))
    }

    /// Hook, replay claim, then settlement, all before `deadline`.
    async fn settle(
        &self,
        verified: &VerifiedPayment,
        hook_ctx: HookContext,
        deadline: Instant,
    ) -> Result<SettlementResult, SettlementError> {
        let timed_out = SettlementError::TimedOut(self.config.timeout);

        if let Some(hook) = &self.config.before_settle_hook {
            let decision = timeout_at(deadline, hook.run(hook_ctx))
                .await
                .map_err(|_| timed_out.clone())?;
            if let HookDecision::Veto(reason) = decision {
                #[cfg(feature = "telemetry")]
                tracing::warn!(%reason, "settlement vetoed");
                return Err(SettlementError::Vetoed(reason));
            }
        }

        if self
            .ledger
            .as_ref()
            .is_some_and(|ledger| !ledger.claim(&verified.payload, &verified.requirements))
        {
            #[cfg(feature = "telemetry")]
            tracing::warn!("payment authorization replayed");
            return Err(SettlementError::Replayed);
        }

        let result = timeout_at(
            deadline,
            self.engine
                .process_settlement(&verified.payload, &verified.requirements),
        )
        .await;

        match result {
            Ok(Ok(settlement)) if settlement.success() => Ok(settlement),
            Ok(Ok(settlement)) => {
                // Rejected outright: funds did not move.
                if let Some(ledger) = &self.ledger {
                    ledger.release(&verified.payload);
                }
                #[cfg(feature = "telemetry")]
                tracing::warn!(reason = settlement.error_reason(), "settlement rejected");
                Err(SettlementError::Failed(settlement.error_reason().to_owned()))
            }
            Ok(Err(err)) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %err, "settlement failed");
                Err(SettlementError::Failed(err.to_string()))
            }
            Err(_) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(timeout = ?self.config.timeout, "settlement timed out");
                Err(timed_out)
            }
        }
    }

    /// Stores [`PaymentData`] and returns the headers to send, after the
    /// settlement callback had its say.
    fn publish(
        &self,
        verified: &VerifiedPayment,
        settlement: &SettlementResult,
        scope: &RequestScope,
        body: Bytes,
    ) -> HeaderMap {
        #[cfg(feature = "telemetry")]
        tracing::info!(
            transaction = %settlement.response.transaction,
            network = %settlement.response.network,
            payer = settlement.response.payer.as_deref().unwrap_or_default(),
            "payment settled"
        );
        PaymentData::store(
            scope,
            PaymentData {
                payload: verified.payload.clone(),
                settlement: settlement.response.clone(),
                requirements: verified.requirements.clone(),
                verification: verified.verification.clone(),
                request_body: body,
            },
        );
        let mut headers = settlement.headers.clone();
        if let Some(handler) = &self.config.settlement_handler {
            handler(&settlement.response, &mut headers);
        }
        headers
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.timeout.min(MAX_DEADLINE)).unwrap_or(now)
    }

    fn error_response(&self, err: &SettlementError) -> Response {
        self.config
            .error_handler
            .as_ref()
            .map_or_else(|| err.to_response(), |handler| handler(err))
    }
}

fn expose_payment_headers(headers: &mut HeaderMap) {
    headers.append(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_PAYMENT_HEADERS),
    );
}
