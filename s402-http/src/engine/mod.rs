//! The protocol engine seam.
//!
//! The settlement orchestrator never talks to facilitators or decodes
//! payment headers itself. It asks a [`ProtocolEngine`] three questions per
//! request (does this route cost money, is the submitted payment good, settle
//! it) and sees the request only through the framework-neutral
//! [`HttpAdapter`].
//!
//! [`HttpResourceServer`] is the engine shipped with this crate.

mod adapter;
mod paywall;
mod resource;

pub use adapter::PartsAdapter;
pub use paywall::render_paywall;
pub use resource::HttpResourceServer;

use axum_core::body::Body;
use axum_core::response::Response;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, header};
use s402::error::PaymentError;
use s402::facilitator::BoxFuture;
use s402::proto::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};
use serde_json::Value;

use crate::error::HttpError;
use crate::scope::RequestScope;
use crate::types::PaywallConfig;

/// Read-only view of an inbound request handed to the engine.
pub trait HttpAdapter: Send + Sync {
    /// Returns a header value as a string, if present and visible ASCII.
    fn header(&self, name: &str) -> Option<&str>;

    /// Returns the request method.
    fn method(&self) -> &Method;

    /// Returns the request path without query.
    fn path(&self) -> &str;

    /// Returns the absolute request URL.
    fn url(&self) -> String;

    /// Returns the raw `Accept` header, or `""`.
    fn accept_header(&self) -> &str {
        self.header(header::ACCEPT.as_str()).unwrap_or_default()
    }

    /// Returns the raw `User-Agent` header, or `""`.
    fn user_agent(&self) -> &str {
        self.header(header::USER_AGENT.as_str()).unwrap_or_default()
    }

    /// Returns the captured request body.
    fn body(&self) -> &Bytes;

    /// Returns the request-scoped store.
    fn scope(&self) -> &RequestScope;
}

/// Body of an engine-produced response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// `application/json`.
    Json(Value),
    /// `text/html`, e.g. a browser paywall.
    Html(String),
    /// No body.
    Empty,
}

/// A response the engine wants sent instead of running the handler.
#[derive(Debug, Clone)]
pub struct ResponseInstructions {
    /// Status code, usually 402.
    pub status: StatusCode,
    /// Headers to send, e.g. `PAYMENT-REQUIRED`.
    pub headers: HeaderMap,
    /// Response body.
    pub body: ResponseBody,
}

impl ResponseInstructions {
    /// Builds a JSON response with no extra headers.
    #[must_use]
    pub fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Json(body),
        }
    }

    /// Converts the instructions into an HTTP response.
    #[must_use]
    pub fn into_response(self) -> Response {
        let (content_type, body) = match self.body {
            ResponseBody::Json(value) => (Some("application/json"), Body::from(value.to_string())),
            ResponseBody::Html(html) => (Some("text/html; charset=utf-8"), Body::from(html)),
            ResponseBody::Empty => (None, Body::empty()),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if let Some(content_type) = content_type {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                http::HeaderValue::from_static(content_type),
            );
        }
        response
    }
}

/// A payment that passed verification but has not been settled.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    /// The client's payload.
    pub payload: PaymentPayload,
    /// The requirements the payload satisfied.
    pub requirements: PaymentRequirements,
    /// The facilitator's verification result.
    pub verification: VerifyResponse,
}

/// Outcome of [`ProtocolEngine::process_request`].
#[derive(Debug)]
pub enum ProcessResult {
    /// The request does not need a payment.
    NoPaymentRequired,
    /// Discovery, a bad payment, or a server-side pricing problem.
    PaymentError(ResponseInstructions),
    /// The payment is valid and ready for settlement.
    PaymentVerified(VerifiedPayment),
}

/// Outcome of [`ProtocolEngine::process_settlement`].
#[derive(Debug, Clone)]
pub struct SettlementResult {
    /// Facilitator settlement response.
    pub response: SettleResponse,
    /// Headers to merge into the outgoing response on success.
    pub headers: HeaderMap,
}

impl SettlementResult {
    /// Returns `true` if funds moved.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.response.success
    }

    /// Returns the most specific failure description available.
    #[must_use]
    pub fn error_reason(&self) -> &str {
        self.response
            .error_message
            .as_deref()
            .or(self.response.error_reason.as_deref())
            .unwrap_or("unknown settlement error")
    }
}

/// Errors raised by a protocol engine outside the normal 402 flow.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Resource-server failure (initialization, facilitator call, pricing).
    #[error(transparent)]
    Payment(#[from] PaymentError),
    /// Header encoding failure.
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// The collaborator that owns every protocol decision.
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Syncs with facilitators. Called once at startup when enabled.
    fn initialize(&self) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Returns `true` if the request targets a paid route.
    ///
    /// Called before the body is read, so `ctx.body()` is empty here.
    fn requires_payment(&self, ctx: &dyn HttpAdapter) -> bool;

    /// Classifies and, when a payment is submitted, verifies the request.
    fn process_request<'a>(
        &'a self,
        ctx: &'a dyn HttpAdapter,
        paywall: Option<&'a PaywallConfig>,
    ) -> BoxFuture<'a, ProcessResult>;

    /// Settles a verified payment.
    ///
    /// A rejected settlement is `Ok` with `success == false`; `Err` means the
    /// outcome is unknown.
    fn process_settlement<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettlementResult, EngineError>>;
}

impl<T: ProtocolEngine> ProtocolEngine for std::sync::Arc<T> {
    fn initialize(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        (**self).initialize()
    }

    fn requires_payment(&self, ctx: &dyn HttpAdapter) -> bool {
        (**self).requires_payment(ctx)
    }

    fn process_request<'a>(
        &'a self,
        ctx: &'a dyn HttpAdapter,
        paywall: Option<&'a PaywallConfig>,
    ) -> BoxFuture<'a, ProcessResult> {
        (**self).process_request(ctx, paywall)
    }

    fn process_settlement<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettlementResult, EngineError>> {
        (**self).process_settlement(payload, requirements)
    }
}
