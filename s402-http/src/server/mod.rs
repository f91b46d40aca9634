//! Settlement middleware for axum.
//!
//! [`PaymentLayer`] wraps routes in the [`Orchestrator`], which decides per
//! request whether payment is needed, verifies it through a
//! [`ProtocolEngine`](crate::engine::ProtocolEngine), and settles before or
//! after the handler.
//!
//! ## Settlement timing
//!
//! - [`SettlementTiming::Before`]: settle first. A failed or vetoed
//!   settlement means the handler never runs. Use it when the handler has
//!   side effects such as creating an order.
//! - [`SettlementTiming::After`] (default): run the handler with its
//!   response buffered, settle, then deliver. A handler status of 400 or
//!   above is delivered as-is without settling; a failed settlement
//!   discards the buffered response.
//!
//! Handlers read the settled payment with [`Payment`] or
//! [`PaymentData::get`]. In after-timing, the unsettled
//! [`VerifiedPayment`](crate::engine::VerifiedPayment) is available as a
//! request extension.

mod body;
mod capture;
mod config;
mod error;
mod hooks;
mod layer;
mod orchestrator;
mod payment_data;
mod replay;

pub use body::{BodyCaptureError, DEFAULT_MAX_BODY_BYTES, capture_body};
pub use capture::{OutgoingResponse, ResponseCapture, ResponseWriter};
pub use config::{
    DEFAULT_TIMEOUT, ErrorHandler, MiddlewareConfig, MiddlewareSettings, SettlementHandler,
    SettlementTiming, UnknownTiming,
};
pub use error::SettlementError;
pub use hooks::{BeforeSettleHook, HookContext, HookDecision};
pub use layer::{PaymentLayer, PaymentService};
pub use orchestrator::{Handled, Orchestrator, Outcome};
pub use payment_data::{MissingPayment, PAYMENT_DATA_KEY, Payment, PaymentData};
pub use replay::{MAX_CLAIM_TTL, SettlementLedger};

use axum_core::body::Body;
use axum_core::response::Response;
use http::{HeaderValue, StatusCode, header};
use serde_json::Value;

pub(crate) fn json_response(status: StatusCode, body: &Value) -> Response {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
