//! Errors that stop a verified payment from being settled.

use std::time::Duration;

use axum_core::response::Response;
use http::StatusCode;
use serde_json::json;

/// Why a verified payment was not settled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    /// The before-settle hook vetoed.
    #[error("Pre-settlement validation failed: {0}")]
    Vetoed(String),
    /// The facilitator rejected the settlement or could not be reached.
    #[error("Settlement failed: {0}")]
    Failed(String),
    /// The engine did not answer within the request deadline.
    #[error("Settlement failed: timed out after {0:?}")]
    TimedOut(Duration),
    /// The authorization was already submitted for settlement.
    #[error("Settlement failed: payment authorization already used")]
    Replayed,
}

impl SettlementError {
    /// The `error` field of the default response body.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::Vetoed(_) => "Pre-settlement validation failed",
            Self::Failed(_) | Self::TimedOut(_) | Self::Replayed => "Settlement failed",
        }
    }

    /// The `details` field of the default response body.
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::Vetoed(reason) | Self::Failed(reason) => reason.clone(),
            Self::TimedOut(timeout) => format!("timed out after {}s", timeout.as_secs_f32()),
            Self::Replayed => "payment authorization already used".to_owned(),
        }
    }

    /// The default 402 JSON response.
    #[must_use]
    pub fn to_response(&self) -> Response {
        crate::server::json_response(
            StatusCode::PAYMENT_REQUIRED,
            &json!({ "error": self.title(), "details": self.details() }),
        )
    }
}
