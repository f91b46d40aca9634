//! Settled-payment data for handlers.
//!
//! The orchestrator stores a [`PaymentData`] in the request scope the moment
//! settlement succeeds. Before that, lookups return `None`.

use std::sync::Arc;

use axum_core::extract::{FromRequestParts, OptionalFromRequestParts};
use axum_core::response::{IntoResponse, Response};
use bytes::Bytes;
use http::StatusCode;
use http::request::Parts;
use s402::proto::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::scope::RequestScope;

/// Scope key under which [`PaymentData`] is stored.
pub const PAYMENT_DATA_KEY: &str = "s402.payment_data";

/// A settled payment, as seen by the handler.
#[derive(Debug, Clone)]
pub struct PaymentData {
    /// The client's payload.
    pub payload: PaymentPayload,
    /// The facilitator's settlement result.
    pub settlement: SettleResponse,
    /// The requirements the payment satisfied.
    pub requirements: PaymentRequirements,
    /// The facilitator's verification result.
    pub verification: VerifyResponse,
    /// The raw request body as received.
    pub request_body: Bytes,
}

impl PaymentData {
    /// Deserializes the captured body as JSON. An empty body is `None`.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for a non-empty body that does not decode.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        if self.request_body.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&self.request_body).map(Some)
    }

    /// Stores `data` in `scope`, replacing any previous value.
    pub fn store(scope: &RequestScope, data: Self) {
        scope.insert(PAYMENT_DATA_KEY, data);
    }

    /// Returns the settled payment, or `None` if settlement has not succeeded.
    #[must_use]
    pub fn get(scope: &RequestScope) -> Option<Arc<Self>> {
        scope.get::<Self>(PAYMENT_DATA_KEY)
    }

    /// Reads the settled payment from request extensions.
    #[must_use]
    pub fn from_extensions(extensions: &http::Extensions) -> Option<Arc<Self>> {
        RequestScope::from_extensions(extensions).and_then(|scope| Self::get(&scope))
    }
}

/// Extractor for the settled payment.
///
/// Rejects with 500 when used on a route without settled payment, which is
/// a wiring error. Use `Option<Payment>` to check instead.
#[derive(Debug, Clone)]
pub struct Payment(pub Arc<PaymentData>);

/// Rejection for [`Payment`].
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("no settled payment for this request")]
pub struct MissingPayment;

impl IntoResponse for MissingPayment {
    fn into_response(self) -> Response {
        crate::server::json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &json!({ "error": self.to_string() }),
        )
    }
}

impl<S: Sync> FromRequestParts<S> for Payment {
    type Rejection = MissingPayment;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        PaymentData::from_extensions(&parts.extensions)
            .map(Self)
            .ok_or(MissingPayment)
    }
}

impl<S: Sync> OptionalFromRequestParts<S> for Payment {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(PaymentData::from_extensions(&parts.extensions).map(Self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn data(body: &'static [u8]) -> PaymentData {
        let requirements = PaymentRequirements {
            scheme: "exact".into(),
            network: "eip155:84532".into(),
            asset: "0xA".into(),
            amount: "1500000".into(),
            pay_to: "0xB".into(),
            max_timeout_seconds: 300,
            extra: json!({}),
        };
        PaymentData {
            payload: PaymentPayload {
                x402_version: 2,
                payload: json!({}),
                accepted: requirements.clone(),
                resource: None,
                extensions: None,
            },
            settlement: SettleResponse::success("0xabc", "eip155:84532", "0xPayer"),
            requirements,
            verification: VerifyResponse::valid("0xPayer"),
            request_body: Bytes::from_static(body),
        }
    }

    #[test]
    fn absent_until_stored() {
        let scope = RequestScope::new();
        assert!(PaymentData::get(&scope).is_none());

        PaymentData::store(&scope, data(b""));
        assert_eq!(
            PaymentData::get(&scope).unwrap().settlement.transaction,
            "0xabc"
        );
    }

    #[test]
    fn body_decodes_as_json() {
        #[derive(Deserialize)]
        struct Order {
            sku: String,
        }
        let order: Option<Order> = data(br#"{"sku":"A"}"#).decode_body().unwrap();
        assert_eq!(order.unwrap().sku, "A");
        assert!(data(b"").decode_body::<Order>().unwrap().is_none());
        assert!(data(b"not json").decode_body::<Order>().is_err());
    }

    #[tokio::test]
    async fn extractor_reads_extensions() {
        let (mut parts, ()) = http::Request::new(()).into_parts();
        assert!(
            <Payment as FromRequestParts<()>>::from_request_parts(&mut parts, &())
                .await
                .is_err()
        );

        let scope = RequestScope::ensure(&mut parts.extensions);
        PaymentData::store(&scope, data(b""));
        let Payment(payment) =
            <Payment as FromRequestParts<()>>::from_request_parts(&mut parts, &())
                .await
                .unwrap();
        assert_eq!(payment.settlement.payer.as_deref(), Some("0xPayer"));
    }
}
