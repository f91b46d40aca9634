//! The facilitator seam.
//!
//! Resource servers never touch a chain. They hand verification and
//! settlement to a facilitator through [`FacilitatorClient`]; the HTTP
//! implementation lives in `s402-http`, tests use in-process doubles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BoxError;
use crate::proto::{PaymentPayload, PaymentRequirements, SettleResponse, SupportedResponse, VerifyResponse};

/// A pinned, boxed, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async client for a remote facilitator.
///
/// Methods return [`BoxFuture`] so the trait stays dyn-compatible and a
/// resource server can hold several heterogeneous clients.
pub trait FacilitatorClient: Send + Sync {
    /// Verifies a payment without moving funds.
    fn verify<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<VerifyResponse, BoxError>>;

    /// Settles a verified payment on-chain.
    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettleResponse, BoxError>>;

    /// Lists the (scheme, network) pairs this facilitator handles.
    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, BoxError>>;
}

impl<T: FacilitatorClient + ?Sized> FacilitatorClient for Arc<T> {
    fn verify<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<VerifyResponse, BoxError>> {
        (**self).verify(payload, requirements)
    }

    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettleResponse, BoxError>> {
        (**self).settle(payload, requirements)
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, BoxError>> {
        (**self).supported()
    }
}
