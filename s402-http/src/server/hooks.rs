//! The before-settle hook.
//!
//! Runs once per paid request, after the payment verified and before any
//! funds move. A veto stops settlement for that request; the client gets a
//! 402 with the hook's reason. Typical use is re-checking something
//! perishable, such as stock, that was validated before the client paid.

use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Uri};
use s402::facilitator::BoxFuture;
use s402::proto::{PaymentPayload, PaymentRequirements, VerifyResponse};

use crate::engine::VerifiedPayment;
use crate::scope::RequestScope;

/// Whether settlement may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Settle.
    Continue,
    /// Do not settle; the reason is shown to the client.
    Veto(String),
}

impl HookDecision {
    /// Vetoes with `reason`.
    #[must_use]
    pub fn veto(reason: impl Into<String>) -> Self {
        Self::Veto(reason.into())
    }
}

/// What the hook sees.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// The facilitator's verification result.
    pub verification: VerifyResponse,
    /// The client's payment payload.
    pub payload: PaymentPayload,
    /// The requirements the payment satisfies.
    pub requirements: PaymentRequirements,
    /// Request method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Values stored by upstream stages for this request.
    pub scope: RequestScope,
    /// The captured request body.
    pub body: Bytes,
}

impl HookContext {
    pub(crate) fn new(
        verified: &VerifiedPayment,
        method: Method,
        uri: Uri,
        scope: RequestScope,
        body: Bytes,
    ) -> Self {
        Self {
            verification: verified.verification.clone(),
            payload: verified.payload.clone(),
            requirements: verified.requirements.clone(),
            method,
            uri,
            scope,
            body,
        }
    }
}

type HookFn = dyn Fn(HookContext) -> BoxFuture<'static, HookDecision> + Send + Sync;

/// A user-supplied veto point between verification and settlement.
#[derive(Clone)]
pub struct BeforeSettleHook {
    hook: Arc<HookFn>,
}

impl fmt::Debug for BeforeSettleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeforeSettleHook").finish_non_exhaustive()
    }
}

impl BeforeSettleHook {
    /// Wraps an async hook.
    pub fn new<F, Fut>(hook: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookDecision> + Send + 'static,
    {
        Self {
            hook: Arc::new(move |ctx| Box::pin(hook(ctx))),
        }
    }

    /// Wraps a synchronous check; an `Err` becomes a veto with its message.
    ///
    /// ```rust
    /// use s402_http::server::BeforeSettleHook;
    ///
    /// let hook = BeforeSettleHook::from_validation(|ctx| {
    ///     if ctx.scope.contains_key("cart.reserved") {
    ///         Ok(())
    ///     } else {
    ///         Err("cart reservation expired")
    ///     }
    /// });
    /// # let _ = hook;
    /// ```
    pub fn from_validation<F, E>(check: F) -> Self
    where
        F: Fn(&HookContext) -> Result<(), E> + Send + Sync + 'static,
        E: Display,
    {
        Self {
            hook: Arc::new(move |ctx| {
                let decision = match check(&ctx) {
                    Ok(()) => HookDecision::Continue,
                    Err(err) => HookDecision::Veto(err.to_string()),
                };
                Box::pin(async move { decision })
            }),
        }
    }

    /// Runs the hook.
    pub async fn run(&self, ctx: HookContext) -> HookDecision {
        (self.hook)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> HookContext {
        let requirements = PaymentRequirements {
            scheme: "exact".into(),
            network: "eip155:84532".into(),
            asset: "0xA".into(),
            amount: "1500000".into(),
            pay_to: "0xB".into(),
            max_timeout_seconds: 300,
            extra: json!({}),
        };
        let verified = VerifiedPayment {
            payload: PaymentPayload {
                x402_version: 2,
                payload: json!({}),
                accepted: requirements.clone(),
                resource: None,
                extensions: None,
            },
            requirements,
            verification: VerifyResponse::valid("0xPayer"),
        };
        HookContext::new(
            &verified,
            Method::POST,
            Uri::from_static("/checkout"),
            RequestScope::new(),
            Bytes::from_static(b"{\"sku\":\"A\"}"),
        )
    }

    #[tokio::test]
    async fn validation_error_becomes_veto() {
        let hook = BeforeSettleHook::from_validation(|ctx| {
            if ctx.scope.contains_key("stock") {
                Ok(())
            } else {
                Err("item out of stock")
            }
        });
        let ctx = context();
        assert_eq!(
            hook.run(ctx.clone()).await,
            HookDecision::veto("item out of stock")
        );

        ctx.scope.insert("stock", 3_u32);
        assert_eq!(hook.run(ctx).await, HookDecision::Continue);
    }

    #[tokio::test]
    async fn async_hook_sees_payer_and_body() {
        let hook = BeforeSettleHook::new(|ctx: HookContext| async move {
            if ctx.verification.payer.as_deref() == Some("0xPayer") && !ctx.body.is_empty() {
                HookDecision::Continue
            } else {
                HookDecision::veto("unexpected payer")
            }
        });
        assert_eq!(hook.run(context()).await, HookDecision::Continue);
    }
}
