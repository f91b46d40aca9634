//! The route-table engine backed by a [`ResourceServer`].

use http::{HeaderMap, StatusCode};
use s402::facilitator::BoxFuture;
use s402::proto::{PaymentPayload, PaymentRequired, PaymentRequirements, ResourceInfo};
use s402::server::ResourceServer;
use serde_json::json;

use super::{
    EngineError, HttpAdapter, ProcessResult, ProtocolEngine, ResponseBody, ResponseInstructions,
    SettlementResult, VerifiedPayment, render_paywall,
};
use crate::constants::{PAYMENT_REQUIRED, PAYMENT_RESPONSE, PAYMENT_SIGNATURE};
use crate::headers::{decode_payment_signature, encode_payment_required, encode_payment_response};
use crate::types::{CompiledRoute, PaywallConfig, RouteConfig, RouteValidationError};

/// The HTTP protocol engine: route table plus a [`ResourceServer`].
///
/// ```rust
/// use s402::{ExactEvmScheme, ResourceServer};
/// use s402_http::engine::HttpResourceServer;
/// use s402_http::types::{PaymentOption, RouteConfig};
///
/// let server = ResourceServer::new().register("eip155:*", ExactEvmScheme::new());
/// let engine = HttpResourceServer::new(server)
///     .route(
///         "GET /weather",
///         RouteConfig::single(PaymentOption::exact("eip155:84532", "0xRecipient", "$0.01")),
///     )
///     .unwrap();
/// # let _ = engine;
/// ```
#[derive(Debug)]
pub struct HttpResourceServer {
    server: ResourceServer,
    routes: Vec<CompiledRoute>,
}

impl HttpResourceServer {
    /// Wraps a configured resource server with an empty route table.
    #[must_use]
    pub const fn new(server: ResourceServer) -> Self {
        Self {
            server,
            routes: Vec::new(),
        }
    }

    /// Protects a route. Earlier routes win when several patterns match.
    ///
    /// # Errors
    ///
    /// Returns [`RouteValidationError`] if the pattern is malformed or an
    /// option uses a scheme that is not registered for its network.
    pub fn route(mut self, pattern: &str, config: RouteConfig) -> Result<Self, RouteValidationError> {
        if let Some(option) = config
            .accepts
            .iter()
            .find(|o| !self.server.has_registered_scheme(&o.scheme, &o.network))
        {
            return Err(RouteValidationError::MissingScheme {
                pattern: pattern.to_owned(),
                scheme: option.scheme.clone(),
                network: option.network.clone(),
            });
        }
        self.routes.push(CompiledRoute::new(pattern, config)?);
        Ok(self)
    }

    /// Returns the underlying resource server.
    #[must_use]
    pub const fn server(&self) -> &ResourceServer {
        &self.server
    }

    fn find_route(&self, ctx: &dyn HttpAdapter) -> Option<&CompiledRoute> {
        self.routes
            .iter()
            .find(|route| route.matches(ctx.method(), ctx.path()))
    }

    async fn build_requirements(
        &self,
        route: &CompiledRoute,
        ctx: &dyn HttpAdapter,
    ) -> Result<Vec<PaymentRequirements>, ResponseInstructions> {
        let mut requirements = Vec::with_capacity(route.config.accepts.len());
        for option in &route.config.accepts {
            let price = option.price.resolve(ctx).await.map_err(|err| {
                #[cfg(feature = "telemetry")]
                tracing::warn!(route = %route.pattern, error = %err, "cannot quote a price");
                server_error("cannot quote a price", &err)
            })?;
            let config = option.to_resource_config(price);
            let built = self
                .server
                .build_payment_requirements(&config)
                .await
                .map_err(|err| server_error("Failed to build payment requirements", &err))?;
            requirements.push(built);
        }
        Ok(requirements)
    }

    async fn process(
        &self,
        ctx: &dyn HttpAdapter,
        paywall: Option<&PaywallConfig>,
    ) -> ProcessResult {
        let Some(route) = self.find_route(ctx) else {
            return ProcessResult::NoPaymentRequired;
        };

        if !self.server.is_initialized().await {
            if let Err(err) = self.server.initialize().await {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %err, "facilitator sync failed; retrying on next request");
                #[cfg(not(feature = "telemetry"))]
                let _ = err;
            }
        }

        let requirements = match self.build_requirements(route, ctx).await {
            Ok(requirements) => requirements,
            Err(response) => return ProcessResult::PaymentError(response),
        };
        let resource = ResourceInfo {
            url: route.config.resource.clone().unwrap_or_else(|| ctx.url()),
            description: route.config.description.clone(),
            mime_type: route.config.mime_type.clone(),
        };

        let payload = match ctx.header(PAYMENT_SIGNATURE.as_str()).map(decode_payment_signature) {
            None => {
                let required = self.server.create_payment_required(
                    requirements,
                    Some(resource),
                    Some("Payment required".to_owned()),
                );
                return ProcessResult::PaymentError(payment_required(
                    &required,
                    is_browser(ctx).then_some(paywall),
                ));
            }
            Some(Err(err)) => {
                let required = self.server.create_payment_required(
                    requirements,
                    Some(resource),
                    Some(format!("Invalid payment header: {err}")),
                );
                return ProcessResult::PaymentError(payment_required(&required, None));
            }
            Some(Ok(payload)) => payload,
        };

        let Some(matched) = self
            .server
            .find_matching_requirements(&requirements, &payload)
            .cloned()
        else {
            let required = self.server.create_payment_required(
                requirements,
                Some(resource),
                Some("No matching payment requirements".to_owned()),
            );
            return ProcessResult::PaymentError(payment_required(&required, None));
        };

        let error = match self.server.verify_payment(&payload, &matched).await {
            Ok(verification) if verification.is_valid => {
                return ProcessResult::PaymentVerified(VerifiedPayment {
                    payload,
                    requirements: matched,
                    verification,
                });
            }
            Ok(verification) => verification
                .invalid_message
                .or(verification.invalid_reason)
                .unwrap_or_else(|| "payment is invalid".to_owned()),
            Err(err) => format!("Verification failed: {err}"),
        };
        #[cfg(feature = "telemetry")]
        tracing::debug!(%error, "payment verification rejected");
        let required =
            self.server
                .create_payment_required(requirements, Some(resource), Some(error));
        ProcessResult::PaymentError(payment_required(&required, None))
    }
}

impl ProtocolEngine for HttpResourceServer {
    fn initialize(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move { self.server.initialize().await.map_err(EngineError::from) })
    }

    fn requires_payment(&self, ctx: &dyn HttpAdapter) -> bool {
        self.find_route(ctx).is_some()
    }

    fn process_request<'a>(
        &'a self,
        ctx: &'a dyn HttpAdapter,
        paywall: Option<&'a PaywallConfig>,
    ) -> BoxFuture<'a, ProcessResult> {
        Box::pin(self.process(ctx, paywall))
    }

    fn process_settlement<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettlementResult, EngineError>> {
        Box::pin(async move {
            let response = self.server.settle_payment(payload, requirements).await?;
            let mut headers = HeaderMap::new();
            if response.success {
                headers.insert(PAYMENT_RESPONSE, encode_payment_response(&response)?);
            }
            Ok(SettlementResult { response, headers })
        })
    }
}

fn is_browser(ctx: &dyn HttpAdapter) -> bool {
    ctx.accept_header().contains("text/html") && ctx.user_agent().contains("Mozilla")
}

/// 402 with the encoded `PAYMENT-REQUIRED` header. `paywall` is `Some` for
/// browsers, in which case the body is HTML.
fn payment_required(
    required: &PaymentRequired,
    paywall: Option<Option<&PaywallConfig>>,
) -> ResponseInstructions {
    let header = match encode_payment_required(required) {
        Ok(header) => header,
        Err(err) => return server_error("Failed to encode payment requirements", &err),
    };
    let body = match paywall {
        Some(config) => ResponseBody::Html(render_paywall(
            required,
            header.to_str().unwrap_or_default(),
            config,
        )),
        None => serde_json::to_value(required).map_or(ResponseBody::Empty, ResponseBody::Json),
    };
    let mut headers = HeaderMap::new();
    headers.insert(PAYMENT_REQUIRED, header);
    ResponseInstructions {
        status: StatusCode::PAYMENT_REQUIRED,
        headers,
        body,
    }
}

fn server_error(title: &str, err: &dyn std::fmt::Display) -> ResponseInstructions {
    ResponseInstructions::json(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": title, "details": err.to_string() }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PartsAdapter;
    use crate::headers::{decode_payment_required, encode_payment_signature};
    use crate::price::ContextPrice;
    use crate::scope::RequestScope;
    use crate::types::PaymentOption;
    use bytes::Bytes;
    use http::request::Parts;
    use s402::ExactEvmScheme;
    use s402::error::BoxError;
    use s402::facilitator::FacilitatorClient;
    use s402::proto::{SettleResponse, SupportedKind, SupportedResponse, VerifyResponse};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Facilitator {
        supported_calls: AtomicUsize,
        reject: bool,
    }

    impl FacilitatorClient for Facilitator {
        fn verify<'a>(
            &'a self,
            _payload: &'a PaymentPayload,
            _requirements: &'a PaymentRequirements,
        ) -> BoxFuture<'a, Result<VerifyResponse, BoxError>> {
            let response = if self.reject {
                VerifyResponse::invalid("invalid_signature", "signature does not match")
            } else {
                VerifyResponse::valid("0xPayer")
            };
            Box::pin(async move { Ok(response) })
        }

        fn settle<'a>(
            &'a self,
            _payload: &'a PaymentPayload,
            requirements: &'a PaymentRequirements,
        ) -> BoxFuture<'a, Result<SettleResponse, BoxError>> {
            let network = requirements.network.clone();
            Box::pin(async move { Ok(SettleResponse::success("0xabc", network, "0xPayer")) })
        }

        fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, BoxError>> {
            self.supported_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Ok(SupportedResponse {
                    kinds: vec![SupportedKind {
                        x402_version: 2,
                        scheme: "exact".into(),
                        network: "eip155:84532".into(),
                        extra: None,
                    }],
                    ..SupportedResponse::default()
                })
            })
        }
    }

    fn engine(facilitator: Arc<Facilitator>, price: impl Into<crate::price::PriceSource>) -> HttpResourceServer {
        let server = ResourceServer::new()
            .with_facilitator(facilitator)
            .register("eip155:*", ExactEvmScheme::new());
        HttpResourceServer::new(server)
            .route(
                "POST /checkout",
                RouteConfig::single(PaymentOption::exact(
                    "eip155:84532",
                    "0x2222222222222222222222222222222222222222",
                    price,
                ))
                .with_description("Order"),
            )
            .unwrap()
    }

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = http::Request::builder()
            .method("POST")
            .uri("/checkout")
            .header("host", "shop.example");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    async fn run(engine: &HttpResourceServer, parts: &Parts, scope: &RequestScope) -> ProcessResult {
        let body = Bytes::new();
        let ctx = PartsAdapter::new(parts, &body, scope);
        engine.process_request(&ctx, None).await
    }

    fn expect_error(result: ProcessResult) -> ResponseInstructions {
        match result {
            ProcessResult::PaymentError(instructions) => instructions,
            other => panic!("expected a payment error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn discovery_lists_requirements_and_initializes_lazily() {
        let facilitator = Arc::new(Facilitator::default());
        let engine = engine(Arc::clone(&facilitator), "$1.50");

        let result = expect_error(run(&engine, &parts(&[]), &RequestScope::new()).await);
        assert_eq!(result.status, StatusCode::PAYMENT_REQUIRED);
        let required =
            decode_payment_required(result.headers[PAYMENT_REQUIRED].to_str().unwrap()).unwrap();
        assert_eq!(required.accepts[0].amount, "1500000");
        assert_eq!(
            required.resource.unwrap().url,
            "http://shop.example/checkout"
        );
        assert!(matches!(result.body, ResponseBody::Json(_)));

        run(&engine, &parts(&[]), &RequestScope::new()).await;
        assert_eq!(facilitator.supported_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn browsers_get_the_paywall() {
        let engine = engine(Arc::new(Facilitator::default()), "$1.50");
        let parts = parts(&[
            ("accept", "text/html,application/xhtml+xml"),
            ("user-agent", "Mozilla/5.0"),
        ]);
        let result = expect_error(run(&engine, &parts, &RequestScope::new()).await);
        assert!(matches!(result.body, ResponseBody::Html(ref html) if html.contains("Order")));
    }

    #[tokio::test]
    async fn missing_context_price_is_a_server_error() {
        let engine = engine(Arc::new(Facilitator::default()), ContextPrice::new("x402:price"));
        let result = expect_error(run(&engine, &parts(&[]), &RequestScope::new()).await);
        assert_eq!(result.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(
            result.body,
            ResponseBody::Json(ref body) if body["error"] == "cannot quote a price"
        ));
    }

    async fn signed_header(engine: &HttpResourceServer, amount_override: Option<&str>) -> String {
        let scope = RequestScope::new();
        let discovery = expect_error(run(engine, &parts(&[]), &scope).await);
        let required =
            decode_payment_required(discovery.headers[PAYMENT_REQUIRED].to_str().unwrap()).unwrap();
        let mut accepted = required.accepts[0].clone();
        if let Some(amount) = amount_override {
            accepted.amount = amount.to_owned();
        }
        let payload = PaymentPayload {
            x402_version: 2,
            payload: json!({ "signature": "0x01" }),
            accepted,
            resource: None,
            extensions: None,
        };
        encode_payment_signature(&payload)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned()
    }

    #[tokio::test]
    async fn valid_signature_is_verified() {
        let engine = engine(Arc::new(Facilitator::default()), "$1.50");
        let header = signed_header(&engine, None).await;
        let result = run(&engine, &parts(&[("payment-signature", &header)]), &RequestScope::new()).await;
        let ProcessResult::PaymentVerified(verified) = result else {
            panic!("expected verified payment");
        };
        assert_eq!(verified.requirements.amount, "1500000");
        assert_eq!(verified.verification.payer.as_deref(), Some("0xPayer"));

        let settled = engine
            .process_settlement(&verified.payload, &verified.requirements)
            .await
            .unwrap();
        assert!(settled.success());
        assert!(settled.headers.contains_key(PAYMENT_RESPONSE));
    }

    #[tokio::test]
    async fn underpaying_payload_does_not_match() {
        let engine = engine(Arc::new(Facilitator::default()), "$1.50");
        let header = signed_header(&engine, Some("1")).await;
        let result = expect_error(
            run(&engine, &parts(&[("payment-signature", &header)]), &RequestScope::new()).await,
        );
        let required =
            decode_payment_required(result.headers[PAYMENT_REQUIRED].to_str().unwrap()).unwrap();
        assert_eq!(required.error.as_deref(), Some("No matching payment requirements"));
    }

    #[tokio::test]
    async fn invalid_signature_reports_reason() {
        let engine = engine(
            Arc::new(Facilitator {
                reject: true,
                ..Facilitator::default()
            }),
            "$1.50",
        );
        let header = signed_header(&engine, None).await;
        let result = expect_error(
            run(&engine, &parts(&[("payment-signature", &header)]), &RequestScope::new()).await,
        );
        let required =
            decode_payment_required(result.headers[PAYMENT_REQUIRED].to_str().unwrap()).unwrap();
        assert_eq!(required.error.as_deref(), Some("signature does not match"));
    }

    #[test]
    fn unregistered_scheme_is_rejected_at_configuration() {
        let engine = HttpResourceServer::new(ResourceServer::new());
        let err = engine
            .route(
                "GET /x",
                RouteConfig::single(PaymentOption::exact("solana:mainnet", "addr", "1")),
            )
            .unwrap_err();
        assert!(matches!(err, RouteValidationError::MissingScheme { .. }));
    }
}
