//! Resource-server logic: scheme registration, facilitator discovery,
//! requirement building and verify/settle delegation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::ResourceConfig;
use crate::error::{PaymentError, SchemeNotFoundError};
use crate::facilitator::FacilitatorClient;
use crate::proto::{
    DEFAULT_MAX_TIMEOUT_SECONDS, Network, PaymentPayload, PaymentRequired, PaymentRequirements,
    ResourceInfo, SettleResponse, SupportedKind, VerifyResponse, X402_VERSION,
};
use crate::scheme::{AssetAmount, SchemeServer};

/// Which facilitator serves which (scheme, network), learned from `/supported`.
#[derive(Debug, Default)]
struct SupportIndex {
    entries: Vec<(usize, SupportedKind)>,
}

impl SupportIndex {
    /// Exact network matches win over wildcards; earlier facilitators win ties.
    fn find(&self, scheme: &str, network: &str) -> Option<&(usize, SupportedKind)> {
        self.entries
            .iter()
            .find(|(_, kind)| kind.scheme == scheme && kind.network == network)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(_, kind)| kind.covers(scheme, network))
            })
    }
}

/// Builds payment requirements and delegates verification and settlement
/// to facilitators.
///
/// Schemes are registered per network (exact CAIP-2 id or `namespace:*`).
/// [`initialize`](Self::initialize) asks every facilitator what it supports;
/// until it succeeds, requirement building and verify/settle fail with
/// [`PaymentError::NotInitialized`]. Initialization can be retried at any time
/// through a shared reference.
pub struct ResourceServer {
    facilitators: Vec<Arc<dyn FacilitatorClient>>,
    schemes: HashMap<Network, HashMap<String, Box<dyn SchemeServer>>>,
    support: RwLock<Option<SupportIndex>>,
}

impl fmt::Debug for ResourceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceServer")
            .field("facilitators", &self.facilitators.len())
            .field("networks", &self.schemes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for ResourceServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceServer {
    /// Creates a server with no facilitators and no schemes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            facilitators: Vec::new(),
            schemes: HashMap::new(),
            support: RwLock::new(None),
        }
    }

    /// Adds a facilitator. Earlier facilitators take precedence.
    #[must_use]
    pub fn with_facilitator(mut self, client: impl FacilitatorClient + 'static) -> Self {
        self.facilitators.push(Arc::new(client));
        self
    }

    /// Registers a scheme server for a network or `namespace:*` pattern.
    #[must_use]
    pub fn register(
        mut self,
        network: impl Into<Network>,
        server: impl SchemeServer + 'static,
    ) -> Self {
        let scheme = server.scheme().to_owned();
        self.schemes
            .entry(network.into())
            .or_default()
            .insert(scheme, Box::new(server));
        self
    }

    /// Returns `true` if a scheme server handles `scheme` on `network`.
    #[must_use]
    pub fn has_registered_scheme(&self, scheme: &str, network: &str) -> bool {
        self.scheme_server(scheme, network).is_ok()
    }

    /// Returns `true` once [`initialize`](Self::initialize) has succeeded.
    pub async fn is_initialized(&self) -> bool {
        self.support.read().await.is_some()
    }

    /// Fetches `/supported` from every facilitator and indexes the result.
    ///
    /// The previous index is kept if any facilitator fails.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Facilitator`] if a facilitator cannot be reached.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "s402.resource_server.initialize", skip_all, err)
    )]
    pub async fn initialize(&self) -> Result<(), PaymentError> {
        let mut index = SupportIndex::default();
        for (idx, client) in self.facilitators.iter().enumerate() {
            let supported = client.supported().await.map_err(PaymentError::Facilitator)?;
            index.entries.extend(
                supported
                    .kinds
                    .into_iter()
                    .filter(|kind| kind.x402_version == X402_VERSION)
                    .map(|kind| (idx, kind)),
            );
        }
        #[cfg(feature = "telemetry")]
        tracing::debug!(kinds = index.entries.len(), "facilitator support indexed");
        *self.support.write().await = Some(index);
        Ok(())
    }

    /// Builds the requirements a client must satisfy for one payment option.
    ///
    /// # Errors
    ///
    /// Fails if the server is not initialized, no scheme server or facilitator
    /// handles the scheme/network, or the price cannot be parsed.
    pub async fn build_payment_requirements(
        &self,
        config: &ResourceConfig,
    ) -> Result<PaymentRequirements, PaymentError> {
        let server = self.scheme_server(&config.scheme, &config.network)?;

        let guard = self.support.read().await;
        let index = guard.as_ref().ok_or(PaymentError::NotInitialized)?;
        let (_, kind) = index
            .find(&config.scheme, &config.network)
            .ok_or_else(|| PaymentError::Unsupported {
                scheme: config.scheme.clone(),
                network: config.network.clone(),
            })?;

        let AssetAmount {
            amount,
            asset,
            extra,
        } = server.parse_price(&config.price, &config.network)?;

        let mut merged = match extra {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(Value::Object(overrides)) = &config.extra {
            merged.extend(overrides.clone());
        }

        let base = PaymentRequirements {
            scheme: config.scheme.clone(),
            network: config.network.clone(),
            asset,
            amount,
            pay_to: config.pay_to.clone(),
            max_timeout_seconds: config
                .max_timeout_seconds
                .unwrap_or(DEFAULT_MAX_TIMEOUT_SECONDS),
            extra: Value::Object(merged),
        };
        Ok(server.enhance_requirements(base, kind))
    }

    /// Assembles a 402 body from requirements.
    #[must_use]
    pub const fn create_payment_required(
        &self,
        accepts: Vec<PaymentRequirements>,
        resource: Option<ResourceInfo>,
        error: Option<String>,
    ) -> PaymentRequired {
        PaymentRequired {
            x402_version: X402_VERSION,
            error,
            resource,
            accepts,
            extensions: None,
        }
    }

    /// Finds the requirement the client's payload claims to satisfy.
    #[must_use]
    pub fn find_matching_requirements<'a>(
        &self,
        available: &'a [PaymentRequirements],
        payload: &PaymentPayload,
    ) -> Option<&'a PaymentRequirements> {
        available
            .iter()
            .find(|requirements| requirements.same_terms(&payload.accepted))
    }

    /// Verifies a payment with the facilitator serving its scheme and network.
    ///
    /// # Errors
    ///
    /// Fails if no facilitator serves the pair or the facilitator call fails.
    /// An invalid payment is an `Ok` response with `is_valid == false`.
    pub async fn verify_payment(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, PaymentError> {
        let client = self.facilitator_for(requirements).await?;
        client
            .verify(payload, requirements)
            .await
            .map_err(PaymentError::Facilitator)
    }

    /// Settles a payment with the facilitator serving its scheme and network.
    ///
    /// # Errors
    ///
    /// Fails if no facilitator serves the pair or the facilitator call fails.
    /// A rejected settlement is an `Ok` response with `success == false`.
    pub async fn settle_payment(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, PaymentError> {
        let client = self.facilitator_for(requirements).await?;
        client
            .settle(payload, requirements)
            .await
            .map_err(PaymentError::Facilitator)
    }

    fn scheme_server(
        &self,
        scheme: &str,
        network: &str,
    ) -> Result<&dyn SchemeServer, SchemeNotFoundError> {
        let wildcard = network
            .split_once(':')
            .map(|(namespace, _)| format!("{namespace}:*"));
        self.schemes
            .get(network)
            .and_then(|schemes| schemes.get(scheme))
            .or_else(|| {
                wildcard
                    .as_deref()
                    .and_then(|w| self.schemes.get(w))
                    .and_then(|schemes| schemes.get(scheme))
            })
            .map(|server| &**server)
            .ok_or_else(|| SchemeNotFoundError::new(scheme, network))
    }

    async fn facilitator_for(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<Arc<dyn FacilitatorClient>, PaymentError> {
        let guard = self.support.read().await;
        let index = guard.as_ref().ok_or(PaymentError::NotInitialized)?;
        let (idx, _) = index
            .find(&requirements.scheme, &requirements.network)
            .ok_or_else(|| PaymentError::Unsupported {
                scheme: requirements.scheme.clone(),
                network: requirements.network.clone(),
            })?;
        self.facilitators
            .get(*idx)
            .cloned()
            .ok_or_else(|| PaymentError::Unsupported {
                scheme: requirements.scheme.clone(),
                network: requirements.network.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::facilitator::BoxFuture;
    use crate::proto::SupportedResponse;
    use crate::scheme::ExactEvmScheme;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFacilitator {
        network: &'static str,
        settles: AtomicUsize,
        reachable: bool,
    }

    impl StubFacilitator {
        fn new(network: &'static str) -> Self {
            Self {
                network,
                settles: AtomicUsize::new(0),
                reachable: true,
            }
        }
    }

    impl FacilitatorClient for StubFacilitator {
        fn verify<'a>(
            &'a self,
            _payload: &'a PaymentPayload,
            _requirements: &'a PaymentRequirements,
        ) -> BoxFuture<'a, Result<VerifyResponse, BoxError>> {
            Box::pin(async { Ok(VerifyResponse::valid("0xPayer")) })
        }

        fn settle<'a>(
            &'a self,
            _payload: &'a PaymentPayload,
            requirements: &'a PaymentRequirements,
        ) -> BoxFuture<'a, Result<SettleResponse, BoxError>> {
            Box::pin(async move {
                self.settles.fetch_add(1, Ordering::SeqCst);
                Ok(SettleResponse::success("0xtx", &requirements.network, "0xPayer"))
            })
        }

        fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, BoxError>> {
            Box::pin(async move {
                if !self.reachable {
                    return Err("connection refused".into());
                }
                Ok(SupportedResponse {
                    kinds: vec![SupportedKind {
                        x402_version: 2,
                        scheme: "exact".into(),
                        network: self.network.into(),
                        extra: None,
                    }],
                    ..SupportedResponse::default()
                })
            })
        }
    }

    fn config() -> ResourceConfig {
        ResourceConfig::new(
            "exact",
            "eip155:84532",
            "0x2222222222222222222222222222222222222222",
            "$1.50",
        )
    }

    #[tokio::test]
    async fn builds_requirements_after_initialize() {
        let server = ResourceServer::new()
            .with_facilitator(StubFacilitator::new("eip155:*"))
            .register("eip155:*", ExactEvmScheme::new());

        assert!(matches!(
            server.build_payment_requirements(&config()).await,
            Err(PaymentError::NotInitialized)
        ));

        server.initialize().await.unwrap();
        let requirements = server.build_payment_requirements(&config()).await.unwrap();
        assert_eq!(requirements.amount, "1500000");
        assert_eq!(requirements.max_timeout_seconds, 300);
        assert_eq!(requirements.extra["version"], json!("2"));
    }

    #[tokio::test]
    async fn unsupported_network_is_reported() {
        let server = ResourceServer::new()
            .with_facilitator(StubFacilitator::new("eip155:8453"))
            .register("eip155:*", ExactEvmScheme::new());
        server.initialize().await.unwrap();

        let err = server
            .build_payment_requirements(&config())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn failed_initialize_keeps_server_uninitialized() {
        let mut facilitator = StubFacilitator::new("eip155:84532");
        facilitator.reachable = false;
        let server = ResourceServer::new()
            .with_facilitator(facilitator)
            .register("eip155:84532", ExactEvmScheme::new());

        assert!(server.initialize().await.is_err());
        assert!(!server.is_initialized().await);
    }

    #[tokio::test]
    async fn first_facilitator_wins_settlement() {
        let first = Arc::new(StubFacilitator::new("eip155:84532"));
        let second = Arc::new(StubFacilitator::new("eip155:84532"));
        let server = ResourceServer::new()
            .with_facilitator(Arc::clone(&first))
            .with_facilitator(Arc::clone(&second))
            .register("eip155:84532", ExactEvmScheme::new());
        server.initialize().await.unwrap();

        let requirements = server.build_payment_requirements(&config()).await.unwrap();
        let payload = PaymentPayload {
            x402_version: 2,
            payload: json!({}),
            accepted: requirements.clone(),
            resource: None,
            extensions: None,
        };
        let settled = server.settle_payment(&payload, &requirements).await.unwrap();
        assert!(settled.success);
        assert_eq!(first.settles.load(Ordering::SeqCst), 1);
        assert_eq!(second.settles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn matching_requires_identical_terms() {
        let server = ResourceServer::new()
            .with_facilitator(StubFacilitator::new("eip155:84532"))
            .register("eip155:84532", ExactEvmScheme::new());
        server.initialize().await.unwrap();
        let requirements = server.build_payment_requirements(&config()).await.unwrap();

        let mut accepted = requirements.clone();
        accepted.amount = "1".into();
        let payload = PaymentPayload {
            x402_version: 2,
            payload: json!({}),
            accepted,
            resource: None,
            extensions: None,
        };
        let available = [requirements];
        assert!(server.find_matching_requirements(&available, &payload).is_none());
    }

    #[test]
    fn wildcard_registration_resolves_concrete_network() {
        let server = ResourceServer::new().register("eip155:*", ExactEvmScheme::new());
        assert!(server.has_registered_scheme("exact", "eip155:1"));
        assert!(!server.has_registered_scheme("exact", "solana:mainnet"));
    }
}
