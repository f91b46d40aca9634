//! Error types for the resource-server side of x402.

use std::fmt;

/// A boxed error from a pluggable component such as a facilitator client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building requirements or delegating verify/settle.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// [`ResourceServer::initialize`](crate::server::ResourceServer::initialize) has not succeeded yet.
    #[error("resource server is not initialized; facilitator support is unknown")]
    NotInitialized,

    /// No scheme server registered for the scheme/network pair.
    #[error(transparent)]
    SchemeNotFound(#[from] SchemeNotFoundError),

    /// No facilitator advertised support for the scheme/network pair.
    #[error("no facilitator supports scheme '{scheme}' on network '{network}'")]
    Unsupported {
        /// The requested scheme.
        scheme: String,
        /// The requested network.
        network: String,
    },

    /// The configured price could not be turned into an asset amount.
    #[error(transparent)]
    Price(#[from] PriceParseError),

    /// A facilitator call failed at the transport level.
    #[error("facilitator request failed: {0}")]
    Facilitator(#[source] BoxError),
}

/// No scheme server registered for a scheme/network combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeNotFoundError {
    /// The requested scheme.
    pub scheme: String,
    /// The requested network.
    pub network: String,
}

impl SchemeNotFoundError {
    /// Creates a new scheme-not-found error.
    #[must_use]
    pub fn new(scheme: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            network: network.into(),
        }
    }
}

impl fmt::Display for SchemeNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no scheme '{}' registered for network '{}'",
            self.scheme, self.network
        )
    }
}

impl std::error::Error for SchemeNotFoundError {}

/// Errors turning a configured price into a token amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceParseError {
    /// The money string is not a decimal number.
    #[error("invalid money amount '{0}'")]
    InvalidMoney(String),

    /// Prices must be positive.
    #[error("price must be greater than zero, got '{0}'")]
    NotPositive(String),

    /// The amount has more fractional digits than the asset supports.
    #[error("price '{price}' has more than {decimals} decimal places")]
    TooPrecise {
        /// The offending price.
        price: String,
        /// Decimals supported by the asset.
        decimals: u32,
    },

    /// The amount does not fit the asset's integer representation.
    #[error("price '{0}' is out of range")]
    Overflow(String),

    /// No default asset is known for the network and no money parser matched.
    #[error("no default asset for network '{0}'")]
    UnsupportedNetwork(String),

    /// An explicit asset amount was given without an asset address.
    #[error("asset address is required for an explicit asset amount")]
    MissingAsset,
}
