//! Per-resource payment configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::proto::Network;
use crate::scheme::Price;

/// What a resource server charges for one accepted payment option.
///
/// ```rust
/// use s402::config::ResourceConfig;
///
/// let config = ResourceConfig::new("exact", "eip155:8453", "0xRecipient", "$0.01");
/// assert_eq!(config.max_timeout_seconds, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Payment scheme identifier (e.g. `"exact"`).
    pub scheme: String,

    /// Recipient address.
    pub pay_to: String,

    /// Price as money or as an explicit asset amount.
    pub price: Price,

    /// CAIP-2 network identifier.
    pub network: Network,

    /// Payment validity window; 300 seconds when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timeout_seconds: Option<u64>,

    /// Extra data merged into the requirements' `extra`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl ResourceConfig {
    /// Creates a configuration with the default timeout and no extra data.
    #[must_use]
    pub fn new(
        scheme: impl Into<String>,
        network: impl Into<Network>,
        pay_to: impl Into<String>,
        price: impl Into<Price>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            pay_to: pay_to.into(),
            price: price.into(),
            network: network.into(),
            max_timeout_seconds: None,
            extra: None,
        }
    }
}
