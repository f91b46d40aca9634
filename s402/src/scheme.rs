//! Server-side payment schemes.
//!
//! A [`SchemeServer`] converts a configured [`Price`] into the token amount a
//! client must authorize, and decorates the resulting requirements with
//! whatever the scheme needs on the client side (for `exact` on EVM, the
//! EIP-712 domain of the token).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::PriceParseError;
use crate::networks;
use crate::proto::{PaymentRequirements, SupportedKind};

/// The canonical name of the exact-amount scheme.
pub const EXACT_SCHEME: &str = "exact";

/// A resolved token amount ready for use in payment requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    /// Amount in the token's smallest unit (e.g. `"1500000"` for 1.50 USDC).
    pub amount: String,
    /// Token contract address.
    #[serde(default)]
    pub asset: String,
    /// Scheme-specific data to merge into the requirements' `extra`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// A price as configured by the seller.
///
/// Either a human-readable money amount in the network's default stablecoin
/// (`"$1.50"`, `"0.01"`, `2`) or an explicit [`AssetAmount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Price {
    /// A money amount, parsed by the scheme.
    Money(String),
    /// An explicit token amount.
    Asset(AssetAmount),
}

impl Price {
    /// Creates a money price.
    #[must_use]
    pub fn money(amount: impl Into<String>) -> Self {
        Self::Money(amount.into())
    }
}

impl From<&str> for Price {
    fn from(value: &str) -> Self {
        Self::Money(value.to_owned())
    }
}

impl From<String> for Price {
    fn from(value: String) -> Self {
        Self::Money(value)
    }
}

impl From<Decimal> for Price {
    fn from(value: Decimal) -> Self {
        Self::Money(value.to_string())
    }
}

impl From<AssetAmount> for Price {
    fn from(value: AssetAmount) -> Self {
        Self::Asset(value)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Money(money) => f.write_str(money),
            Self::Asset(asset) => write!(f, "{} of {}", asset.amount, asset.asset),
        }
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Money(money) => serializer.serialize_str(money),
            Self::Asset(asset) => asset.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Asset(AssetAmount),
            Text(String),
            Number(serde_json::Number),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Asset(asset) => Self::Asset(asset),
            Repr::Text(text) => Self::Money(text),
            Repr::Number(number) => Self::Money(number.to_string()),
        })
    }
}

/// Parses a money string into a positive decimal.
///
/// Accepts an optional leading `$` and an optional trailing `USD`/`USDC`.
///
/// # Errors
///
/// Returns [`PriceParseError`] if the string is not a positive decimal.
pub fn parse_money(input: &str) -> Result<Decimal, PriceParseError> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed).trim();
    let upper = trimmed.to_ascii_uppercase();
    let trimmed = if upper.ends_with("USDC") {
        &trimmed[..trimmed.len() - 4]
    } else if upper.ends_with("USD") {
        &trimmed[..trimmed.len() - 3]
    } else {
        trimmed
    }
    .trim();

    let value = Decimal::from_str(trimmed)
        .map_err(|_| PriceParseError::InvalidMoney(input.to_owned()))?;
    if value <= Decimal::ZERO {
        return Err(PriceParseError::NotPositive(input.to_owned()));
    }
    Ok(value)
}

/// Converts a decimal amount into the token's smallest unit.
///
/// # Errors
///
/// Returns [`PriceParseError::TooPrecise`] if `value` has more fractional
/// digits than `decimals`, or [`PriceParseError::Overflow`] if it does not fit.
pub fn to_atomic_units(value: Decimal, decimals: u32) -> Result<String, PriceParseError> {
    let normalized = value.normalize();
    if normalized.scale() > decimals {
        return Err(PriceParseError::TooPrecise {
            price: value.to_string(),
            decimals,
        });
    }
    let factor = 10_u64
        .checked_pow(decimals)
        .map(Decimal::from)
        .ok_or_else(|| PriceParseError::Overflow(value.to_string()))?;
    normalized
        .checked_mul(factor)
        .and_then(|scaled| scaled.trunc().to_u128())
        .map(|units| units.to_string())
        .ok_or_else(|| PriceParseError::Overflow(value.to_string()))
}

/// Server-side half of a payment scheme.
pub trait SchemeServer: Send + Sync {
    /// The scheme name (e.g. `"exact"`).
    fn scheme(&self) -> &str;

    /// Converts a configured price into a token amount on `network`.
    ///
    /// # Errors
    ///
    /// Returns [`PriceParseError`] if the price is malformed or no asset is
    /// known for the network.
    fn parse_price(&self, price: &Price, network: &str) -> Result<AssetAmount, PriceParseError>;

    /// Adds scheme-specific data to freshly built requirements.
    ///
    /// `supported` is the facilitator's advertisement for this scheme and
    /// network. The default implementation returns the requirements unchanged.
    fn enhance_requirements(
        &self,
        requirements: PaymentRequirements,
        supported: &SupportedKind,
    ) -> PaymentRequirements {
        let _ = supported;
        requirements
    }
}

/// A custom money conversion, tried before the built-in USDC defaults.
///
/// Receives the parsed amount and the CAIP-2 network; returns `None` to defer
/// to the next parser.
pub type MoneyParser = Arc<dyn Fn(Decimal, &str) -> Option<AssetAmount> + Send + Sync>;

/// The `exact` scheme for EVM networks (EIP-3009 `transferWithAuthorization`).
///
/// Money prices resolve to USDC on the networks listed in
/// [`networks::USDC_DEPLOYMENTS`] unless a registered [`MoneyParser`] claims
/// them first.
#[derive(Clone, Default)]
pub struct ExactEvmScheme {
    money_parsers: Vec<MoneyParser>,
}

impl fmt::Debug for ExactEvmScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExactEvmScheme")
            .field("money_parsers", &self.money_parsers.len())
            .finish()
    }
}

impl ExactEvmScheme {
    /// Creates the scheme with only the built-in USDC conversion.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom money parser. Parsers run in registration order.
    #[must_use]
    pub fn with_money_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(Decimal, &str) -> Option<AssetAmount> + Send + Sync + 'static,
    {
        self.money_parsers.push(Arc::new(parser));
        self
    }

    fn default_money_conversion(
        value: Decimal,
        network: &str,
    ) -> Result<AssetAmount, PriceParseError> {
        let deployment = networks::usdc_deployment(network)
            .ok_or_else(|| PriceParseError::UnsupportedNetwork(network.to_owned()))?;
        Ok(AssetAmount {
            amount: to_atomic_units(value, deployment.decimals)?,
            asset: deployment.address.to_checksum(None),
            extra: Some(serde_json::json!({
                "name": deployment.eip712_name,
                "version": deployment.eip712_version,
            })),
        })
    }
}

impl SchemeServer for ExactEvmScheme {
    fn scheme(&self) -> &str {
        EXACT_SCHEME
    }

    fn parse_price(&self, price: &Price, network: &str) -> Result<AssetAmount, PriceParseError> {
        match price {
            Price::Asset(asset) => {
                if asset.asset.is_empty() {
                    return Err(PriceParseError::MissingAsset);
                }
                Ok(asset.clone())
            }
            Price::Money(money) => {
                let value = parse_money(money)?;
                if let Some(amount) = self
                    .money_parsers
                    .iter()
                    .find_map(|parser| parser(value, network))
                {
                    return Ok(amount);
                }
                Self::default_money_conversion(value, network)
            }
        }
    }

    fn enhance_requirements(
        &self,
        mut requirements: PaymentRequirements,
        supported: &SupportedKind,
    ) -> PaymentRequirements {
        let Some(Value::Object(advertised)) = &supported.extra else {
            return requirements;
        };
        if !requirements.extra.is_object() {
            requirements.extra = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(extra) = &mut requirements.extra {
            for (key, value) in advertised {
                extra.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        requirements
    }
}
