//! Wire format types for x402 version 2.
//!
//! All types serialize to JSON with camelCase field names. Networks are CAIP-2
//! identifiers such as `eip155:8453`; amounts are decimal strings in the
//! asset's smallest unit.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use serde_with::{VecSkipError, serde_as};

/// A CAIP-2 network identifier (e.g. `"eip155:8453"`).
pub type Network = String;

/// The protocol version produced and accepted by this crate.
pub const X402_VERSION: u32 = 2;

/// Payment validity window used when a resource does not configure one.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 300;

/// Describes the resource being paid for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// The URL of the resource.
    pub url: String,

    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Optional MIME type of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// What a resource server requires for one accepted way of paying.
///
/// ```json
/// {
///   "scheme": "exact",
///   "network": "eip155:8453",
///   "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
///   "amount": "1500000",
///   "payTo": "0x...",
///   "maxTimeoutSeconds": 300,
///   "extra": { "name": "USD Coin", "version": "2" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme identifier (e.g. `"exact"`).
    pub scheme: String,

    /// CAIP-2 network identifier.
    pub network: Network,

    /// Asset contract address.
    pub asset: String,

    /// Amount in the asset's smallest unit.
    pub amount: String,

    /// Recipient address.
    pub pay_to: String,

    /// Maximum time in seconds the authorization may take to settle.
    #[serde(default = "default_max_timeout")]
    pub max_timeout_seconds: u64,

    /// Scheme-specific data such as the EIP-712 domain name and version.
    #[serde(default = "default_empty_object")]
    pub extra: Value,
}

impl PaymentRequirements {
    /// Returns the extra metadata, or `None` if it is null or empty.
    #[must_use]
    pub fn extra(&self) -> Option<&Value> {
        match &self.extra {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(other),
        }
    }

    /// Returns `true` if `other` asks for the same payment as `self`.
    ///
    /// Compares scheme, network, asset, amount and recipient. Addresses are
    /// compared case-insensitively since EVM checksums only differ in case.
    #[must_use]
    pub fn same_terms(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.network == other.network
            && self.amount == other.amount
            && self.asset.eq_ignore_ascii_case(&other.asset)
            && self.pay_to.eq_ignore_ascii_case(&other.pay_to)
    }
}

/// The body of a 402 response, also carried in the `PAYMENT-REQUIRED` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version.
    #[serde(default = "default_version")]
    pub x402_version: u32,

    /// Why the request could not be served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The resource being paid for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,

    /// Accepted payment requirements.
    pub accepts: Vec<PaymentRequirements>,

    /// Optional extension data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

/// A signed payment sent by the client in the `PAYMENT-SIGNATURE` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version.
    #[serde(default = "default_version")]
    pub x402_version: u32,

    /// Scheme-specific payload data.
    pub payload: Value,

    /// The requirements the client agreed to pay.
    pub accepted: PaymentRequirements,

    /// The resource the client believes it is paying for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,

    /// Optional extension data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl PaymentPayload {
    /// Returns the payment scheme from the accepted requirements.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.accepted.scheme
    }

    /// Returns the network from the accepted requirements.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.accepted.network
    }

    /// Decodes the scheme payload as an `exact` EVM authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not have the EIP-3009 shape.
    pub fn exact_evm(&self) -> Result<ExactEvmPayload, serde_json::Error> {
        ExactEvmPayload::deserialize(&self.payload)
    }
}

/// The `payload` of an `exact` EVM payment: a signed EIP-3009 authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    /// The EIP-712 signature over the authorization.
    pub signature: String,
    /// The `transferWithAuthorization` parameters.
    pub authorization: Eip3009Authorization,
}

/// Parameters of an EIP-3009 `transferWithAuthorization` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Authorization {
    /// Payer address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Amount in the token's smallest unit.
    pub value: String,
    /// Unix time after which the authorization is valid.
    pub valid_after: U64String,
    /// Unix time before which the authorization is valid.
    pub valid_before: U64String,
    /// 32-byte hex nonce; unique per authorization.
    pub nonce: String,
}

/// A `u64` carried as a decimal string on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct U64String(u64);

impl U64String {
    /// Returns the inner value.
    #[must_use]
    pub const fn inner(self) -> u64 {
        self.0
    }
}

impl From<u64> for U64String {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for U64String {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for U64String {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for U64String {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for U64String {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(u64),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => s.parse().map(Self).map_err(serde::de::Error::custom),
            Repr::Num(n) => Ok(Self(n)),
        }
    }
}

/// Body of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Protocol version.
    #[serde(default = "default_version")]
    pub x402_version: u32,
    /// The payment to verify.
    pub payment_payload: PaymentPayload,
    /// The requirements to verify against.
    pub payment_requirements: PaymentRequirements,
}

/// Body of `POST /settle`. Same shape as [`VerifyRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Protocol version.
    #[serde(default = "default_version")]
    pub x402_version: u32,
    /// The payment to settle.
    pub payment_payload: PaymentPayload,
    /// The requirements being fulfilled.
    pub payment_requirements: PaymentRequirements,
}

impl SettleRequest {
    /// Builds a settle request for a payload and the requirements it satisfies.
    #[must_use]
    pub fn new(payload: &PaymentPayload, requirements: &PaymentRequirements) -> Self {
        Self {
            x402_version: payload.x402_version,
            payment_payload: payload.clone(),
            payment_requirements: requirements.clone(),
        }
    }
}

impl VerifyRequest {
    /// Builds a verify request for a payload and the requirements it claims.
    #[must_use]
    pub fn new(payload: &PaymentPayload, requirements: &PaymentRequirements) -> Self {
        Self {
            x402_version: payload.x402_version,
            payment_payload: payload.clone(),
            payment_requirements: requirements.clone(),
        }
    }
}

/// Result of verifying a payment with a facilitator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Whether the payment is valid.
    pub is_valid: bool,

    /// Machine-readable reason when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,

    /// Human-readable explanation when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_message: Option<String>,

    /// The payer's address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl VerifyResponse {
    /// Creates a valid verification response.
    #[must_use]
    pub fn valid(payer: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            invalid_message: None,
            payer: Some(payer.into()),
        }
    }

    /// Creates an invalid verification response.
    #[must_use]
    pub fn invalid(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason.into()),
            invalid_message: Some(message.into()),
            payer: None,
        }
    }
}

/// Result of settling a payment with a facilitator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    /// Whether settlement succeeded.
    pub success: bool,

    /// Machine-readable reason when settlement failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Human-readable explanation when settlement failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// The payer's address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,

    /// On-chain transaction hash. Empty when settlement failed.
    #[serde(default)]
    pub transaction: String,

    /// Network where settlement happened.
    pub network: Network,
}

impl SettleResponse {
    /// Creates a successful settlement response.
    #[must_use]
    pub fn success(
        transaction: impl Into<String>,
        network: impl Into<String>,
        payer: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            error_reason: None,
            error_message: None,
            payer: Some(payer.into()),
            transaction: transaction.into(),
            network: network.into(),
        }
    }

    /// Creates a failed settlement response.
    #[must_use]
    pub fn error(reason: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            success: false,
            error_reason: Some(reason.into()),
            error_message: None,
            payer: None,
            transaction: String::new(),
            network: network.into(),
        }
    }
}

/// One (version, scheme, network) combination a facilitator handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    /// Protocol version.
    pub x402_version: u32,
    /// Payment scheme identifier.
    pub scheme: String,
    /// CAIP-2 network, or a `namespace:*` wildcard.
    pub network: Network,
    /// Scheme-specific data the facilitator wants in requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl SupportedKind {
    /// Returns `true` if this kind covers `network`, either exactly or by wildcard.
    #[must_use]
    pub fn covers(&self, scheme: &str, network: &str) -> bool {
        if self.scheme != scheme {
            return false;
        }
        if self.network == network {
            return true;
        }
        self.network
            .strip_suffix(":*")
            .is_some_and(|ns| network.split(':').next() == Some(ns))
    }
}

/// Response of a facilitator's `GET /supported` endpoint.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// Supported payment kinds. Unknown entries are skipped.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedKind>,
    /// Supported protocol extensions.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Signer addresses keyed by CAIP-2 network or wildcard.
    #[serde(default)]
    pub signers: HashMap<String, Vec<String>>,
}

const fn default_version() -> u32 {
    X402_VERSION
}

const fn default_max_timeout() -> u64 {
    DEFAULT_MAX_TIMEOUT_SECONDS
}

fn default_empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
