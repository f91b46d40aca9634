//! Known EVM networks and their USDC deployments.
//!
//! These are the defaults used when a price is given as money (`"$1.50"`)
//! rather than as an explicit asset amount.

use alloy_primitives::{Address, address};

/// Default EIP-712 domain name for USDC.
pub const USDC_EIP712_NAME: &str = "USD Coin";

/// Default EIP-712 domain version for USDC.
pub const USDC_EIP712_VERSION: &str = "2";

/// Token decimals for USDC.
pub const USDC_DECIMALS: u32 = 6;

/// A USDC deployment on one EVM network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsdcDeployment {
    /// CAIP-2 network identifier.
    pub network: &'static str,
    /// Human-readable network name (e.g. `"base-sepolia"`).
    pub name: &'static str,
    /// Token contract address.
    pub address: Address,
    /// EIP-712 domain name used for signing.
    pub eip712_name: &'static str,
    /// EIP-712 domain version used for signing.
    pub eip712_version: &'static str,
    /// Token decimals.
    pub decimals: u32,
    /// Whether this is a test network.
    pub testnet: bool,
}

const fn usdc(
    network: &'static str,
    name: &'static str,
    address: Address,
    testnet: bool,
) -> UsdcDeployment {
    UsdcDeployment {
        network,
        name,
        address,
        eip712_name: USDC_EIP712_NAME,
        eip712_version: USDC_EIP712_VERSION,
        decimals: USDC_DECIMALS,
        testnet,
    }
}

/// USDC deployments on well-known EVM networks.
pub static USDC_DEPLOYMENTS: &[UsdcDeployment] = &[
    usdc("eip155:8453", "base", address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"), false),
    usdc("eip155:84532", "base-sepolia", address!("036CbD53842c5426634e7929541eC2318f3dCF7e"), true),
    usdc("eip155:1", "ethereum", address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), false),
    usdc("eip155:137", "polygon", address!("3c499c542cEF5E3811e1192ce70d8cC03d5c3359"), false),
    usdc("eip155:80002", "polygon-amoy", address!("41E94Eb71Ef8C9fAE0235d1e472b21E21B5a4dbF"), true),
    usdc("eip155:43114", "avalanche", address!("B97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"), false),
    usdc("eip155:43113", "avalanche-fuji", address!("5425890298aed601595a70AB815c96711a31Bc65"), true),
    usdc("eip155:42220", "celo", address!("cebA9300f2b948710d2653dD7B07f33A8B32118C"), false),
];

/// Looks up the USDC deployment for a CAIP-2 network.
#[must_use]
pub fn usdc_deployment(network: &str) -> Option<&'static UsdcDeployment> {
    USDC_DEPLOYMENTS.iter().find(|d| d.network == network)
}

/// Resolves a human-readable network name (e.g. `"base"`) to its CAIP-2 identifier.
#[must_use]
pub fn network_by_name(name: &str) -> Option<&'static str> {
    USDC_DEPLOYMENTS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .map(|d| d.network)
}
