#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for settling x402 payments from a resource server.
//!
//! The x402 protocol turns HTTP 402 Payment Required into a machine-readable
//! paywall: the server answers with payment requirements, the client signs an
//! authorization (EIP-3009 `transferWithAuthorization` for the `exact` EVM
//! scheme), and a facilitator verifies and settles it on-chain.
//!
//! This crate holds everything that is independent of HTTP:
//!
//! - [`proto`] - Wire format types (requirements, payloads, verify/settle responses)
//! - [`facilitator`] - The [`FacilitatorClient`](facilitator::FacilitatorClient) seam
//! - [`scheme`] - Server-side schemes turning prices into token amounts
//! - [`networks`] - Known EVM networks and their USDC deployments
//! - [`server`] - [`ResourceServer`](server::ResourceServer): requirement building and verify/settle delegation
//! - [`config`] - Per-resource payment configuration
//! - [`error`] - Error types
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod config;
pub mod error;
pub mod facilitator;
pub mod networks;
pub mod proto;
pub mod scheme;
pub mod server;

pub use config::ResourceConfig;
pub use error::{BoxError, PaymentError};
pub use facilitator::FacilitatorClient;
pub use proto::{
    PaymentPayload, PaymentRequired, PaymentRequirements, ResourceInfo, SettleResponse,
    SupportedKind, SupportedResponse, VerifyResponse,
};
pub use scheme::{AssetAmount, ExactEvmScheme, Price, SchemeServer};
pub use server::ResourceServer;
