#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP settlement middleware for the x402 payment protocol.
//!
//! The interesting part is *when* money moves. [`server::PaymentLayer`]
//! verifies a submitted payment and then either settles before the handler
//! runs (no side effect without payment) or runs the handler with its
//! response held back and settles before delivering it (no delivery without
//! payment).
//!
//! # Modules
//!
//! - [`server`] - The orchestrator, tower layer, hook, response capture and payment data
//! - [`engine`] - The [`ProtocolEngine`](engine::ProtocolEngine) seam and [`HttpResourceServer`](engine::HttpResourceServer)
//! - [`price`] - Fixed, callback and request-scope prices
//! - [`scope`] - The request-scoped store
//! - [`types`] - Route and paywall configuration
//! - [`facilitator`] - HTTP facilitator client
//! - [`headers`] - Base64 encoding/decoding for the `PAYMENT-*` headers
//! - [`constants`] - Header names and default URLs
//! - [`error`] - Header codec errors
//!
//! # Feature Flags
//!
//! - `telemetry` (default) - Enables tracing instrumentation

pub mod constants;
pub mod engine;
pub mod error;
pub mod facilitator;
pub mod headers;
pub mod price;
pub mod scope;
pub mod server;
pub mod types;

pub use engine::{HttpResourceServer, ProtocolEngine};
pub use facilitator::HttpFacilitatorClient;
pub use price::{ContextPrice, DynamicPrice, PriceSource};
pub use scope::RequestScope;
pub use server::{
    BeforeSettleHook, MiddlewareConfig, Payment, PaymentData, PaymentLayer, SettlementTiming,
};
pub use types::{PaymentOption, RouteConfig};
