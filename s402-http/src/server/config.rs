//! Middleware configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum_core::response::Response;
use http::HeaderMap;
use s402::proto::SettleResponse;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};

use super::body::DEFAULT_MAX_BODY_BYTES;
use super::error::SettlementError;
use super::hooks::BeforeSettleHook;
use crate::types::PaywallConfig;

/// Default bound on each engine call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// When settlement happens relative to the handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementTiming {
    /// Settle, then run the handler. The handler never runs unpaid.
    Before,
    /// Run the handler, buffer its response, settle, then deliver.
    #[default]
    After,
}

/// An unrecognized settlement timing string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown settlement timing {0:?}, expected \"before\" or \"after\"")]
pub struct UnknownTiming(pub String);

impl FromStr for SettlementTiming {
    type Err = UnknownTiming;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            _ => Err(UnknownTiming(s.to_owned())),
        }
    }
}

impl fmt::Display for SettlementTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::After => "after",
        })
    }
}

/// Builds the response for a veto or settlement failure.
pub type ErrorHandler = Arc<dyn Fn(&SettlementError) -> Response + Send + Sync>;

/// Called after a successful settlement with the response headers about to be sent.
pub type SettlementHandler = Arc<dyn Fn(&SettleResponse, &mut HeaderMap) + Send + Sync>;

/// Settlement middleware configuration.
#[derive(Clone)]
pub struct MiddlewareConfig {
    /// Browser paywall presentation.
    pub paywall: Option<PaywallConfig>,
    /// Sync with facilitators in [`PaymentLayer::start`](super::PaymentLayer::start). Default `true`.
    pub sync_facilitator_on_start: bool,
    /// Replaces the default 402 JSON body for vetoes and settlement failures.
    pub error_handler: Option<ErrorHandler>,
    /// Called after a successful settlement.
    pub settlement_handler: Option<SettlementHandler>,
    /// Bound on engine calls. Default 30 seconds.
    pub timeout: Duration,
    /// Default [`SettlementTiming::After`].
    pub settlement_timing: SettlementTiming,
    /// Veto point between verification and settlement.
    pub before_settle_hook: Option<BeforeSettleHook>,
    /// Request body limit. Default 2 MiB.
    pub max_body_bytes: usize,
    /// Reject a second settlement of the same authorization. Default `true`.
    pub replay_guard: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            paywall: None,
            sync_facilitator_on_start: true,
            error_handler: None,
            settlement_handler: None,
            timeout: DEFAULT_TIMEOUT,
            settlement_timing: SettlementTiming::default(),
            before_settle_hook: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            replay_guard: true,
        }
    }
}

impl fmt::Debug for MiddlewareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareConfig")
            .field("paywall", &self.paywall)
            .field("sync_facilitator_on_start", &self.sync_facilitator_on_start)
            .field("error_handler", &self.error_handler.is_some())
            .field("settlement_handler", &self.settlement_handler.is_some())
            .field("timeout", &self.timeout)
            .field("settlement_timing", &self.settlement_timing)
            .field("before_settle_hook", &self.before_settle_hook.is_some())
            .field("max_body_bytes", &self.max_body_bytes)
            .field("replay_guard", &self.replay_guard)
            .finish()
    }
}

impl MiddlewareConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the settlement timing.
    #[must_use]
    pub const fn with_settlement_timing(mut self, timing: SettlementTiming) -> Self {
        self.settlement_timing = timing;
        self
    }

    /// Sets the engine call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the before-settle hook.
    #[must_use]
    pub fn with_before_settle_hook(mut self, hook: BeforeSettleHook) -> Self {
        self.before_settle_hook = Some(hook);
        self
    }

    /// Sets the error handler.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SettlementError) -> Response + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Sets the settlement callback.
    #[must_use]
    pub fn with_settlement_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SettleResponse, &mut HeaderMap) + Send + Sync + 'static,
    {
        self.settlement_handler = Some(Arc::new(handler));
        self
    }

    /// Sets the paywall presentation.
    #[must_use]
    pub fn with_paywall(mut self, paywall: PaywallConfig) -> Self {
        self.paywall = Some(paywall);
        self
    }

    /// Sets the request body limit.
    #[must_use]
    pub const fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Disables the in-process replay guard.
    #[must_use]
    pub const fn without_replay_guard(mut self) -> Self {
        self.replay_guard = false;
        self
    }

    /// Skips the facilitator sync in [`PaymentLayer::start`](super::PaymentLayer::start).
    #[must_use]
    pub const fn without_sync_on_start(mut self) -> Self {
        self.sync_facilitator_on_start = false;
        self
    }
}

/// The file- or env-loadable part of [`MiddlewareConfig`].
///
/// ```rust
/// use s402_http::server::{MiddlewareSettings, SettlementTiming};
///
/// let settings: MiddlewareSettings =
///     serde_json::from_str(r#"{ "settlementTiming": "before", "timeoutSecs": 10 }"#).unwrap();
/// let config = settings.into_config();
/// assert_eq!(config.settlement_timing, SettlementTiming::Before);
/// assert_eq!(config.timeout.as_secs(), 10);
/// assert!(config.replay_guard);
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MiddlewareSettings {
    /// `"before"` or `"after"`.
    pub settlement_timing: SettlementTiming,
    /// Engine call timeout in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout_secs: Duration,
    /// Sync with facilitators at startup.
    pub sync_facilitator_on_start: bool,
    /// Request body limit in bytes.
    pub max_body_bytes: usize,
    /// Enable the replay guard.
    pub replay_guard: bool,
    /// Browser paywall presentation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paywall: Option<PaywallConfig>,
}

impl Default for MiddlewareSettings {
    fn default() -> Self {
        let config = MiddlewareConfig::default();
        Self {
            settlement_timing: config.settlement_timing,
            timeout_secs: config.timeout,
            sync_facilitator_on_start: config.sync_facilitator_on_start,
            max_body_bytes: config.max_body_bytes,
            replay_guard: config.replay_guard,
            paywall: None,
        }
    }
}

impl MiddlewareSettings {
    /// Builds a config; callbacks and the hook are left unset.
    #[must_use]
    pub fn into_config(self) -> MiddlewareConfig {
        MiddlewareConfig {
            paywall: self.paywall,
            sync_facilitator_on_start: self.sync_facilitator_on_start,
            timeout: self.timeout_secs,
            settlement_timing: self.settlement_timing,
            max_body_bytes: self.max_body_bytes,
            replay_guard: self.replay_guard,
            ..MiddlewareConfig::default()
        }
    }
}

impl From<MiddlewareSettings> for MiddlewareConfig {
    fn from(settings: MiddlewareSettings) -> Self {
        settings.into_config()
    }
}
