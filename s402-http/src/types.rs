//! Route configuration for [`HttpResourceServer`](crate::engine::HttpResourceServer).

use http::Method;
use s402::config::ResourceConfig;
use s402::proto::Network;
use s402::scheme::{EXACT_SCHEME, Price};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::price::PriceSource;

/// One payment method a route accepts.
#[derive(Debug, Clone)]
pub struct PaymentOption {
    /// Payment scheme identifier (e.g. `"exact"`).
    pub scheme: String,
    /// CAIP-2 network identifier.
    pub network: Network,
    /// Recipient address.
    pub pay_to: String,
    /// Where the price comes from.
    pub price: PriceSource,
    /// Payment validity window; 300 seconds when unset.
    pub max_timeout_seconds: Option<u64>,
    /// Extra data merged into the requirements.
    pub extra: Option<Value>,
}

impl PaymentOption {
    /// An `exact`-scheme option.
    #[must_use]
    pub fn exact(
        network: impl Into<Network>,
        pay_to: impl Into<String>,
        price: impl Into<PriceSource>,
    ) -> Self {
        Self {
            scheme: EXACT_SCHEME.to_owned(),
            network: network.into(),
            pay_to: pay_to.into(),
            price: price.into(),
            max_timeout_seconds: None,
            extra: None,
        }
    }

    /// Sets the payment validity window.
    #[must_use]
    pub const fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = Some(seconds);
        self
    }

    /// Builds the resource config for an already-resolved price.
    pub(crate) fn to_resource_config(&self, price: Price) -> ResourceConfig {
        ResourceConfig {
            scheme: self.scheme.clone(),
            pay_to: self.pay_to.clone(),
            price,
            network: self.network.clone(),
            max_timeout_seconds: self.max_timeout_seconds,
            extra: self.extra.clone(),
        }
    }
}

/// Payment configuration for one route.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Accepted payment options.
    pub accepts: Vec<PaymentOption>,
    /// Resource URL override; the request URL when unset.
    pub resource: Option<String>,
    /// What the payment buys.
    pub description: Option<String>,
    /// MIME type of the resource.
    pub mime_type: Option<String>,
}

impl RouteConfig {
    /// A route with a single payment option.
    #[must_use]
    pub fn single(option: PaymentOption) -> Self {
        Self::multi(vec![option])
    }

    /// A route accepting any of `options`.
    #[must_use]
    pub const fn multi(options: Vec<PaymentOption>) -> Self {
        Self {
            accepts: options,
            resource: None,
            description: None,
            mime_type: None,
        }
    }

    /// Sets the resource URL.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }
}

/// Browser paywall presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaywallConfig {
    /// Application name shown as the page title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Logo URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_logo: Option<String>,
    /// Shows a testnet banner.
    #[serde(default)]
    pub testnet: bool,
}

/// A route that cannot be served with the registered schemes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteValidationError {
    /// The pattern is empty or has an unknown method.
    #[error("invalid route pattern: {0:?}")]
    InvalidPattern(String),
    /// No scheme server is registered for an option.
    #[error("route {pattern:?}: no scheme server registered for {scheme} on {network}")]
    MissingScheme {
        /// Route pattern.
        pattern: String,
        /// Scheme identifier.
        scheme: String,
        /// CAIP-2 network.
        network: Network,
    },
}

/// A parsed route pattern with its config.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRoute {
    pub pattern: String,
    /// `None` matches any method.
    pub method: Option<Method>,
    pub path: String,
    pub config: RouteConfig,
}

impl CompiledRoute {
    pub(crate) fn new(pattern: &str, config: RouteConfig) -> Result<Self, RouteValidationError> {
        let (method, path) = parse_route_pattern(pattern)?;
        Ok(Self {
            pattern: pattern.to_owned(),
            method,
            path,
            config,
        })
    }

    pub(crate) fn matches(&self, method: &Method, path: &str) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        match_path(&self.path, path)
    }
}

/// `"GET /weather"`, `"/weather"` (any method) or `"*"`.
fn parse_route_pattern(pattern: &str) -> Result<(Option<Method>, String), RouteValidationError> {
    let invalid = || RouteValidationError::InvalidPattern(pattern.to_owned());
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((method, path)) => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| invalid())?;
            Ok((Some(method), path.trim().to_owned()))
        }
        None => Ok((None, trimmed.to_owned())),
    }
}

/// Exact match, `/prefix/*` suffix wildcard, or `*` for everything.
/// Trailing slashes are ignored.
fn match_path(pattern: &str, path: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let path = path.trim_end_matches('/');
    let pattern = pattern.trim_end_matches('/');
    match pattern.strip_suffix("/*") {
        Some(prefix) => {
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
        None => path == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(pattern: &str) -> CompiledRoute {
        CompiledRoute::new(
            pattern,
            RouteConfig::single(PaymentOption::exact("eip155:84532", "0xB", "$1.50")),
        )
        .unwrap()
    }

    #[test]
    fn method_and_exact_path() {
        let r = route("post /checkout");
        assert!(r.matches(&Method::POST, "/checkout"));
        assert!(r.matches(&Method::POST, "/checkout/"));
        assert!(!r.matches(&Method::GET, "/checkout"));
        assert!(!r.matches(&Method::POST, "/checkout/items"));
    }

    #[test]
    fn wildcard_suffix() {
        let r = route("/api/*");
        assert!(r.matches(&Method::GET, "/api"));
        assert!(r.matches(&Method::DELETE, "/api/orders/7"));
        assert!(!r.matches(&Method::GET, "/apiary"));
        assert!(route("*").matches(&Method::PUT, "/anything"));
    }

    #[test]
    fn blank_pattern_is_rejected() {
        assert!(matches!(
            CompiledRoute::new("  ", RouteConfig::multi(Vec::new())),
            Err(RouteValidationError::InvalidPattern(_))
        ));
    }

    #[test]
    fn resource_config_carries_option_fields() {
        let option = PaymentOption::exact("eip155:8453", "0xB", "1").with_max_timeout_seconds(60);
        let config = option.to_resource_config(Price::from("2"));
        assert_eq!(config.price, Price::from("2"));
        assert_eq!(config.max_timeout_seconds, Some(60));
        assert_eq!(config.scheme, "exact");
    }

    #[test]
    fn validation_errors_name_the_route() {
        let err = RouteValidationError::MissingScheme {
            pattern: "POST /orders".into(),
            scheme: "exact".into(),
            network: "eip155:8453".into(),
        };
        assert_eq!(
            err.to_string(),
            "route \"POST /orders\": no scheme server registered for exact on eip155:8453"
        );
        assert_eq!(
            RouteValidationError::InvalidPattern("GET".into()).to_string(),
            "invalid route pattern: \"GET\""
        );
    }
}
