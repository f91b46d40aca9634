//! Where a route's price comes from.
//!
//! A price is either fixed at configuration time, computed per request by a
//! callback ([`DynamicPrice`]), or read from the request scope after an
//! upstream stage computed it from the body ([`ContextPrice`]).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use s402::facilitator::BoxFuture;
use s402::scheme::Price;

use crate::engine::HttpAdapter;

/// Errors produced while resolving a price for a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    /// Nothing was stored under the key.
    #[error("price not found in request scope with key: {0}")]
    NotFound(String),
    /// A value was stored under the key but it is not a price.
    #[error("value in request scope with key {0} is not a price")]
    WrongType(String),
    /// A pricing callback failed.
    #[error("price resolution failed: {0}")]
    Resolver(String),
}

/// Computes a price from the request.
pub trait PriceResolver: Send + Sync {
    /// Resolves the price for this request.
    fn resolve<'a>(&'a self, ctx: &'a dyn HttpAdapter) -> BoxFuture<'a, Result<Price, PriceError>>;
}

/// A fixed price or a per-request resolver.
#[derive(Clone)]
pub enum PriceSource {
    /// Same price for every request.
    Fixed(Price),
    /// Computed per request.
    Resolver(Arc<dyn PriceResolver>),
}

impl PriceSource {
    /// Resolves the price for this request.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's [`PriceError`].
    pub async fn resolve(&self, ctx: &dyn HttpAdapter) -> Result<Price, PriceError> {
        match self {
            Self::Fixed(price) => Ok(price.clone()),
            Self::Resolver(resolver) => resolver.resolve(ctx).await,
        }
    }
}

impl fmt::Debug for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(price) => f.debug_tuple("Fixed").field(price).finish(),
            Self::Resolver(_) => f.write_str("Resolver(<resolver>)"),
        }
    }
}

impl From<Price> for PriceSource {
    fn from(price: Price) -> Self {
        Self::Fixed(price)
    }
}

impl From<&str> for PriceSource {
    fn from(price: &str) -> Self {
        Self::Fixed(Price::from(price))
    }
}

impl From<String> for PriceSource {
    fn from(price: String) -> Self {
        Self::Fixed(Price::from(price))
    }
}

impl From<ContextPrice> for PriceSource {
    fn from(price: ContextPrice) -> Self {
        Self::Resolver(Arc::new(price))
    }
}

impl<F, Fut> From<DynamicPrice<F>> for PriceSource
where
    F: Fn(&dyn HttpAdapter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Price, PriceError>> + Send + 'static,
{
    fn from(price: DynamicPrice<F>) -> Self {
        Self::Resolver(Arc::new(price))
    }
}

/// Price computed by a callback from the request view.
///
/// The callback gets the request synchronously and returns a `'static`
/// future, so it must copy what it needs out of the adapter.
pub struct DynamicPrice<F> {
    callback: Arc<F>,
}

impl<F> DynamicPrice<F> {
    /// Wraps a pricing callback.
    pub fn new<Fut>(callback: F) -> Self
    where
        F: Fn(&dyn HttpAdapter) -> Fut,
        Fut: Future<Output = Result<Price, PriceError>>,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl<F> Clone for DynamicPrice<F> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<F> fmt::Debug for DynamicPrice<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicPrice")
            .field("callback", &"<callback>")
            .finish()
    }
}

impl<F, Fut> PriceResolver for DynamicPrice<F>
where
    F: Fn(&dyn HttpAdapter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Price, PriceError>> + Send + 'static,
{
    fn resolve<'a>(&'a self, ctx: &'a dyn HttpAdapter) -> BoxFuture<'a, Result<Price, PriceError>> {
        Box::pin((self.callback)(ctx))
    }
}

/// Reads a price that an earlier stage stored in the request scope.
///
/// The stored value may be a `String`, a `&'static str` or a [`Price`].
/// A missing value is always an error; there is no default price.
///
/// ```rust
/// use s402_http::price::ContextPrice;
///
/// let price = ContextPrice::new("x402:price");
/// assert_eq!(price.key(), "x402:price");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPrice {
    key: String,
}

impl ContextPrice {
    /// Looks up the price under `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Returns the scope key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the price from the request scope.
    ///
    /// # Errors
    ///
    /// [`PriceError::NotFound`] if nothing is stored under the key,
    /// [`PriceError::WrongType`] if the stored value is not a price.
    pub fn lookup(&self, ctx: &dyn HttpAdapter) -> Result<Price, PriceError> {
        let scope = ctx.scope();
        if let Some(price) = scope.get::<String>(&self.key) {
            return Ok(Price::from(price.as_str()));
        }
        if let Some(price) = scope.get::<&'static str>(&self.key) {
            return Ok(Price::from(*price));
        }
        if let Some(price) = scope.get::<Price>(&self.key) {
            return Ok((*price).clone());
        }
        if scope.contains_key(&self.key) {
            Err(PriceError::WrongType(self.key.clone()))
        } else {
            Err(PriceError::NotFound(self.key.clone()))
        }
    }
}

impl PriceResolver for ContextPrice {
    fn resolve<'a>(&'a self, ctx: &'a dyn HttpAdapter) -> BoxFuture<'a, Result<Price, PriceError>> {
        Box::pin(async move { self.lookup(ctx) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PartsAdapter;
    use crate::scope::RequestScope;
    use bytes::Bytes;

    fn with_adapter<R>(scope: &RequestScope, f: impl FnOnce(&PartsAdapter<'_>) -> R) -> R {
        let parts = http::Request::builder()
            .uri("/checkout")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let body = Bytes::new();
        f(&PartsAdapter::new(&parts, &body, scope))
    }

    #[test]
    fn context_price_reads_string() {
        let scope = RequestScope::new();
        scope.insert("x402:price", String::from("1.50"));
        let price = with_adapter(&scope, |ctx| ContextPrice::new("x402:price").lookup(ctx));
        assert_eq!(price, Ok(Price::from("1.50")));
    }

    #[test]
    fn missing_context_price_is_not_found() {
        let scope = RequestScope::new();
        let err = with_adapter(&scope, |ctx| ContextPrice::new("x402:price").lookup(ctx))
            .unwrap_err();
        assert_eq!(err, PriceError::NotFound("x402:price".into()));
        assert_eq!(
            err.to_string(),
            "price not found in request scope with key: x402:price"
        );
    }

    #[test]
    fn non_price_value_is_wrong_type() {
        let scope = RequestScope::new();
        scope.insert("x402:price", 150_u64);
        let err = with_adapter(&scope, |ctx| ContextPrice::new("x402:price").lookup(ctx))
            .unwrap_err();
        assert_eq!(err, PriceError::WrongType("x402:price".into()));
    }

    #[tokio::test]
    async fn dynamic_price_sees_request() {
        let source = PriceSource::from(DynamicPrice::new(|ctx: &dyn HttpAdapter| {
            let premium = ctx.path().starts_with("/premium");
            async move { Ok(Price::from(if premium { "5" } else { "1" })) }
        }));

        let scope = RequestScope::new();
        let parts = http::Request::builder()
            .uri("/premium/report")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let body = Bytes::new();
        let ctx = PartsAdapter::new(&parts, &body, &scope);
        assert_eq!(source.resolve(&ctx).await, Ok(Price::from("5")));
    }
}
