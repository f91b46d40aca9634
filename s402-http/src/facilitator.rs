//! A [`FacilitatorClient`] that talks to a remote x402 facilitator over HTTP.
//!
//! Handles `POST /verify`, `POST /settle` and `GET /supported`. The
//! `/supported` response is cached with a TTL since resource servers consult
//! it on every initialization attempt.

use std::fmt::Display;
use std::time::{Duration, Instant};

use http::{HeaderMap, StatusCode};
use reqwest::Client;
use s402::error::BoxError;
use s402::facilitator::{BoxFuture, FacilitatorClient};
use s402::proto::{
    PaymentPayload, PaymentRequirements, SettleRequest, SettleResponse, SupportedResponse,
    VerifyRequest, VerifyResponse,
};
use tokio::sync::RwLock;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Span, instrument};

#[derive(Clone, Debug)]
struct CachedSupported {
    response: SupportedResponse,
    expires_at: Instant,
}

/// TTL cache for the `/supported` response. Clones start empty.
#[derive(Debug)]
pub struct SupportedCache {
    ttl: Duration,
    state: RwLock<Option<CachedSupported>>,
}

impl SupportedCache {
    /// Creates an empty cache with the given TTL. A zero TTL disables caching.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::const_new(None),
        }
    }

    /// Returns the cached response if it has not expired.
    pub async fn get(&self) -> Option<SupportedResponse> {
        let guard = self.state.read().await;
        let cached = guard.as_ref()?;
        (Instant::now() < cached.expires_at).then(|| cached.response.clone())
    }

    /// Stores a response for one TTL.
    pub async fn set(&self, response: SupportedResponse) {
        *self.state.write().await = Some(CachedSupported {
            response,
            expires_at: Instant::now() + self.ttl,
        });
    }

    /// Drops the cached response.
    pub async fn clear(&self) {
        *self.state.write().await = None;
    }
}

impl Clone for SupportedCache {
    fn clone(&self) -> Self {
        Self::new(self.ttl)
    }
}

/// Errors that can occur while talking to a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The response body is not the expected JSON.
    #[error("failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// The error body of a non-200 response could not be read.
    #[error("failed to read response body: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

/// HTTP client for a remote facilitator.
#[derive(Clone, Debug)]
pub struct HttpFacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
    supported_cache: SupportedCache,
}

impl HttpFacilitatorClient {
    /// Default TTL for the cached `/supported` response.
    pub const DEFAULT_SUPPORTED_CACHE_TTL: Duration = Duration::from_secs(600);

    /// Builds a client whose endpoints are resolved relative to `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError::UrlParse`] if an endpoint URL cannot be built.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| FacilitatorClientError::UrlParse { context, source })
        };
        Ok(Self {
            verify_url: join("./verify", "Failed to construct ./verify URL")?,
            settle_url: join("./settle", "Failed to construct ./settle URL")?,
            supported_url: join("./supported", "Failed to construct ./supported URL")?,
            base_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: None,
            supported_cache: SupportedCache::new(Self::DEFAULT_SUPPORTED_CACHE_TTL),
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the `./verify` URL.
    #[must_use]
    pub const fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// Returns the `./settle` URL.
    #[must_use]
    pub const fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    /// Returns the `./supported` URL.
    #[must_use]
    pub const fn supported_url(&self) -> &Url {
        &self.supported_url
    }

    /// Sends these headers with every request (e.g. an API key).
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Bounds every request by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the `/supported` cache TTL.
    #[must_use]
    pub fn with_supported_cache_ttl(mut self, ttl: Duration) -> Self {
        self.supported_cache = SupportedCache::new(ttl);
        self
    }

    /// Disables `/supported` caching.
    #[must_use]
    pub fn without_supported_cache(self) -> Self {
        self.with_supported_cache_ttl(Duration::ZERO)
    }

    /// Sends `POST /verify`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport, status or decoding failure.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.send(self.client.post(self.verify_url.clone()).json(request), "POST /verify")
            .await
    }

    /// Sends `POST /settle`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport, status or decoding failure.
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        self.send(self.client.post(self.settle_url.clone()).json(request), "POST /settle")
            .await
    }

    /// Returns the supported kinds, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport, status or decoding failure.
    pub async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        if let Some(response) = self.supported_cache.get().await {
            return Ok(response);
        }
        #[cfg(feature = "telemetry")]
        tracing::debug!("s402.facilitator_client.supported_cache_miss");

        let response = self.supported_uncached().await?;
        self.supported_cache.set(response.clone()).await;
        Ok(response)
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "s402.facilitator_client.supported", skip_all, err)
    )]
    async fn supported_uncached(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        self.send(self.client.get(self.supported_url.clone()), "GET /supported")
            .await
    }

    async fn send<R>(
        &self,
        mut request: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;

        let result = if response.status() == StatusCode::OK {
            response
                .json::<R>()
                .await
                .map_err(|source| FacilitatorClientError::JsonDeserialization { context, source })
        } else {
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|source| FacilitatorClientError::ResponseBodyRead { context, source })?;
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        };

        record_result_on_span(&result);
        result
    }
}

impl FacilitatorClient for HttpFacilitatorClient {
    fn verify<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<VerifyResponse, BoxError>> {
        let fut = async move {
            Self::verify(self, &VerifyRequest::new(payload, requirements))
                .await
                .map_err(BoxError::from)
        };
        #[cfg(feature = "telemetry")]
        let fut = fut.instrument(
            tracing::info_span!("s402.facilitator_client.verify", timeout = ?self.timeout),
        );
        Box::pin(fut)
    }

    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, Result<SettleResponse, BoxError>> {
        let fut = async move {
            Self::settle(self, &SettleRequest::new(payload, requirements))
                .await
                .map_err(BoxError::from)
        };
        #[cfg(feature = "telemetry")]
        let fut = fut.instrument(
            tracing::info_span!("s402.facilitator_client.settle", timeout = ?self.timeout),
        );
        Box::pin(fut)
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, BoxError>> {
        Box::pin(async move { Self::supported(self).await.map_err(BoxError::from) })
    }
}

/// Parses a base URL, normalizing it to exactly one trailing slash.
impl TryFrom<&str> for HttpFacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source,
        })?;
        Self::try_new(url)
    }
}

impl TryFrom<String> for HttpFacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to facilitator failed");
        }
    }
}

#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use s402::proto::SupportedKind;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn supported_response() -> SupportedResponse {
        SupportedResponse {
            kinds: vec![SupportedKind {
                x402_version: 2,
                scheme: "exact".into(),
                network: "eip155:84532".into(),
                extra: None,
            }],
            ..SupportedResponse::default()
        }
    }

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".into(),
            network: "eip155:84532".into(),
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".into(),
            amount: "1500000".into(),
            pay_to: "0x2222222222222222222222222222222222222222".into(),
            max_timeout_seconds: 300,
            extra: json!({}),
        }
    }

    fn payload() -> PaymentPayload {
        PaymentPayload {
            x402_version: 2,
            payload: json!({ "signature": "0x01" }),
            accepted: requirements(),
            resource: None,
            extensions: None,
        }
    }

    #[tokio::test]
    async fn supported_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_response()))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpFacilitatorClient::try_from(server.uri()).unwrap();
        assert_eq!(client.supported().await.unwrap().kinds.len(), 1);
        assert_eq!(client.supported().await.unwrap().kinds.len(), 1);
    }

    #[tokio::test]
    async fn disabled_cache_hits_network_each_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_response()))
            .expect(2)
            .mount(&server)
            .await;

        let client = HttpFacilitatorClient::try_from(server.uri())
            .unwrap()
            .without_supported_cache();
        client.supported().await.unwrap();
        client.supported().await.unwrap();
    }

    #[tokio::test]
    async fn clones_do_not_share_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(supported_response()))
            .expect(2)
            .mount(&server)
            .await;

        let client = HttpFacilitatorClient::try_from(server.uri()).unwrap();
        let copy = client.clone();
        client.supported().await.unwrap();
        copy.supported().await.unwrap();
    }

    #[tokio::test]
    async fn settle_posts_versioned_body_with_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .and(header("x-api-key", "secret"))
            .and(body_partial_json(json!({
                "x402Version": 2,
                "paymentRequirements": { "amount": "1500000" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(SettleResponse::success(
                "0xtx",
                "eip155:84532",
                "0xPayer",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        let client = HttpFacilitatorClient::try_from(server.uri())
            .unwrap()
            .with_headers(headers);

        let settled = FacilitatorClient::settle(&client, &payload(), &requirements())
            .await
            .unwrap();
        assert!(settled.success);
        assert_eq!(settled.transaction, "0xtx");
    }

    #[tokio::test]
    async fn non_200_is_an_http_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = HttpFacilitatorClient::try_from(server.uri()).unwrap();
        let err = client
            .verify(&VerifyRequest::new(&payload(), &requirements()))
            .await
            .unwrap_err();
        match err {
            FacilitatorClientError::HttpStatus { status, body, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn base_url_is_normalized() {
        let client = HttpFacilitatorClient::try_from("https://facilitator.example/api//").unwrap();
        assert_eq!(
            client.verify_url().as_str(),
            "https://facilitator.example/api/verify"
        );
        assert_eq!(
            client.supported_url().as_str(),
            "https://facilitator.example/api/supported"
        );
    }
}
