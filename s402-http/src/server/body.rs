//! Request body capture.
//!
//! The body is read into memory once so the engine, the before-settle hook,
//! the handler and [`PaymentData`](super::PaymentData) all see the same
//! bytes. The request handed on carries a fresh body over those bytes and
//! its original headers.

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use bytes::Bytes;
use http::StatusCode;
use http_body::Body as _;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::json;

/// Default body limit, 2 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Errors produced while buffering a request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyCaptureError {
    /// The body is larger than the configured limit.
    #[error("request body exceeds {limit} bytes")]
    TooLarge {
        /// The configured limit.
        limit: usize,
    },
    /// The body stream failed.
    #[error("failed to read request body: {0}")]
    Read(String),
}

impl BodyCaptureError {
    /// Returns the HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Read(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Renders the error as a JSON response.
    #[must_use]
    pub fn to_response(&self) -> Response {
        crate::server::json_response(self.status(), &json!({ "error": self.to_string() }))
    }
}

/// Buffers the request body and returns a request that can be read again.
///
/// A body whose size is known to be zero is not polled.
///
/// # Errors
///
/// [`BodyCaptureError::TooLarge`] past `limit`, [`BodyCaptureError::Read`]
/// if the stream fails.
pub async fn capture_body(
    request: Request,
    limit: usize,
) -> Result<(Request, Bytes), BodyCaptureError> {
    let (parts, body) = request.into_parts();
    if body.size_hint().exact() == Some(0) {
        return Ok((Request::from_parts(parts, Body::empty()), Bytes::new()));
    }

    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|err| {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                BodyCaptureError::TooLarge { limit }
            } else {
                BodyCaptureError::Read(err.to_string())
            }
        })?
        .to_bytes();

    Ok((Request::from_parts(parts, Body::from(bytes.clone())), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    fn request(body: Body) -> Request {
        http::Request::builder()
            .method("POST")
            .uri("/checkout")
            .header(header::CONTENT_LENGTH, "16")
            .header(header::CONTENT_ENCODING, "identity")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn body_is_readable_again() {
        let (request, captured) = capture_body(request(Body::from("{\"items\":[1,2]}")), 1024)
            .await
            .unwrap();
        assert_eq!(captured.as_ref(), b"{\"items\":[1,2]}");

        assert_eq!(request.headers()[header::CONTENT_LENGTH], "16");
        assert_eq!(request.headers()[header::CONTENT_ENCODING], "identity");
        let again = request.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(again, captured);
    }

    #[tokio::test]
    async fn empty_body_is_empty() {
        let (_, captured) = capture_body(request(Body::empty()), 1024).await.unwrap();
        assert!(captured.is_empty());
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let err = capture_body(request(Body::from(vec![b'x'; 64])), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, BodyCaptureError::TooLarge { limit: 16 }));
        assert_eq!(err.to_response().status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
