//! Error types for header encoding and decoding.

/// Errors that can occur while encoding or decoding payment headers.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The header is not valid base64.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The encoded value cannot be carried in an HTTP header.
    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    /// The header is present but not visible ASCII.
    #[error("header is not visible ASCII")]
    NotAscii,

    /// The payload uses a protocol version this server does not speak.
    #[error("unsupported x402 version {0}")]
    UnsupportedVersion(u32),
}
