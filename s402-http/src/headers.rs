//! Base64-JSON codecs for the `PAYMENT-*` headers.

use base64::prelude::*;
use http::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use s402::proto::{PaymentPayload, PaymentRequired, SettleResponse, X402_VERSION};

use crate::constants::PAYMENT_SIGNATURE;
use crate::error::HttpError;

fn encode<T: Serialize>(value: &T) -> Result<HeaderValue, HttpError> {
    let json = serde_json::to_vec(value)?;
    Ok(HeaderValue::from_str(&BASE64_STANDARD.encode(json))?)
}

fn decode<T: DeserializeOwned>(header: &str) -> Result<T, HttpError> {
    let bytes = BASE64_STANDARD.decode(header.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encodes a payload for the `PAYMENT-SIGNATURE` header.
///
/// # Errors
///
/// Returns [`HttpError`] if serialization fails.
pub fn encode_payment_signature(payload: &PaymentPayload) -> Result<HeaderValue, HttpError> {
    encode(payload)
}

/// Decodes a `PAYMENT-SIGNATURE` header value.
///
/// # Errors
///
/// Returns [`HttpError`] on malformed base64 or JSON, or on a protocol
/// version other than 2.
pub fn decode_payment_signature(header: &str) -> Result<PaymentPayload, HttpError> {
    let payload: PaymentPayload = decode(header)?;
    if payload.x402_version != X402_VERSION {
        return Err(HttpError::UnsupportedVersion(payload.x402_version));
    }
    Ok(payload)
}

/// Reads and decodes the `PAYMENT-SIGNATURE` header, if present.
///
/// # Errors
///
/// Returns [`HttpError`] if the header is present but malformed.
pub fn payment_signature(headers: &HeaderMap) -> Result<Option<PaymentPayload>, HttpError> {
    headers
        .get(PAYMENT_SIGNATURE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| HttpError::NotAscii)
                .and_then(decode_payment_signature)
        })
        .transpose()
}

/// Encodes a 402 body for the `PAYMENT-REQUIRED` header.
///
/// # Errors
///
/// Returns [`HttpError`] if serialization fails.
pub fn encode_payment_required(required: &PaymentRequired) -> Result<HeaderValue, HttpError> {
    encode(required)
}

/// Decodes a `PAYMENT-REQUIRED` header value.
///
/// # Errors
///
/// Returns [`HttpError`] on malformed base64 or JSON.
pub fn decode_payment_required(header: &str) -> Result<PaymentRequired, HttpError> {
    decode(header)
}

/// Encodes a settlement result for the `PAYMENT-RESPONSE` header.
///
/// # Errors
///
/// Returns [`HttpError`] if serialization fails.
pub fn encode_payment_response(response: &SettleResponse) -> Result<HeaderValue, HttpError> {
    encode(response)
}

/// Decodes a `PAYMENT-RESPONSE` header value.
///
/// # Errors
///
/// Returns [`HttpError`] on malformed base64 or JSON.
pub fn decode_payment_response(header: &str) -> Result<SettleResponse, HttpError> {
    decode(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PAYMENT_REQUIRED, PAYMENT_RESPONSE};
    use s402::proto::PaymentRequirements;
    use serde_json::json;

    fn payload(version: u32) -> PaymentPayload {
        PaymentPayload {
            x402_version: version,
            payload: json!({ "signature": "0x01" }),
            accepted: PaymentRequirements {
                scheme: "exact".into(),
                network: "eip155:8453".into(),
                asset: "0xA".into(),
                amount: "10".into(),
                pay_to: "0xB".into(),
                max_timeout_seconds: 60,
                extra: json!({}),
            },
            resource: None,
            extensions: None,
        }
    }

    #[test]
    fn signature_header_is_read_from_header_map() {
        let mut headers = HeaderMap::new();
        assert!(payment_signature(&headers).unwrap().is_none());

        headers.insert(PAYMENT_SIGNATURE, encode_payment_signature(&payload(2)).unwrap());
        let decoded = payment_signature(&headers).unwrap().unwrap();
        assert_eq!(decoded.accepted.amount, "10");
    }

    #[test]
    fn version_one_payloads_are_rejected() {
        let value = encode_payment_signature(&payload(1)).unwrap();
        let err = decode_payment_signature(value.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedVersion(1)));
    }

    #[test]
    fn garbage_is_a_base64_error() {
        assert!(matches!(
            decode_payment_signature("not base64!!"),
            Err(HttpError::Base64(_))
        ));
    }

    #[test]
    fn response_header_carries_transaction() {
        let value =
            encode_payment_response(&SettleResponse::success("0xtx", "eip155:8453", "0xP")).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(PAYMENT_RESPONSE, value);
        let decoded =
            decode_payment_response(headers[PAYMENT_RESPONSE].to_str().unwrap()).unwrap();
        assert_eq!(decoded.transaction, "0xtx");
        assert!(headers.get(PAYMENT_REQUIRED).is_none());
    }
}
