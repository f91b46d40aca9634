//! HTTP header names and defaults used on the wire.

use http::HeaderName;

/// Client → server: base64 JSON `PaymentPayload`.
pub const PAYMENT_SIGNATURE: HeaderName = HeaderName::from_static("payment-signature");

/// Server → client on 402: base64 JSON `PaymentRequired`.
pub const PAYMENT_REQUIRED: HeaderName = HeaderName::from_static("payment-required");

/// Server → client on success: base64 JSON `SettleResponse`.
pub const PAYMENT_RESPONSE: HeaderName = HeaderName::from_static("payment-response");

/// Value for `Access-Control-Expose-Headers` so browsers can read payment headers.
pub const EXPOSED_PAYMENT_HEADERS: &str = "PAYMENT-REQUIRED, PAYMENT-RESPONSE";

/// Public x402.org facilitator.
pub const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";
