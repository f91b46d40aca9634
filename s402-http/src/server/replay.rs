//! In-process replay guard.
//!
//! Each authorization may be settled once. The ledger records a claim per
//! nonce before settlement and rejects a second claim while the first is
//! live. A claim is released when the facilitator explicitly rejects the
//! settlement, and kept when it succeeds or the outcome is unknown.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use s402::proto::{PaymentPayload, PaymentRequirements};

/// Claim count above which expired claims are purged on the next claim.
const PURGE_THRESHOLD: usize = 4096;

/// Upper bound on how long a claim is held, whatever the authorization says.
pub const MAX_CLAIM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Settlement claims keyed by authorization nonce.
#[derive(Debug, Default)]
pub struct SettlementLedger {
    claims: DashMap<String, Instant>,
}

impl SettlementLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The dedup key: the EIP-3009 nonce, else the canonical payload JSON.
    #[must_use]
    pub fn key(payload: &PaymentPayload) -> String {
        payload.exact_evm().map_or_else(
            |_| format!("{}:{}", payload.scheme(), payload.payload),
            |evm| format!("{}:{}", payload.network(), evm.authorization.nonce.to_ascii_lowercase()),
        )
    }

    /// Claims the payload. Returns `false` if it is already claimed.
    pub fn claim(&self, payload: &PaymentPayload, requirements: &PaymentRequirements) -> bool {
        if self.claims.len() >= PURGE_THRESHOLD {
            self.purge();
        }
        let now = Instant::now();
        let expires_at = now
            .checked_add(claim_ttl(payload, requirements))
            .unwrap_or(now);
        match self.claims.entry(Self::key(payload)) {
            Entry::Occupied(mut entry) if *entry.get() <= now => {
                entry.insert(expires_at);
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        }
    }

    /// Releases a claim so the authorization can be submitted again.
    pub fn release(&self, payload: &PaymentPayload) {
        self.claims.remove(&Self::key(payload));
    }

    /// Drops expired claims.
    pub fn purge(&self) {
        let now = Instant::now();
        self.claims.retain(|_, expires_at| *expires_at > now);
    }

    /// Number of live and expired claims held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Returns `true` if no claims are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Until `validBefore` when the authorization carries one, else
/// `maxTimeoutSeconds`, never beyond [`MAX_CLAIM_TTL`].
fn claim_ttl(payload: &PaymentPayload, requirements: &PaymentRequirements) -> Duration {
    let fallback = Duration::from_secs(requirements.max_timeout_seconds);
    let ttl = payload.exact_evm().map_or(fallback, |evm| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        evm.authorization
            .valid_before
            .inner()
            .checked_sub(now)
            .map_or(fallback, Duration::from_secs)
    });
    ttl.min(MAX_CLAIM_TTL)
}
