use super::operation::{CanonicalStatus, Provider};
use serde::{Deserialize, Serialize};

/// How far a decoded webhook can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Signature checked, or the provider runs in simulated mode.
    Verified,
    /// The channel carries no verifiable signature; the status must be
    /// corroborated by a server-side read before it is applied.
    Unverified,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Verified => "verified",
            TrustLevel::Unverified => "unverified",
        }
    }
}

/// Canonical form of an inbound provider callback.
///
/// Ephemeral: built by the verifier, consumed by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: Provider,
    /// Provider event name, e.g. `transaction.updated`.
    pub event_type: String,
    pub operation_id: String,
    pub canonical_status: CanonicalStatus,
    pub provider_status: String,
    /// Order linkage as sent by the provider, already normalized.
    pub order_reference: Option<String>,
    pub trust: TrustLevel,
}

/// Trims a provider-supplied order reference, discarding empty values.
pub fn normalize_order_reference(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|r| !r.is_empty())
        .map(ToString::to_string)
}
