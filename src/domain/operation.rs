use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Free-form key/value pairs attached to an operation.
///
/// Ordered so that serialized requests are stable across runs.
pub type Metadata = BTreeMap<String, String>;

/// Canonical metadata key linking an operation back to its order.
pub const ORDER_ID_KEY: &str = "order_id";

/// The external payment providers the core can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Card processor with payment intents and refunds.
    CardProcessor,
    /// Hosted checkout driven by a preference and a buyer redirect.
    RedirectCheckout,
    /// Transaction API with HMAC-signed event callbacks.
    TransactionGateway,
}

impl Provider {
    pub const ALL: [Provider; 3] = [
        Provider::CardProcessor,
        Provider::RedirectCheckout,
        Provider::TransactionGateway,
    ];

    /// Namespace prefix of operation ids issued for this provider.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Provider::CardProcessor => "pi",
            Provider::RedirectCheckout => "pref",
            Provider::TransactionGateway => "txn",
        }
    }

    /// Name of the field the provider uses to carry the order linkage.
    pub fn order_reference_field(&self) -> &'static str {
        match self {
            Provider::CardProcessor => ORDER_ID_KEY,
            Provider::RedirectCheckout => "external_reference",
            Provider::TransactionGateway => "reference",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::CardProcessor => "card_processor",
            Provider::RedirectCheckout => "redirect_checkout",
            Provider::TransactionGateway => "transaction_gateway",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card_processor" | "card" => Ok(Provider::CardProcessor),
            "redirect_checkout" | "redirect" => Ok(Provider::RedirectCheckout),
            "transaction_gateway" | "gateway" => Ok(Provider::TransactionGateway),
            other => Err(PaymentError::InvalidPayload(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

/// Whether an adapter talks to the real provider or to the in-process ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Live,
    Simulated,
}

/// Provider-agnostic lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Created,
    PendingMethod,
    PendingConfirmation,
    Succeeded,
    Declined,
    Errored,
    Refunded,
    PartiallyRefunded,
}

impl CanonicalStatus {
    /// Direct successors in the transition table.
    pub fn successors(&self) -> &'static [CanonicalStatus] {
        use CanonicalStatus::*;
        match self {
            Created => &[PendingMethod],
            PendingMethod => &[PendingConfirmation],
            PendingConfirmation => &[Succeeded, Declined, Errored],
            Succeeded => &[Refunded, PartiallyRefunded],
            PartiallyRefunded => &[Refunded],
            Declined | Errored | Refunded => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalStatus::Declined | CanonicalStatus::Errored | CanonicalStatus::Refunded
        )
    }

    pub fn can_transition_to(&self, next: CanonicalStatus) -> bool {
        self.successors().contains(&next)
    }

    /// Whether `next` lies strictly ahead of `self` along the transition
    /// table. Providers report the latest state they know about, so
    /// intermediate states may be skipped.
    pub fn can_advance_to(&self, next: CanonicalStatus) -> bool {
        self.successors()
            .iter()
            .any(|s| *s == next || s.can_advance_to(next))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalStatus::Created => "created",
            CanonicalStatus::PendingMethod => "pending_method",
            CanonicalStatus::PendingConfirmation => "pending_confirmation",
            CanonicalStatus::Succeeded => "succeeded",
            CanonicalStatus::Declined => "declined",
            CanonicalStatus::Errored => "errored",
            CanonicalStatus::Refunded => "refunded",
            CanonicalStatus::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical unit of work every adapter translates into.
///
/// `amount_minor` is expressed in the provider's own minor-unit convention,
/// see [`crate::domain::amount::MinorUnitPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOperation {
    pub id: String,
    pub provider: Provider,
    pub amount_minor: i64,
    pub currency: String,
    pub canonical_status: CanonicalStatus,
    /// Raw status as last received from the provider.
    pub provider_status: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl PaymentOperation {
    /// The order reference carried in metadata, under the canonical key or
    /// the provider's own linkage field.
    pub fn order_reference(&self) -> Option<&str> {
        self.metadata
            .get(ORDER_ID_KEY)
            .or_else(|| self.metadata.get(self.provider.order_reference_field()))
            .map(String::as_str)
            .filter(|r| !r.trim().is_empty())
    }

    pub fn is_linkable(&self) -> bool {
        self.order_reference().is_some()
    }

    /// Moves the operation forward to `next`, recording the raw provider
    /// status. Re-applying the current status only refreshes the raw status.
    pub fn advance(&mut self, next: CanonicalStatus, provider_status: &str) -> Result<()> {
        if self.canonical_status != next && !self.canonical_status.can_advance_to(next) {
            return Err(PaymentError::InvalidState(format!(
                "{} cannot move from {} to {}",
                self.id, self.canonical_status, next
            )));
        }
        self.canonical_status = next;
        self.provider_status = provider_status.to_string();
        Ok(())
    }
}

/// Outcome of a refund request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
    pub operation_id: String,
    pub amount_minor: i64,
    /// `Refunded` or `PartiallyRefunded`, depending on the cumulative
    /// refunded amount compared to the original. A refund the provider has
    /// not settled yet reports the operation's unchanged status.
    pub status: CanonicalStatus,
    pub provider_status: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::CanonicalStatus::*;

    fn operation(status: CanonicalStatus) -> PaymentOperation {
        PaymentOperation {
            id: "pi_1".to_string(),
            provider: Provider::CardProcessor,
            amount_minor: 1000,
            currency: "USD".to_string(),
            canonical_status: status,
            provider_status: String::new(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_transition_table() {
        assert!(Created.can_transition_to(PendingMethod));
        assert!(PendingMethod.can_transition_to(PendingConfirmation));
        assert!(PendingConfirmation.can_transition_to(Declined));
        assert!(Succeeded.can_transition_to(PartiallyRefunded));
        assert!(!PendingMethod.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(PendingConfirmation));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        for status in [Declined, Errored, Refunded] {
            assert!(status.is_terminal());
            assert!(status.successors().is_empty());
            assert!(!status.can_advance_to(Succeeded));
        }
        assert!(!PartiallyRefunded.is_terminal());
    }

    #[test]
    fn test_advance_skips_intermediate_states() {
        assert!(PendingMethod.can_advance_to(Succeeded));
        assert!(Created.can_advance_to(Refunded));
        assert!(!Succeeded.can_advance_to(Declined));
        assert!(!Refunded.can_advance_to(PartiallyRefunded));
    }

    #[test]
    fn test_advance_rejects_resurrection() {
        let mut op = operation(Declined);
        let result = op.advance(Succeeded, "succeeded");
        assert!(matches!(result, Err(PaymentError::InvalidState(_))));
        assert_eq!(op.canonical_status, Declined);
    }

    #[test]
    fn test_advance_same_status_is_refresh() {
        let mut op = operation(Succeeded);
        op.advance(Succeeded, "approved").unwrap();
        assert_eq!(op.provider_status, "approved");
    }

    #[test]
    fn test_order_reference_resolution() {
        let mut op = operation(Created);
        assert!(!op.is_linkable());

        op.metadata.insert(ORDER_ID_KEY.into(), "42".into());
        assert_eq!(op.order_reference(), Some("42"));

        let mut gateway = operation(Created);
        gateway.provider = Provider::TransactionGateway;
        gateway.metadata.insert("reference".into(), "order-7".into());
        assert_eq!(gateway.order_reference(), Some("order-7"));

        gateway.metadata.insert("reference".into(), "  ".into());
        assert!(!gateway.is_linkable());
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("card".parse::<Provider>().unwrap(), Provider::CardProcessor);
        assert_eq!(
            "Transaction_Gateway".parse::<Provider>().unwrap(),
            Provider::TransactionGateway
        );
        assert!("paypal".parse::<Provider>().is_err());
    }
}
