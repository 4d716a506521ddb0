//! Provider adapters.
//!
//! Each adapter owns either a live HTTP client or a simulated ledger, chosen
//! once at construction, and translates between the provider's vocabulary
//! and the canonical model at the boundary only.

pub mod card_processor;
pub mod redirect_checkout;
pub mod transaction_gateway;

use super::http::LiveClient;
use super::simulated::SimulatedLedger;
use crate::config::{PaymentConfig, ProviderSettings};
use crate::domain::operation::{CanonicalStatus, Mode, PaymentOperation, Provider};
use crate::domain::ports::{OperationStoreBox, ProviderBox};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};

pub use card_processor::CardProcessorAdapter;
pub use redirect_checkout::RedirectCheckoutAdapter;
pub use transaction_gateway::TransactionGatewayAdapter;

pub(crate) enum Backend {
    Live(LiveClient),
    Simulated(SimulatedLedger),
}

impl Backend {
    pub(crate) fn mode(&self) -> Mode {
        match self {
            Backend::Live(_) => Mode::Live,
            Backend::Simulated(_) => Mode::Simulated,
        }
    }
}

/// Builds the live client for `provider` from its settings.
pub(crate) fn live_client(config: &PaymentConfig, provider: Provider) -> Result<LiveClient> {
    let api_key = ProviderSettings::secret(&config.settings(provider).api_key).ok_or_else(|| {
        PaymentError::Configuration(format!("{provider} api credentials are missing"))
    })?;
    LiveClient::new(config.base_url(provider), api_key, config.timeout)
}

/// Builds the adapter for `provider`, live or simulated according to
/// `config`. The store is only used in simulated mode.
pub fn build_provider(
    provider: Provider,
    config: &PaymentConfig,
    store: OperationStoreBox,
) -> Result<ProviderBox> {
    let adapter: ProviderBox = match provider {
        Provider::CardProcessor => Box::new(CardProcessorAdapter::from_config(config, store)?),
        Provider::RedirectCheckout => {
            Box::new(RedirectCheckoutAdapter::from_config(config, store)?)
        }
        Provider::TransactionGateway => {
            Box::new(TransactionGatewayAdapter::from_config(config, store)?)
        }
    };
    tracing::info!(provider = %provider, mode = ?adapter.mode(), "payment provider ready");
    Ok(adapter)
}

/// Result of a status refresh used as `confirm`: terminal failures and
/// full refunds cannot be confirmed again.
pub(crate) fn refuse_terminal(operation: PaymentOperation) -> Result<PaymentOperation> {
    if operation.canonical_status.is_terminal() {
        return Err(PaymentError::InvalidState(format!(
            "{} is {} and cannot be confirmed",
            operation.id, operation.canonical_status
        )));
    }
    Ok(operation)
}

/// Refunds require a succeeded (or partially refunded) operation, whatever
/// the provider supports.
pub(crate) fn ensure_refundable(operation: &PaymentOperation) -> Result<()> {
    if !matches!(
        operation.canonical_status,
        CanonicalStatus::Succeeded | CanonicalStatus::PartiallyRefunded
    ) {
        return Err(PaymentError::InvalidState(format!(
            "{} is {} and cannot be refunded",
            operation.id, operation.canonical_status
        )));
    }
    Ok(())
}

/// Checks a reported status against the provider's own view of the
/// operation. The live provider is authoritative, so nothing is written.
pub(crate) fn ensure_reachable(
    operation: PaymentOperation,
    reported: CanonicalStatus,
) -> Result<PaymentOperation> {
    let current = operation.canonical_status;
    if current != reported && !current.can_advance_to(reported) {
        return Err(PaymentError::InvalidState(format!(
            "{} is {current}, reported {reported}",
            operation.id
        )));
    }
    Ok(operation)
}

/// Logs a provider status missing from the mapping table; the caller maps
/// it to `Errored`.
pub(crate) fn unknown_status(provider: Provider, raw: &str) -> CanonicalStatus {
    tracing::warn!(provider = %provider, provider_status = raw, "unrecognized provider status");
    CanonicalStatus::Errored
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}
