//! Transaction gateway adapter.
//!
//! Transactions are created pending and settle asynchronously; the final
//! status arrives through signed events or a refresh. Amounts are always in
//! cents, whatever the currency exponent.

use super::{
    Backend, ensure_reachable, ensure_refundable, live_client, refuse_terminal, unknown_status,
};
use crate::application::verifier::integrity_signature;
use crate::config::{PaymentConfig, ProviderSettings};
use crate::domain::amount::{ensure_positive, normalize_currency};
use crate::domain::operation::{
    CanonicalStatus, Metadata, Mode, ORDER_ID_KEY, PaymentOperation, Provider, RefundResult,
};
use crate::domain::ports::{OperationStoreBox, PaymentProvider};
use crate::error::{PaymentError, Result};
use crate::infrastructure::http::LiveClient;
use crate::infrastructure::simulated::SimulatedLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

const PROVIDER: Provider = Provider::TransactionGateway;

/// Metadata key under which a created operation carries its widget
/// integrity signature.
pub const INTEGRITY_SIGNATURE_KEY: &str = "integrity_signature";

pub fn map_status(raw: &str) -> CanonicalStatus {
    match raw {
        "PENDING" => CanonicalStatus::PendingConfirmation,
        "APPROVED" => CanonicalStatus::Succeeded,
        "DECLINED" => CanonicalStatus::Declined,
        "ERROR" => CanonicalStatus::Errored,
        other => unknown_status(PROVIDER, other),
    }
}

fn native_status(status: CanonicalStatus) -> &'static str {
    match status {
        CanonicalStatus::Created
        | CanonicalStatus::PendingMethod
        | CanonicalStatus::PendingConfirmation => "PENDING",
        CanonicalStatus::Succeeded => "APPROVED",
        CanonicalStatus::Declined => "DECLINED",
        CanonicalStatus::Errored => "ERROR",
        CanonicalStatus::Refunded => "REFUNDED",
        CanonicalStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
    }
}

#[derive(Debug, Serialize)]
struct TransactionRequest<'a> {
    amount_in_cents: i64,
    currency: &'a str,
    reference: Option<&'a str>,
    metadata: &'a Metadata,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Transaction,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    id: String,
    status: String,
    amount_in_cents: i64,
    currency: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl Transaction {
    fn into_operation(self) -> PaymentOperation {
        let mut metadata = self.metadata;
        if let Some(reference) = self.reference {
            metadata.insert(PROVIDER.order_reference_field().to_string(), reference);
        }
        PaymentOperation {
            canonical_status: map_status(&self.status),
            id: self.id,
            provider: PROVIDER,
            amount_minor: self.amount_in_cents,
            currency: self.currency.to_ascii_uppercase(),
            provider_status: self.status,
            metadata,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

pub struct TransactionGatewayAdapter {
    backend: Backend,
    integrity_secret: Option<SecretString>,
}

impl TransactionGatewayAdapter {
    pub fn simulated(store: OperationStoreBox) -> Self {
        Self {
            backend: Backend::Simulated(SimulatedLedger::new(
                PROVIDER,
                CanonicalStatus::PendingConfirmation,
                native_status,
                store,
            )),
            integrity_secret: None,
        }
    }

    pub fn live(client: LiveClient, integrity_secret: SecretString) -> Self {
        Self {
            backend: Backend::Live(client),
            integrity_secret: Some(integrity_secret),
        }
    }

    pub fn from_config(config: &PaymentConfig, store: OperationStoreBox) -> Result<Self> {
        let settings = config.settings(PROVIDER);
        let mut adapter = match config.resolve_mode(PROVIDER)? {
            Mode::Simulated => Self::simulated(store),
            Mode::Live => Self {
                backend: Backend::Live(live_client(config, PROVIDER)?),
                integrity_secret: None,
            },
        };
        adapter.integrity_secret = ProviderSettings::secret(&settings.integrity_secret);
        Ok(adapter)
    }

    pub fn ledger(&self) -> Option<&SimulatedLedger> {
        match &self.backend {
            Backend::Simulated(ledger) => Some(ledger),
            Backend::Live(_) => None,
        }
    }

    /// Signature the storefront widget needs to open a checkout for
    /// `operation`.
    pub fn widget_signature(&self, operation: &PaymentOperation) -> Result<String> {
        let secret = self.integrity_secret.as_ref().ok_or_else(|| {
            PaymentError::Configuration(format!("{PROVIDER} integrity secret is not configured"))
        })?;
        let reference = operation.order_reference().ok_or_else(|| {
            PaymentError::InvalidPayload(format!("{} carries no order reference", operation.id))
        })?;
        Ok(integrity_signature(
            reference,
            operation.amount_minor,
            &operation.currency,
            secret.expose_secret(),
        ))
    }

    /// Signs a freshly created operation for the widget checkout when an
    /// integrity secret is configured and the operation links to an order.
    fn with_widget_signature(&self, mut operation: PaymentOperation) -> Result<PaymentOperation> {
        if self.integrity_secret.is_some() && operation.is_linkable() {
            let signature = self.widget_signature(&operation)?;
            operation
                .metadata
                .insert(INTEGRITY_SIGNATURE_KEY.to_string(), signature);
        }
        Ok(operation)
    }

    async fn fetch(client: &LiveClient, id: &str) -> Result<PaymentOperation> {
        let envelope: Envelope = client
            .send(client.get(&format!("/v1/transactions/{id}")), id)
            .await?;
        Ok(envelope.data.into_operation())
    }
}

#[async_trait]
impl PaymentProvider for TransactionGatewayAdapter {
    fn provider(&self) -> Provider {
        PROVIDER
    }

    fn mode(&self) -> Mode {
        self.backend.mode()
    }

    async fn create_operation(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: Metadata,
    ) -> Result<PaymentOperation> {
        let operation = match &self.backend {
            Backend::Simulated(ledger) => {
                let mut metadata = metadata;
                if let Some(order) = metadata.get(ORDER_ID_KEY).cloned() {
                    metadata
                        .entry(PROVIDER.order_reference_field().to_string())
                        .or_insert(order);
                }
                ledger.create(amount_minor, currency, metadata).await?
            }
            Backend::Live(client) => {
                ensure_positive(amount_minor)?;
                let currency = normalize_currency(currency)?;
                let reference = metadata
                    .get(ORDER_ID_KEY)
                    .or_else(|| metadata.get(PROVIDER.order_reference_field()))
                    .map(String::as_str);
                let request = TransactionRequest {
                    amount_in_cents: amount_minor,
                    currency: &currency,
                    reference,
                    metadata: &metadata,
                };
                let envelope: Envelope = client
                    .send(client.post_json("/v1/transactions", &request), "transaction")
                    .await?;
                tracing::info!(operation_id = %envelope.data.id, amount_minor, "transaction created");
                envelope.data.into_operation()
            }
        };
        self.with_widget_signature(operation)
    }

    async fn confirm_operation(&self, id: &str) -> Result<PaymentOperation> {
        match &self.backend {
            // Emulates the gateway settling the transaction.
            Backend::Simulated(ledger) => ledger.confirm(id).await,
            Backend::Live(client) => refuse_terminal(Self::fetch(client, id).await?),
        }
    }

    async fn refund_operation(
        &self,
        id: &str,
        _amount_minor: Option<i64>,
    ) -> Result<RefundResult> {
        let operation = self.get_operation(id).await?;
        ensure_refundable(&operation)?;
        Err(PaymentError::Unsupported(format!(
            "{PROVIDER} refunds are handled outside this integration ({id})"
        )))
    }

    async fn get_operation(&self, id: &str) -> Result<PaymentOperation> {
        match &self.backend {
            Backend::Simulated(ledger) => ledger.get(id).await,
            Backend::Live(client) => Self::fetch(client, id).await,
        }
    }

    async fn apply_reported_status(
        &self,
        id: &str,
        status: CanonicalStatus,
    ) -> Result<PaymentOperation> {
        match &self.backend {
            Backend::Simulated(ledger) => ledger.apply(id, status).await,
            Backend::Live(client) => ensure_reachable(Self::fetch(client, id).await?, status),
        }
    }

    async fn simulate_decline(&self, id: &str) -> Result<PaymentOperation> {
        match &self.backend {
            Backend::Simulated(ledger) => ledger.decline(id).await,
            Backend::Live(_) => Err(PaymentError::Unsupported(format!(
                "cannot inject a decline for {id} on a live {PROVIDER} adapter"
            ))),
        }
    }

    async fn simulate_failure(&self, id: &str) -> Result<PaymentOperation> {
        match &self.backend {
            Backend::Simulated(ledger) => ledger.fail(id).await,
            Backend::Live(_) => Err(PaymentError::Unsupported(format!(
                "cannot inject a failure for {id} on a live {PROVIDER} adapter"
            ))),
        }
    }
}
