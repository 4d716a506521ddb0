//! In-process emulation of a provider's transaction lifecycle.
//!
//! Serves every adapter operation when no live credentials are configured.
//! Storage is injected and process-local; nothing here is durable, so the
//! ledger is only meant for tests, demos and local development.

use crate::domain::amount::{ensure_positive, normalize_currency};
use crate::domain::operation::{
    CanonicalStatus, Metadata, PaymentOperation, Provider, RefundResult,
};
use crate::domain::ports::{OperationStoreBox, SimulatedRecord};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use uuid::Uuid;

/// Renders a canonical status in the provider's own vocabulary.
pub type NativeStatusFn = fn(CanonicalStatus) -> &'static str;

pub struct SimulatedLedger {
    provider: Provider,
    initial_status: CanonicalStatus,
    native_status: NativeStatusFn,
    store: OperationStoreBox,
}

impl SimulatedLedger {
    /// Creates a ledger whose new records start in `initial_status`
    /// (`PendingMethod` or `PendingConfirmation`, depending on provider style).
    pub fn new(
        provider: Provider,
        initial_status: CanonicalStatus,
        native_status: NativeStatusFn,
        store: OperationStoreBox,
    ) -> Self {
        Self {
            provider,
            initial_status,
            native_status,
            store,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// `<prefix>_simulated_<millis>_<uuid>`; the UUIDv4 suffix carries the
    /// uniqueness, the timestamp only aids reading logs.
    pub fn generate_id(&self, prefix: &str) -> String {
        format!(
            "{}_simulated_{}_{}",
            prefix,
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        )
    }

    pub async fn create(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: Metadata,
    ) -> Result<PaymentOperation> {
        ensure_positive(amount_minor)?;
        let currency = normalize_currency(currency)?;

        let operation = PaymentOperation {
            id: self.generate_id(self.provider.id_prefix()),
            provider: self.provider,
            amount_minor,
            currency,
            canonical_status: self.initial_status,
            provider_status: (self.native_status)(self.initial_status).to_string(),
            metadata,
            created_at: Utc::now(),
        };
        self.store
            .insert(SimulatedRecord::new(operation.clone()))
            .await?;

        tracing::info!(
            provider = %self.provider,
            operation_id = %operation.id,
            amount_minor,
            status = %operation.canonical_status,
            "simulated operation created"
        );
        Ok(operation)
    }

    /// Deterministically drives the operation to `Succeeded`.
    ///
    /// Confirming an operation that already succeeded (or was partially
    /// refunded) returns it unchanged.
    pub async fn confirm(&self, id: &str) -> Result<PaymentOperation> {
        loop {
            let record = self.load(id).await?;
            let current = record.operation.canonical_status;
            match current {
                CanonicalStatus::Succeeded | CanonicalStatus::PartiallyRefunded => {
                    return Ok(record.operation);
                }
                status if status.is_terminal() => {
                    return Err(PaymentError::InvalidState(format!(
                        "{id} is {status} and cannot be confirmed"
                    )));
                }
                _ => {}
            }

            let mut next = record;
            next.operation.advance(
                CanonicalStatus::Succeeded,
                (self.native_status)(CanonicalStatus::Succeeded),
            )?;
            if self.store.compare_and_swap(current, next.clone()).await? {
                tracing::info!(provider = %self.provider, operation_id = %id, "simulated operation confirmed");
                return Ok(next.operation);
            }
            tracing::debug!(operation_id = %id, "concurrent update while confirming, retrying");
        }
    }

    /// Refunds `amount_minor`, or whatever remains refundable when `None`.
    pub async fn refund(&self, id: &str, amount_minor: Option<i64>) -> Result<RefundResult> {
        loop {
            let record = self.load(id).await?;
            let operation = &record.operation;
            let current = operation.canonical_status;
            if !matches!(
                current,
                CanonicalStatus::Succeeded | CanonicalStatus::PartiallyRefunded
            ) {
                return Err(PaymentError::InvalidState(format!(
                    "{id} is {current} and cannot be refunded"
                )));
            }

            let remaining = operation.amount_minor - record.refunded_minor();
            let amount = amount_minor.unwrap_or(remaining);
            ensure_positive(amount)?;
            if amount > remaining {
                return Err(PaymentError::InvalidAmount(format!(
                    "refund of {amount} exceeds refundable {remaining} for {id}"
                )));
            }

            let status = if amount == remaining {
                CanonicalStatus::Refunded
            } else {
                CanonicalStatus::PartiallyRefunded
            };
            let refund = RefundResult {
                refund_id: self.generate_id("re"),
                operation_id: id.to_string(),
                amount_minor: amount,
                status,
                provider_status: (self.native_status)(status).to_string(),
                created_at: Utc::now(),
            };

            let mut next = record.clone();
            next.refunds.push(refund.clone());
            next.operation
                .advance(status, (self.native_status)(status))?;
            if self.store.compare_and_swap(current, next).await? {
                tracing::info!(
                    provider = %self.provider,
                    operation_id = %id,
                    amount_minor = amount,
                    status = %status,
                    "simulated refund recorded"
                );
                return Ok(refund);
            }
            tracing::debug!(operation_id = %id, "concurrent update while refunding, retrying");
        }
    }

    /// Pure read: an unknown id is `NotFound`, never a fabricated record.
    pub async fn get(&self, id: &str) -> Result<PaymentOperation> {
        Ok(self.load(id).await?.operation)
    }

    /// Explicitly inserts a prepared operation, e.g. demo fixtures.
    pub async fn seed(&self, operation: PaymentOperation) -> Result<()> {
        if operation.provider != self.provider {
            return Err(PaymentError::InvalidPayload(format!(
                "cannot seed a {} operation into the {} ledger",
                operation.provider, self.provider
            )));
        }
        self.store.insert(SimulatedRecord::new(operation)).await
    }

    pub async fn decline(&self, id: &str) -> Result<PaymentOperation> {
        self.apply(id, CanonicalStatus::Declined).await
    }

    pub async fn fail(&self, id: &str) -> Result<PaymentOperation> {
        self.apply(id, CanonicalStatus::Errored).await
    }

    pub async fn records(&self) -> Result<Vec<SimulatedRecord>> {
        self.store.get_all().await
    }

    /// Moves the record to `status` if it lies ahead of the current one.
    /// Re-applying the current status is a no-op; anything else is
    /// `InvalidState`.
    pub async fn apply(&self, id: &str, status: CanonicalStatus) -> Result<PaymentOperation> {
        loop {
            let record = self.load(id).await?;
            let current = record.operation.canonical_status;
            if current == status {
                return Ok(record.operation);
            }
            let mut next = record;
            next.operation
                .advance(status, (self.native_status)(status))?;
            if self.store.compare_and_swap(current, next.clone()).await? {
                tracing::info!(
                    provider = %self.provider,
                    operation_id = %id,
                    from = %current,
                    status = %status,
                    "simulated status applied"
                );
                return Ok(next.operation);
            }
        }
    }

    async fn load(&self, id: &str) -> Result<SimulatedRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))
    }
}
