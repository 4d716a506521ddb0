use super::operation::{
    CanonicalStatus, Metadata, Mode, PaymentOperation, Provider, RefundResult,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Entry of the simulated ledger: the operation plus its refund history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedRecord {
    pub operation: PaymentOperation,
    pub refunds: Vec<RefundResult>,
}

impl SimulatedRecord {
    pub fn new(operation: PaymentOperation) -> Self {
        Self {
            operation,
            refunds: Vec::new(),
        }
    }

    pub fn refunded_minor(&self) -> i64 {
        self.refunds.iter().map(|r| r.amount_minor).sum()
    }
}

/// Storage behind the simulated ledger.
///
/// Injected so every test can run against a fresh instance.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Inserts a new record. Fails with `InvalidState` if the id is taken.
    async fn insert(&self, record: SimulatedRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<SimulatedRecord>>;
    /// Replaces the stored record only if its canonical status still equals
    /// `expected`. Returns `false` if another writer got there first.
    async fn compare_and_swap(
        &self,
        expected: CanonicalStatus,
        record: SimulatedRecord,
    ) -> Result<bool>;
    async fn get_all(&self) -> Result<Vec<SimulatedRecord>>;
}

pub type OperationStoreBox = Box<dyn OperationStore>;
pub type OperationStoreFactory = Box<dyn Fn() -> OperationStoreBox + Send + Sync>;

/// The contract every provider adapter fulfils, live or simulated.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn provider(&self) -> Provider;
    fn mode(&self) -> Mode;

    /// Starts a payment. Either the whole request is accepted or nothing is
    /// recorded.
    async fn create_operation(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: Metadata,
    ) -> Result<PaymentOperation>;

    /// Confirms the payment, or refreshes its status for providers without
    /// an explicit confirm step.
    async fn confirm_operation(&self, id: &str) -> Result<PaymentOperation>;

    /// Refunds the full amount when `amount_minor` is `None`.
    async fn refund_operation(&self, id: &str, amount_minor: Option<i64>)
    -> Result<RefundResult>;

    /// Pure read. Never creates a record.
    async fn get_operation(&self, id: &str) -> Result<PaymentOperation>;

    /// Brings the operation in line with a status the provider reported out
    /// of band, e.g. through a verified webhook. Fails with `InvalidState`
    /// when `status` lags behind or conflicts with the current one.
    async fn apply_reported_status(
        &self,
        id: &str,
        status: CanonicalStatus,
    ) -> Result<PaymentOperation>;

    /// Forces a pending operation into `Declined`. Simulated mode only.
    async fn simulate_decline(&self, id: &str) -> Result<PaymentOperation> {
        Err(PaymentError::Unsupported(format!(
            "cannot inject a decline for {id} on a live {} adapter",
            self.provider()
        )))
    }

    /// Forces a pending operation into `Errored`. Simulated mode only.
    async fn simulate_failure(&self, id: &str) -> Result<PaymentOperation> {
        Err(PaymentError::Unsupported(format!(
            "cannot inject a failure for {id} on a live {} adapter",
            self.provider()
        )))
    }
}

pub type ProviderBox = Box<dyn PaymentProvider>;

/// Payment state as exposed to the order collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl From<CanonicalStatus> for OrderPaymentStatus {
    fn from(status: CanonicalStatus) -> Self {
        match status {
            CanonicalStatus::Created
            | CanonicalStatus::PendingMethod
            | CanonicalStatus::PendingConfirmation => OrderPaymentStatus::Pending,
            CanonicalStatus::Succeeded => OrderPaymentStatus::Paid,
            CanonicalStatus::Declined | CanonicalStatus::Errored => OrderPaymentStatus::Failed,
            CanonicalStatus::Refunded => OrderPaymentStatus::Refunded,
            CanonicalStatus::PartiallyRefunded => OrderPaymentStatus::PartiallyRefunded,
        }
    }
}

/// The slice of an order the payment core needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Reference the order was published under to the providers.
    pub payment_reference: String,
    pub payment_status: OrderPaymentStatus,
    pub payment_operation_id: Option<String>,
}

/// Order service owned by the rest of the application.
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn update_payment_status(
        &self,
        order_id: &str,
        status: OrderPaymentStatus,
        operation_id: &str,
    ) -> Result<()>;

    async fn get_order_by_payment_reference(&self, reference: &str) -> Result<Option<Order>>;
}

pub type OrderServiceBox = Box<dyn OrderService>;
