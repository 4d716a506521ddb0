use crate::domain::operation::CanonicalStatus;
use crate::domain::ports::{Order, OrderPaymentStatus, OrderService, OperationStore, SimulatedRecord};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for simulated ledger records.
///
/// Uses `Arc<RwLock<HashMap<String, SimulatedRecord>>>` so clones share state.
/// Process-local and never persisted: for tests and demos only.
#[derive(Default, Clone)]
pub struct InMemoryOperationStore {
    records: Arc<RwLock<HashMap<String, SimulatedRecord>>>,
}

impl InMemoryOperationStore {
    /// Creates a new, empty in-memory operation store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn insert(&self, record: SimulatedRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.entry(record.operation.id.clone()) {
            Entry::Occupied(entry) => Err(PaymentError::InvalidState(format!(
                "operation {} already exists",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<SimulatedRecord>> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected: CanonicalStatus,
        record: SimulatedRecord,
    ) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.operation.id) {
            Some(current) if current.operation.canonical_status == expected => {
                *current = record;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PaymentError::NotFound(record.operation.id)),
        }
    }

    async fn get_all(&self) -> Result<Vec<SimulatedRecord>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }
}

/// One recorded `update_payment_status` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentStatusUpdate {
    pub order_id: String,
    pub status: OrderPaymentStatus,
    pub operation_id: String,
}

/// In-memory order collaborator keyed by payment reference.
///
/// Keeps a log of every status update it receives, which makes it usable
/// as a test double for reconciliation.
#[derive(Default, Clone)]
pub struct InMemoryOrderService {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    updates: Arc<RwLock<Vec<PaymentStatusUpdate>>>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an order reachable under `payment_reference`.
    pub async fn add_order(&self, order_id: &str, payment_reference: &str) {
        let order = Order {
            id: order_id.to_string(),
            payment_reference: payment_reference.to_string(),
            payment_status: OrderPaymentStatus::Pending,
            payment_operation_id: None,
        };
        let mut orders = self.orders.write().await;
        orders.insert(payment_reference.to_string(), order);
    }

    pub async fn order(&self, order_id: &str) -> Option<Order> {
        let orders = self.orders.read().await;
        orders.values().find(|o| o.id == order_id).cloned()
    }

    pub async fn updates(&self) -> Vec<PaymentStatusUpdate> {
        self.updates.read().await.clone()
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn update_payment_status(
        &self,
        order_id: &str,
        status: OrderPaymentStatus,
        operation_id: &str,
    ) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .values_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| PaymentError::NotFound(format!("order {order_id}")))?;
        order.payment_status = status;
        order.payment_operation_id = Some(operation_id.to_string());

        self.updates.write().await.push(PaymentStatusUpdate {
            order_id: order_id.to_string(),
            status,
            operation_id: operation_id.to_string(),
        });
        Ok(())
    }

    async fn get_order_by_payment_reference(&self, reference: &str) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(reference).cloned())
    }
}
