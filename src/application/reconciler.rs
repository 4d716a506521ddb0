use crate::domain::operation::CanonicalStatus;
use crate::domain::ports::{OrderPaymentStatus, OrderServiceBox};
use crate::domain::webhook::{TrustLevel, WebhookEvent};
use crate::error::ErrorKind;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// What happened to a webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order collaborator was updated.
    Applied {
        order_id: String,
        status: OrderPaymentStatus,
    },
    /// This status was already applied for the operation.
    Duplicate,
    /// Nothing was applied; the kind names the anomaly.
    Skipped(ErrorKind),
}

/// Receipt handed back to the provider. Always a success from the
/// provider's point of view, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub operation_id: String,
    pub outcome: ReconcileOutcome,
}

impl Ack {
    pub fn new(operation_id: &str, outcome: ReconcileOutcome) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            outcome,
        }
    }

    pub fn skipped(operation_id: &str, kind: ErrorKind) -> Self {
        Self::new(operation_id, ReconcileOutcome::Skipped(kind))
    }

    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, ReconcileOutcome::Applied { .. })
    }
}

/// Turns verified webhook events into order updates, at most once per
/// `(operation id, canonical status)`.
///
/// Idempotency is tracked here, per operation id, rather than read back from
/// the order, which other actors may also modify.
pub struct Reconciler {
    orders: OrderServiceBox,
    applied: Mutex<HashMap<String, CanonicalStatus>>,
}

impl Reconciler {
    pub fn new(orders: OrderServiceBox) -> Self {
        Self {
            orders,
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// Last canonical status applied for `operation_id`, if any.
    pub async fn last_applied(&self, operation_id: &str) -> Option<CanonicalStatus> {
        self.applied.lock().await.get(operation_id).copied()
    }

    pub async fn reconcile(&self, event: &WebhookEvent) -> Ack {
        let id = event.operation_id.as_str();
        if event.trust == TrustLevel::Unverified {
            tracing::warn!(
                provider = %event.provider,
                operation_id = id,
                "unverified webhook reached the reconciler without corroboration"
            );
            return Ack::skipped(id, ErrorKind::UnverifiedSource);
        }

        // Held across the order update so duplicate deliveries racing each
        // other produce a single update.
        let mut applied = self.applied.lock().await;
        if let Some(&last) = applied.get(id) {
            if last == event.canonical_status {
                tracing::debug!(operation_id = id, status = %last, "duplicate webhook ignored");
                return Ack::new(id, ReconcileOutcome::Duplicate);
            }
            if !last.can_advance_to(event.canonical_status) {
                tracing::warn!(
                    operation_id = id,
                    from = %last,
                    to = %event.canonical_status,
                    "webhook transition rejected"
                );
                return Ack::skipped(id, ErrorKind::InvalidState);
            }
        }

        let Some(reference) = event.order_reference.as_deref() else {
            tracing::warn!(
                provider = %event.provider,
                operation_id = id,
                "webhook carries no order reference"
            );
            return Ack::skipped(id, ErrorKind::InvalidPayload);
        };

        let order = match self.orders.get_order_by_payment_reference(reference).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                tracing::warn!(
                    provider = %event.provider,
                    operation_id = id,
                    reference,
                    "webhook for unknown order acknowledged"
                );
                return Ack::skipped(id, ErrorKind::NotFound);
            }
            Err(e) => {
                tracing::error!(operation_id = id, reference, error = %e, "order lookup failed");
                return Ack::skipped(id, e.kind());
            }
        };

        let status = OrderPaymentStatus::from(event.canonical_status);
        if let Err(e) = self.orders.update_payment_status(&order.id, status, id).await {
            tracing::error!(
                operation_id = id,
                order_id = %order.id,
                error = %e,
                "order payment status update failed"
            );
            return Ack::skipped(id, e.kind());
        }

        applied.insert(id.to_string(), event.canonical_status);
        tracing::info!(
            provider = %event.provider,
            operation_id = id,
            order_id = %order.id,
            status = ?status,
            "order payment status updated"
        );
        Ack::new(
            id,
            ReconcileOutcome::Applied {
                order_id: order.id,
                status,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::Provider;
    use crate::infrastructure::in_memory::InMemoryOrderService;

    fn event(status: CanonicalStatus, reference: Option<&str>) -> WebhookEvent {
        WebhookEvent {
            provider: Provider::TransactionGateway,
            event_type: "transaction.updated".to_string(),
            operation_id: "txn_1".to_string(),
            canonical_status: status,
            provider_status: "APPROVED".to_string(),
            order_reference: reference.map(ToString::to_string),
            trust: TrustLevel::Verified,
        }
    }

    async fn setup() -> (Reconciler, InMemoryOrderService) {
        let orders = InMemoryOrderService::new();
        orders.add_order("42", "order-42").await;
        (Reconciler::new(Box::new(orders.clone())), orders)
    }

    #[tokio::test]
    async fn test_same_event_twice_updates_once() {
        let (reconciler, orders) = setup().await;
        let event = event(CanonicalStatus::Succeeded, Some("order-42"));

        let first = reconciler.reconcile(&event).await;
        let second = reconciler.reconcile(&event).await;

        assert_eq!(
            first.outcome,
            ReconcileOutcome::Applied {
                order_id: "42".to_string(),
                status: OrderPaymentStatus::Paid
            }
        );
        assert_eq!(second.outcome, ReconcileOutcome::Duplicate);
        assert_eq!(orders.updates().await.len(), 1);
    }

    #[tokio::test]
    async fn test_forward_progress_is_applied() {
        let (reconciler, orders) = setup().await;
        reconciler
            .reconcile(&event(CanonicalStatus::PendingConfirmation, Some("order-42")))
            .await;
        let ack = reconciler
            .reconcile(&event(CanonicalStatus::Succeeded, Some("order-42")))
            .await;

        assert!(ack.is_applied());
        assert_eq!(orders.updates().await.len(), 2);
        assert_eq!(
            reconciler.last_applied("txn_1").await,
            Some(CanonicalStatus::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_conflicting_terminal_is_rejected() {
        let (reconciler, orders) = setup().await;
        reconciler
            .reconcile(&event(CanonicalStatus::Declined, Some("order-42")))
            .await;
        let ack = reconciler
            .reconcile(&event(CanonicalStatus::Succeeded, Some("order-42")))
            .await;

        assert_eq!(ack.outcome, ReconcileOutcome::Skipped(ErrorKind::InvalidState));
        let order = orders.order("42").await.unwrap();
        assert_eq!(order.payment_status, OrderPaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_order_is_acknowledged() {
        let (reconciler, orders) = setup().await;
        let ack = reconciler
            .reconcile(&event(CanonicalStatus::Succeeded, Some("order-7")))
            .await;

        assert_eq!(ack.outcome, ReconcileOutcome::Skipped(ErrorKind::NotFound));
        assert!(orders.updates().await.is_empty());
        assert_eq!(reconciler.last_applied("txn_1").await, None);
    }

    #[tokio::test]
    async fn test_missing_reference_and_unverified_are_skipped() {
        let (reconciler, orders) = setup().await;
        let ack = reconciler
            .reconcile(&event(CanonicalStatus::Succeeded, None))
            .await;
        assert_eq!(ack.outcome, ReconcileOutcome::Skipped(ErrorKind::InvalidPayload));

        let mut unverified = event(CanonicalStatus::Succeeded, Some("order-42"));
        unverified.trust = TrustLevel::Unverified;
        let ack = reconciler.reconcile(&unverified).await;
        assert_eq!(ack.outcome, ReconcileOutcome::Skipped(ErrorKind::UnverifiedSource));

        assert!(orders.updates().await.is_empty());
    }
}
