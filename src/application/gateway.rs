use super::locks::KeyedLocks;
use super::reconciler::{Ack, Reconciler};
use super::verifier::WebhookVerifier;
use crate::config::PaymentConfig;
use crate::domain::operation::{Metadata, Mode, PaymentOperation, Provider, RefundResult};
use crate::domain::ports::{
    OperationStoreBox, OperationStoreFactory, OrderServiceBox, PaymentProvider, ProviderBox,
};
use crate::domain::webhook::{TrustLevel, WebhookEvent};
use crate::error::{PaymentError, Result};
use crate::infrastructure::in_memory::InMemoryOperationStore;
use crate::infrastructure::providers::build_provider;
use reqwest::header::HeaderMap;
use std::collections::HashMap;

/// The payment core as seen by the rest of the application.
///
/// `PaymentGateway` routes every call to the adapter selected by `provider`
/// and owns the webhook path (verification, corroboration, reconciliation).
/// Calls that move an operation forward, whether application-initiated or
/// webhook-driven, are serialized per operation id.
pub struct PaymentGateway {
    providers: HashMap<Provider, ProviderBox>,
    verifier: WebhookVerifier,
    reconciler: Reconciler,
    locks: KeyedLocks,
}

impl PaymentGateway {
    /// Creates a new `PaymentGateway` instance.
    ///
    /// # Arguments
    ///
    /// * `providers` - The adapters to route to, one per provider.
    /// * `verifier` - Webhook verifier holding the providers' secrets.
    /// * `orders` - The order collaborator updated by reconciliation.
    pub fn new(providers: Vec<ProviderBox>, verifier: WebhookVerifier, orders: OrderServiceBox) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.provider(), p)).collect(),
            verifier,
            reconciler: Reconciler::new(orders),
            locks: KeyedLocks::new(),
        }
    }

    /// Builds every adapter from `config`. Each simulated adapter gets its
    /// own store from `stores`.
    ///
    /// Fails with `Configuration` if any provider is selected as live with
    /// missing credentials.
    pub fn from_config(
        config: &PaymentConfig,
        stores: &OperationStoreFactory,
        orders: OrderServiceBox,
    ) -> Result<Self> {
        let providers = Provider::ALL
            .into_iter()
            .map(|provider| build_provider(provider, config, stores()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(providers, WebhookVerifier::from_config(config)?, orders))
    }

    /// Every provider simulated over fresh in-memory stores.
    pub fn simulated(orders: OrderServiceBox) -> Result<Self> {
        let stores: OperationStoreFactory =
            Box::new(|| Box::new(InMemoryOperationStore::new()) as OperationStoreBox);
        Self::from_config(&PaymentConfig::simulated(), &stores, orders)
    }

    fn adapter(&self, provider: Provider) -> Result<&dyn PaymentProvider> {
        self.providers
            .get(&provider)
            .map(|p| p.as_ref())
            .ok_or_else(|| PaymentError::Configuration(format!("{provider} is not configured")))
    }

    pub fn mode(&self, provider: Provider) -> Result<Mode> {
        Ok(self.adapter(provider)?.mode())
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub async fn create_operation(
        &self,
        provider: Provider,
        amount_minor: i64,
        currency: &str,
        metadata: Metadata,
    ) -> Result<PaymentOperation> {
        self.adapter(provider)?
            .create_operation(amount_minor, currency, metadata)
            .await
    }

    pub async fn confirm_operation(&self, provider: Provider, id: &str) -> Result<PaymentOperation> {
        let adapter = self.adapter(provider)?;
        let _guard = self.locks.lock(id).await;
        adapter.confirm_operation(id).await
    }

    pub async fn refund_operation(
        &self,
        provider: Provider,
        id: &str,
        amount_minor: Option<i64>,
    ) -> Result<RefundResult> {
        let adapter = self.adapter(provider)?;
        let _guard = self.locks.lock(id).await;
        adapter.refund_operation(id, amount_minor).await
    }

    pub async fn get_operation(&self, provider: Provider, id: &str) -> Result<PaymentOperation> {
        self.adapter(provider)?.get_operation(id).await
    }

    pub async fn simulate_decline(&self, provider: Provider, id: &str) -> Result<PaymentOperation> {
        let adapter = self.adapter(provider)?;
        let _guard = self.locks.lock(id).await;
        adapter.simulate_decline(id).await
    }

    pub async fn simulate_failure(&self, provider: Provider, id: &str) -> Result<PaymentOperation> {
        let adapter = self.adapter(provider)?;
        let _guard = self.locks.lock(id).await;
        adapter.simulate_failure(id).await
    }

    /// Authenticates and decodes an inbound callback. An `InvalidSignature`
    /// result must never reach [`handle_webhook`](Self::handle_webhook).
    pub fn verify_and_decode_webhook(
        &self,
        provider: Provider,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookEvent> {
        self.verifier.verify_and_decode(provider, raw_body, headers)
    }

    /// Reconciles a decoded event against its operation and its order.
    ///
    /// Never fails: providers redeliver on anything but success, so every
    /// anomaly is logged and reported through the returned [`Ack`].
    /// Unverified events are applied only with the status read back from the
    /// provider, never with the status they carry. The operation itself is
    /// moved first, so an event that conflicts with a confirm or refund
    /// already applied is skipped as `InvalidState` and a later confirm
    /// sees the status the event applied.
    pub async fn handle_webhook(&self, event: WebhookEvent) -> Ack {
        let _guard = self.locks.lock(&event.operation_id).await;
        let trust = event.trust;
        let event = match trust {
            TrustLevel::Verified => event,
            TrustLevel::Unverified => match self.corroborate(&event).await {
                Ok(event) => event,
                Err(e) => return skip(&event, e),
            },
        };

        if let Err(e) = self.apply_to_operation(&event).await {
            return skip(&event, e);
        }
        self.reconciler.reconcile(&event).await
    }

    async fn apply_to_operation(&self, event: &WebhookEvent) -> Result<PaymentOperation> {
        self.adapter(event.provider)?
            .apply_reported_status(&event.operation_id, event.canonical_status)
            .await
    }

    /// Reads the operation back from the provider and rebuilds the event
    /// from that read.
    async fn corroborate(&self, event: &WebhookEvent) -> Result<WebhookEvent> {
        let operation = self
            .get_operation(event.provider, &event.operation_id)
            .await
            .map_err(|e| {
                PaymentError::UnverifiedSource(format!(
                    "{} could not be read back: {e}",
                    event.operation_id
                ))
            })?;
        if operation.canonical_status != event.canonical_status {
            tracing::info!(
                operation_id = %operation.id,
                claimed = %event.canonical_status,
                actual = %operation.canonical_status,
                "webhook status superseded by provider read"
            );
        }
        Ok(WebhookEvent {
            provider: event.provider,
            event_type: event.event_type.clone(),
            order_reference: event
                .order_reference
                .clone()
                .or_else(|| operation.order_reference().map(ToString::to_string)),
            operation_id: operation.id,
            canonical_status: operation.canonical_status,
            provider_status: operation.provider_status,
            trust: TrustLevel::Verified,
        })
    }
}

fn skip(event: &WebhookEvent, error: PaymentError) -> Ack {
    tracing::warn!(
        provider = %event.provider,
        operation_id = %event.operation_id,
        status = %event.canonical_status,
        error = %error,
        "webhook not applied"
    );
    Ack::skipped(&event.operation_id, error.kind())
}
