//! Card processor adapter: payment intents, explicit confirmation, refunds.

use super::{
    Backend, ensure_reachable, ensure_refundable, from_unix, live_client, refuse_terminal,
    unknown_status,
};
use crate::config::PaymentConfig;
use crate::domain::amount::{ensure_positive, normalize_currency};
use crate::domain::operation::{
    CanonicalStatus, Metadata, Mode, PaymentOperation, Provider, RefundResult,
};
use crate::domain::ports::{OperationStoreBox, PaymentProvider};
use crate::error::{PaymentError, Result};
use crate::infrastructure::http::LiveClient;
use crate::infrastructure::simulated::SimulatedLedger;
use async_trait::async_trait;
use serde::Deserialize;

const PROVIDER: Provider = Provider::CardProcessor;

/// Maps a payment intent status to the canonical vocabulary.
pub fn map_status(raw: &str) -> CanonicalStatus {
    match raw {
        "requires_payment_method" => CanonicalStatus::PendingMethod,
        "requires_confirmation" | "requires_action" | "processing" => {
            CanonicalStatus::PendingConfirmation
        }
        "succeeded" => CanonicalStatus::Succeeded,
        "canceled" => CanonicalStatus::Declined,
        other => unknown_status(PROVIDER, other),
    }
}

/// Canonical status as the processor would spell it, for simulated records.
fn native_status(status: CanonicalStatus) -> &'static str {
    match status {
        CanonicalStatus::Created => "created",
        CanonicalStatus::PendingMethod => "requires_payment_method",
        CanonicalStatus::PendingConfirmation => "requires_confirmation",
        CanonicalStatus::Succeeded => "succeeded",
        CanonicalStatus::Declined => "canceled",
        CanonicalStatus::Errored => "api_error",
        CanonicalStatus::Refunded => "refunded",
        CanonicalStatus::PartiallyRefunded => "partially_refunded",
    }
}

/// Refund outcome. Only a succeeded refund moves the operation, and the
/// cumulative refunded amount decides between full and partial. A refund the
/// processor is still working on leaves `current` untouched.
fn map_refund_status(
    raw: &str,
    current: CanonicalStatus,
    refunded_total: i64,
    original: i64,
) -> CanonicalStatus {
    match raw {
        "succeeded" if refunded_total >= original => CanonicalStatus::Refunded,
        "succeeded" => CanonicalStatus::PartiallyRefunded,
        "pending" | "requires_action" => {
            tracing::info!(provider = %PROVIDER, refund_status = raw, "refund not settled yet");
            current
        }
        other => unknown_status(PROVIDER, other),
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    metadata: Metadata,
    created: i64,
}

impl PaymentIntent {
    fn into_operation(self) -> PaymentOperation {
        PaymentOperation {
            canonical_status: map_status(&self.status),
            id: self.id,
            provider: PROVIDER,
            amount_minor: self.amount,
            currency: self.currency.to_ascii_uppercase(),
            provider_status: self.status,
            metadata: self.metadata,
            created_at: from_unix(self.created),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    amount: i64,
    status: String,
    created: i64,
}

#[derive(Debug, Deserialize)]
struct RefundList {
    data: Vec<Refund>,
}

pub struct CardProcessorAdapter {
    backend: Backend,
}

impl CardProcessorAdapter {
    /// Simulated adapter backed by `store`.
    pub fn simulated(store: OperationStoreBox) -> Self {
        Self {
            backend: Backend::Simulated(SimulatedLedger::new(
                PROVIDER,
                CanonicalStatus::PendingMethod,
                native_status,
                store,
            )),
        }
    }

    pub fn live(client: LiveClient) -> Self {
        Self {
            backend: Backend::Live(client),
        }
    }

    pub fn from_config(config: &PaymentConfig, store: OperationStoreBox) -> Result<Self> {
        match config.resolve_mode(PROVIDER)? {
            Mode::Simulated => Ok(Self::simulated(store)),
            Mode::Live => Ok(Self::live(live_client(config, PROVIDER)?)),
        }
    }

    /// The simulated ledger, when running without credentials.
    pub fn ledger(&self) -> Option<&SimulatedLedger> {
        match &self.backend {
            Backend::Simulated(ledger) => Some(ledger),
            Backend::Live(_) => None,
        }
    }

    async fn fetch_intent(client: &LiveClient, id: &str) -> Result<PaymentOperation> {
        let intent: PaymentIntent = client
            .send(client.get(&format!("/v1/payment_intents/{id}")), id)
            .await?;
        Ok(intent.into_operation())
    }

    /// Sum of the settled refunds recorded against the intent.
    async fn refunded_total(client: &LiveClient, id: &str) -> Result<i64> {
        let refunds: RefundList = client
            .send(client.get("/v1/refunds").query(&[("payment_intent", id)]), id)
            .await?;
        Ok(refunds
            .data
            .iter()
            .filter(|r| r.status == "succeeded")
            .map(|r| r.amount)
            .sum())
    }
}

#[async_trait]
impl PaymentProvider for CardProcessorAdapter {
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
        match &self.backend {
            Backend::Simulated(ledger) => ledger.create(amount_minor, currency, metadata).await,
            Backend::Live(client) => {
                ensure_positive(amount_minor)?;
                let currency = normalize_currency(currency)?;
                let mut form = vec![
                    ("amount".to_string(), amount_minor.to_string()),
                    ("currency".to_string(), currency.to_ascii_lowercase()),
                ];
                form.extend(
                    metadata
                        .iter()
                        .map(|(k, v)| (format!("metadata[{k}]"), v.clone())),
                );

                let intent: PaymentIntent = client
                    .send(client.post_form("/v1/payment_intents", &form), "payment intent")
                    .await?;
                tracing::info!(operation_id = %intent.id, amount_minor, "payment intent created");
                Ok(intent.into_operation())
            }
        }
    }

    async fn confirm_operation(&self, id: &str) -> Result<PaymentOperation> {
        match &self.backend {
            Backend::Simulated(ledger) => ledger.confirm(id).await,
            Backend::Live(client) => {
                let current = Self::fetch_intent(client, id).await?;
                match current.canonical_status {
                    CanonicalStatus::Succeeded | CanonicalStatus::PartiallyRefunded => {
                        return Ok(current);
                    }
                    status if status.is_terminal() => return refuse_terminal(current),
                    _ => {}
                }

                let request = client.post_form(
                    &format!("/v1/payment_intents/{id}/confirm"),
                    &Vec::<(String, String)>::new(),
                );
                match client.send::<PaymentIntent>(request, id).await {
                    Ok(intent) => Ok(intent.into_operation()),
                    // The processor rejects declined cards at confirm time.
                    Err(PaymentError::ProviderRejected { status: 402, message }) => {
                        tracing::info!(operation_id = %id, reason = %message, "card declined at confirm");
                        let mut declined = Self::fetch_intent(client, id).await?;
                        declined.canonical_status = CanonicalStatus::Declined;
                        Ok(declined)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn refund_operation(
        &self,
        id: &str,
        amount_minor: Option<i64>,
    ) -> Result<RefundResult> {
        match &self.backend {
            Backend::Simulated(ledger) => ledger.refund(id, amount_minor).await,
            Backend::Live(client) => {
                let operation = Self::fetch_intent(client, id).await?;
                ensure_refundable(&operation)?;

                let mut form = vec![("payment_intent".to_string(), id.to_string())];
                if let Some(amount) = amount_minor {
                    ensure_positive(amount)?;
                    form.push(("amount".to_string(), amount.to_string()));
                }
                let refund: Refund = client
                    .send(client.post_form("/v1/refunds", &form), id)
                    .await?;

                let refunded_total = if refund.status == "succeeded" {
                    Self::refunded_total(client, id).await?
                } else {
                    0
                };
                let status = map_refund_status(
                    &refund.status,
                    operation.canonical_status,
                    refunded_total,
                    operation.amount_minor,
                );
                tracing::info!(operation_id = %id, refund_id = %refund.id, status = %status, "refund created");
                Ok(RefundResult {
                    refund_id: refund.id,
                    operation_id: id.to_string(),
                    amount_minor: refund.amount,
                    status,
                    provider_status: refund.status,
                    created_at: from_unix(refund.created),
                })
            }
        }
    }

    async fn get_operation(&self, id: &str) -> Result<PaymentOperation> {
        match &self.backend {
            Backend::Simulated(ledger) => ledger.get(id).await,
            Backend::Live(client) => Self::fetch_intent(client, id).await,
        }
    }

    async fn apply_reported_status(
        &self,
        id: &str,
        status: CanonicalStatus,
    ) -> Result<PaymentOperation> {
        match &self.backend {
            Backend::Simulated(ledger) => ledger.apply(id, status).await,
            Backend::Live(client) => ensure_reachable(Self::fetch_intent(client, id).await?, status),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryOperationStore;
    use secrecy::SecretString;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn simulated() -> CardProcessorAdapter {
        CardProcessorAdapter::simulated(Box::new(InMemoryOperationStore::new()))
    }

    fn live(server: &MockServer) -> CardProcessorAdapter {
        let client = LiveClient::new(
            &server.uri(),
            SecretString::from("sk_test".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        CardProcessorAdapter::live(client)
    }

    fn intent(status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "pi_123",
            "amount": 100000,
            "currency": "cop",
            "status": status,
            "metadata": {"order_id": "42"},
            "created": 1700000000
        })
    }

    #[test]
    fn test_status_mapping_is_total() {
        assert_eq!(map_status("requires_payment_method"), CanonicalStatus::PendingMethod);
        assert_eq!(map_status("processing"), CanonicalStatus::PendingConfirmation);
        assert_eq!(map_status("requires_confirmation"), CanonicalStatus::PendingConfirmation);
        assert_eq!(map_status("succeeded"), CanonicalStatus::Succeeded);
        assert_eq!(map_status("something_new"), CanonicalStatus::Errored);
    }

    #[test]
    fn test_refund_total_decides_full_or_partial() {
        use CanonicalStatus::*;
        assert_eq!(map_refund_status("succeeded", Succeeded, 100, 100), Refunded);
        assert_eq!(map_refund_status("succeeded", Succeeded, 40, 100), PartiallyRefunded);
        assert_eq!(map_refund_status("succeeded", PartiallyRefunded, 100, 100), Refunded);
        assert_eq!(map_refund_status("failed", Succeeded, 100, 100), Errored);
    }

    #[test]
    fn test_pending_refund_keeps_current_status() {
        use CanonicalStatus::*;
        assert_eq!(map_refund_status("pending", Succeeded, 0, 100), Succeeded);
        assert_eq!(
            map_refund_status("pending", PartiallyRefunded, 0, 100),
            PartiallyRefunded
        );
    }

    #[tokio::test]
    async fn test_simulated_confirm_twice_is_noop() {
        let adapter = simulated();
        let mut metadata = Metadata::new();
        metadata.insert("order_id".into(), "42".into());

        let op = adapter
            .create_operation(100000, "cop", metadata)
            .await
            .unwrap();
        assert_eq!(op.canonical_status, CanonicalStatus::PendingMethod);
        assert_eq!(op.provider_status, "requires_payment_method");

        let first = adapter.confirm_operation(&op.id).await.unwrap();
        assert_eq!(first.canonical_status, CanonicalStatus::Succeeded);
        let second = adapter.confirm_operation(&op.id).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_simulated_refund_flow() {
        let adapter = simulated();
        let op = adapter
            .create_operation(5000, "usd", Metadata::new())
            .await
            .unwrap();

        let early = adapter.refund_operation(&op.id, None).await;
        assert!(matches!(early, Err(PaymentError::InvalidState(_))));

        adapter.confirm_operation(&op.id).await.unwrap();
        let refund = adapter.refund_operation(&op.id, None).await.unwrap();
        assert_eq!(refund.status, CanonicalStatus::Refunded);

        let confirm = adapter.confirm_operation(&op.id).await;
        assert!(matches!(confirm, Err(PaymentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_live_create_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(body_string_contains("amount=100000"))
            .and(body_string_contains("currency=cop"))
            .and(body_string_contains("metadata%5Border_id%5D=42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("requires_payment_method")))
            .mount(&server)
            .await;

        let adapter = live(&server);
        let mut metadata = Metadata::new();
        metadata.insert("order_id".into(), "42".into());
        let op = adapter
            .create_operation(100000, "COP", metadata)
            .await
            .unwrap();

        assert_eq!(op.id, "pi_123");
        assert_eq!(op.currency, "COP");
        assert_eq!(op.canonical_status, CanonicalStatus::PendingMethod);
        assert_eq!(op.order_reference(), Some("42"));
    }

    #[tokio::test]
    async fn test_live_confirm_declined_card() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("requires_confirmation")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents/pi_123/confirm"))
            .respond_with(ResponseTemplate::new(402).set_body_string("card_declined"))
            .mount(&server)
            .await;

        let op = live(&server).confirm_operation("pi_123").await.unwrap();
        assert_eq!(op.canonical_status, CanonicalStatus::Declined);
    }

    #[tokio::test]
    async fn test_live_get_unknown_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/does-not-exist"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = live(&server).get_operation("does-not-exist").await;
        assert!(matches!(result, Err(PaymentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_live_partial_refund() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("succeeded")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .and(body_string_contains("payment_intent=pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "re_1",
                "amount": 40000,
                "status": "succeeded",
                "created": 1700000100
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/refunds"))
            .and(query_param("payment_intent", "pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "re_0", "amount": 30000, "status": "succeeded", "created": 1700000050},
                    {"id": "re_1", "amount": 40000, "status": "succeeded", "created": 1700000100}
                ]
            })))
            .mount(&server)
            .await;

        let refund = live(&server)
            .refund_operation("pi_123", Some(40000))
            .await
            .unwrap();
        assert_eq!(refund.refund_id, "re_1");
        assert_eq!(refund.amount_minor, 40000);
        assert_eq!(refund.status, CanonicalStatus::PartiallyRefunded);
    }

    #[tokio::test]
    async fn test_live_refund_completing_the_total_is_full() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("succeeded")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "re_2",
                "amount": 60000,
                "status": "succeeded",
                "created": 1700000200
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/refunds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "re_1", "amount": 40000, "status": "succeeded", "created": 1700000100},
                    {"id": "re_2", "amount": 60000, "status": "succeeded", "created": 1700000200}
                ]
            })))
            .mount(&server)
            .await;

        let refund = live(&server)
            .refund_operation("pi_123", Some(60000))
            .await
            .unwrap();
        assert_eq!(refund.status, CanonicalStatus::Refunded);
    }

    #[tokio::test]
    async fn test_live_pending_refund_is_not_refunded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent("succeeded")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "re_3",
                "amount": 100000,
                "status": "pending",
                "created": 1700000300
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/refunds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(0)
            .mount(&server)
            .await;

        let refund = live(&server).refund_operation("pi_123", None).await.unwrap();
        assert_eq!(refund.provider_status, "pending");
        assert_eq!(refund.status, CanonicalStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_live_adapter_rejects_failure_injection() {
        let server = MockServer::start().await;
        let result = live(&server).simulate_decline("pi_123").await;
        assert!(matches!(result, Err(PaymentError::Unsupported(_))));
    }
}
