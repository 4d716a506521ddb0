//! Redirect checkout adapter.
//!
//! A preference describes what the buyer pays for; the buyer completes the
//! payment on the provider's hosted page. There is no confirm step: confirm
//! is a status refresh read from the payments attached to the preference.

use super::{
    Backend, ensure_reachable, ensure_refundable, live_client, refuse_terminal, unknown_status,
};
use crate::config::PaymentConfig;
use crate::domain::amount::{MinorUnitPolicy, ensure_positive, normalize_currency};
use crate::domain::operation::{
    CanonicalStatus, Metadata, Mode, ORDER_ID_KEY, PaymentOperation, Provider, RefundResult,
};
use crate::domain::ports::{OperationStoreBox, PaymentProvider};
use crate::error::{PaymentError, Result};
use crate::infrastructure::http::LiveClient;
use crate::infrastructure::simulated::SimulatedLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const PROVIDER: Provider = Provider::RedirectCheckout;

/// Raw status reported for a preference nobody has paid yet.
pub const PREFERENCE_CREATED: &str = "preference_created";

/// Metadata key under which the hosted checkout URL is returned.
pub const CHECKOUT_URL_KEY: &str = "checkout_url";

pub fn map_status(raw: &str) -> CanonicalStatus {
    match raw {
        PREFERENCE_CREATED => CanonicalStatus::PendingMethod,
        "pending" | "in_process" => CanonicalStatus::PendingConfirmation,
        "approved" => CanonicalStatus::Succeeded,
        "rejected" => CanonicalStatus::Declined,
        other => unknown_status(PROVIDER, other),
    }
}

fn native_status(status: CanonicalStatus) -> &'static str {
    match status {
        CanonicalStatus::Created | CanonicalStatus::PendingMethod => PREFERENCE_CREATED,
        CanonicalStatus::PendingConfirmation => "pending",
        CanonicalStatus::Succeeded => "approved",
        CanonicalStatus::Declined => "rejected",
        CanonicalStatus::Errored => "error",
        CanonicalStatus::Refunded => "refunded",
        CanonicalStatus::PartiallyRefunded => "partially_refunded",
    }
}

#[derive(Debug, Serialize)]
struct PreferenceItem {
    title: String,
    quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    unit_price: Decimal,
    currency_id: String,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest<'a> {
    items: Vec<PreferenceItem>,
    external_reference: Option<&'a str>,
    metadata: &'a Metadata,
}

#[derive(Debug, Deserialize)]
struct PreferenceItemResponse {
    #[serde(with = "rust_decimal::serde::float")]
    unit_price: Decimal,
    currency_id: String,
}

#[derive(Debug, Deserialize)]
struct Preference {
    id: String,
    #[serde(default)]
    init_point: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    items: Vec<PreferenceItemResponse>,
    #[serde(default)]
    date_created: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PaymentSearch {
    results: Vec<Payment>,
}

#[derive(Debug, Deserialize)]
struct Payment {
    status: String,
}

impl Preference {
    fn into_operation(self, provider_status: String) -> Result<PaymentOperation> {
        let item = self.items.first().ok_or_else(|| {
            PaymentError::InvalidPayload(format!("preference {} has no items", self.id))
        })?;
        let currency = normalize_currency(&item.currency_id)?;
        let amount_minor = MinorUnitPolicy::for_provider(PROVIDER).to_minor(item.unit_price, &currency)?;

        let mut metadata = self.metadata;
        if let Some(reference) = self.external_reference {
            metadata.insert(PROVIDER.order_reference_field().to_string(), reference);
        }
        if let Some(url) = self.init_point {
            metadata.insert(CHECKOUT_URL_KEY.to_string(), url);
        }

        Ok(PaymentOperation {
            id: self.id,
            provider: PROVIDER,
            amount_minor,
            currency,
            canonical_status: map_status(&provider_status),
            provider_status,
            metadata,
            created_at: self.date_created.unwrap_or_else(Utc::now),
        })
    }
}

pub struct RedirectCheckoutAdapter {
    backend: Backend,
}

impl RedirectCheckoutAdapter {
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

    pub fn ledger(&self) -> Option<&SimulatedLedger> {
        match &self.backend {
            Backend::Simulated(ledger) => Some(ledger),
            Backend::Live(_) => None,
        }
    }

    /// Reads the preference, then the most recent payment made against its
    /// external reference.
    async fn fetch(client: &LiveClient, id: &str) -> Result<PaymentOperation> {
        let preference: Preference = client
            .send(client.get(&format!("/checkout/preferences/{id}")), id)
            .await?;

        let status = match preference.external_reference.as_deref() {
            Some(reference) => {
                let search: PaymentSearch = client
                    .send(
                        client.get("/v1/payments/search").query(&[
                            ("external_reference", reference),
                            ("sort", "date_created"),
                            ("criteria", "desc"),
                        ]),
                        id,
                    )
                    .await?;
                search
                    .results
                    .into_iter()
                    .next()
                    .map(|p| p.status)
                    .unwrap_or_else(|| PREFERENCE_CREATED.to_string())
            }
            None => PREFERENCE_CREATED.to_string(),
        };
        preference.into_operation(status)
    }
}

#[async_trait]
impl PaymentProvider for RedirectCheckoutAdapter {
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
            Backend::Simulated(ledger) => {
                let mut metadata = metadata;
                if let Some(order) = metadata.get(ORDER_ID_KEY).cloned() {
                    metadata
                        .entry(PROVIDER.order_reference_field().to_string())
                        .or_insert(order);
                }
                ledger.create(amount_minor, currency, metadata).await
            }
            Backend::Live(client) => {
                ensure_positive(amount_minor)?;
                let currency = normalize_currency(currency)?;
                let unit_price = MinorUnitPolicy::for_provider(PROVIDER).to_major(amount_minor, &currency);
                let reference = metadata
                    .get(ORDER_ID_KEY)
                    .or_else(|| metadata.get(PROVIDER.order_reference_field()))
                    .map(String::as_str);

                let request = PreferenceRequest {
                    items: vec![PreferenceItem {
                        title: format!("Order {}", reference.unwrap_or("checkout")),
                        quantity: 1,
                        unit_price,
                        currency_id: currency,
                    }],
                    external_reference: reference,
                    metadata: &metadata,
                };
                let preference: Preference = client
                    .send(client.post_json("/checkout/preferences", &request), "preference")
                    .await?;
                tracing::info!(operation_id = %preference.id, amount_minor, "checkout preference created");
                preference.into_operation(PREFERENCE_CREATED.to_string())
            }
        }
    }

    async fn confirm_operation(&self, id: &str) -> Result<PaymentOperation> {
        match &self.backend {
            // Emulates the buyer finishing the hosted checkout.
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
