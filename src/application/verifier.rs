//! Webhook authentication and decoding.
//!
//! Every check runs against the raw request body exactly as received.
//! Re-serializing a parsed body changes bytes and breaks the HMAC.

use crate::config::{PaymentConfig, ProviderSettings};
use crate::domain::operation::{CanonicalStatus, Metadata, Mode, ORDER_ID_KEY, Provider};
use crate::domain::webhook::{TrustLevel, WebhookEvent, normalize_order_reference};
use crate::error::{PaymentError, Result};
use crate::infrastructure::providers::{card_processor, redirect_checkout, transaction_gateway};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Card processor signature header, `t=<unix>,v1=<hex>`.
pub const CARD_SIGNATURE_HEADER: &str = "signature";
pub const GATEWAY_SIGNATURE_HEADER: &str = "x-event-signature";
pub const GATEWAY_TIMESTAMP_HEADER: &str = "x-event-timestamp";

/// Maximum age of a card processor event.
pub const CARD_TOLERANCE_SECS: i64 = 300;

/// Hex HMAC-SHA256 over `parts`, concatenated.
fn hmac_hex(secret: &str, parts: &[&[u8]]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Configuration(format!("unusable signing secret: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of two hex signatures, case-insensitive.
fn signatures_match(expected_hex: &str, provided_hex: &str) -> bool {
    let provided = provided_hex.trim().to_ascii_lowercase();
    expected_hex.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Transaction gateway event signature:
/// `HMAC_SHA256(secret, event + "." + timestamp + "." + data)`, hex-encoded.
///
/// `data` must be the raw JSON text of the `data` object as sent.
pub fn gateway_signature(secret: &str, event: &str, timestamp: &str, data: &str) -> Result<String> {
    hmac_hex(
        secret,
        &[
            event.as_bytes(),
            b".",
            timestamp.as_bytes(),
            b".",
            data.as_bytes(),
        ],
    )
}

/// Widget integrity signature: `SHA256(reference + amount + currency + secret)`,
/// hex-encoded. No timestamp and no HMAC, as the provider defines it.
pub fn integrity_signature(reference: &str, amount_minor: i64, currency: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(reference.as_bytes());
    hasher.update(amount_minor.to_string().as_bytes());
    hasher.update(currency.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Card processor signature: `HMAC_SHA256(secret, t + "." + body)`.
pub fn card_signature(secret: &str, timestamp: i64, raw_body: &[u8]) -> Result<String> {
    hmac_hex(secret, &[timestamp.to_string().as_bytes(), b".", raw_body])
}

/// Splits `t=<unix>,v1=<sig>[,v1=<sig>...]` into the timestamp and the
/// candidate signatures.
fn parse_card_header(header: &str) -> Result<(i64, Vec<&str>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    match timestamp {
        Some(t) if !signatures.is_empty() => Ok((t, signatures)),
        _ => Err(PaymentError::InvalidSignature),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Deserialize)]
struct CardEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: CardEventData,
}

#[derive(Deserialize)]
struct CardEventData {
    object: CardObject,
}

#[derive(Deserialize)]
struct CardObject {
    id: String,
    object: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    amount_refunded: i64,
}

#[derive(Deserialize)]
struct GatewayEvent<'a> {
    event: String,
    #[serde(borrow)]
    data: &'a RawValue,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GatewayData {
    transaction: GatewayTransaction,
}

#[derive(Deserialize)]
struct GatewayTransaction {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Deserialize)]
struct RedirectNotification {
    #[serde(default)]
    action: Option<String>,
    #[serde(default, rename = "type")]
    topic: Option<String>,
    data: RedirectData,
}

#[derive(Deserialize)]
struct RedirectData {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
}

fn invalid_payload(provider: Provider, err: serde_json::Error) -> PaymentError {
    PaymentError::InvalidPayload(format!("{provider} webhook: {err}"))
}

/// Authenticates inbound callbacks and turns them into [`WebhookEvent`]s.
///
/// A provider without a configured secret runs in simulated mode: its
/// signature check passes trivially but decoding is identical.
pub struct WebhookVerifier {
    card_secret: Option<SecretString>,
    gateway_secret: Option<SecretString>,
}

impl WebhookVerifier {
    pub fn new(card_secret: Option<SecretString>, gateway_secret: Option<SecretString>) -> Self {
        Self {
            card_secret,
            gateway_secret,
        }
    }

    pub fn simulated() -> Self {
        Self::new(None, None)
    }

    pub fn from_config(config: &PaymentConfig) -> Result<Self> {
        let secret_for = |provider: Provider| -> Result<Option<SecretString>> {
            Ok(match config.resolve_mode(provider)? {
                Mode::Live => ProviderSettings::secret(&config.settings(provider).webhook_secret),
                Mode::Simulated => None,
            })
        };
        Ok(Self::new(
            secret_for(Provider::CardProcessor)?,
            secret_for(Provider::TransactionGateway)?,
        ))
    }

    pub fn verify_and_decode(
        &self,
        provider: Provider,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookEvent> {
        let result = match provider {
            Provider::CardProcessor => self.card_processor(raw_body, headers),
            Provider::RedirectCheckout => Self::redirect_checkout(raw_body),
            Provider::TransactionGateway => self.transaction_gateway(raw_body, headers),
        };
        if let Err(PaymentError::InvalidSignature) = &result {
            tracing::warn!(provider = %provider, "webhook signature rejected");
        }
        result
    }

    /// Checks authenticity only. The redirect checkout channel carries no
    /// signature and always passes; its events are decoded as unverified.
    pub fn verify_signature(
        &self,
        provider: Provider,
        raw_body: &[u8],
        headers: &HeaderMap,
    ) -> Result<()> {
        match provider {
            Provider::CardProcessor => self.check_card_processor(raw_body, headers),
            Provider::RedirectCheckout => Ok(()),
            Provider::TransactionGateway => {
                let event: GatewayEvent<'_> = serde_json::from_slice(raw_body)
                    .map_err(|e| invalid_payload(Provider::TransactionGateway, e))?;
                self.check_transaction_gateway(&event, headers)
            }
        }
    }

    fn check_card_processor(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<()> {
        let Some(secret) = &self.card_secret else {
            return Ok(());
        };
        let value = header(headers, CARD_SIGNATURE_HEADER).ok_or(PaymentError::InvalidSignature)?;
        let (timestamp, candidates) = parse_card_header(value)?;
        if (Utc::now().timestamp() - timestamp).abs() > CARD_TOLERANCE_SECS {
            tracing::warn!(timestamp, "card processor event outside tolerance window");
            return Err(PaymentError::InvalidSignature);
        }
        let expected = card_signature(secret.expose_secret(), timestamp, raw_body)?;
        if candidates.iter().any(|c| signatures_match(&expected, c)) {
            Ok(())
        } else {
            Err(PaymentError::InvalidSignature)
        }
    }

    /// The timestamp header wins over the body's `timestamp` field.
    fn check_transaction_gateway(&self, event: &GatewayEvent<'_>, headers: &HeaderMap) -> Result<()> {
        let Some(secret) = &self.gateway_secret else {
            return Ok(());
        };
        let signature = header(headers, GATEWAY_SIGNATURE_HEADER).ok_or(PaymentError::InvalidSignature)?;
        let timestamp = match header(headers, GATEWAY_TIMESTAMP_HEADER) {
            Some(t) => t.to_string(),
            None => match &event.timestamp {
                Some(serde_json::Value::String(t)) => t.clone(),
                Some(serde_json::Value::Number(t)) => t.to_string(),
                _ => return Err(PaymentError::InvalidSignature),
            },
        };
        let expected = gateway_signature(
            secret.expose_secret(),
            &event.event,
            &timestamp,
            event.data.get(),
        )?;
        if signatures_match(&expected, signature) {
            Ok(())
        } else {
            Err(PaymentError::InvalidSignature)
        }
    }

    fn card_processor(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<WebhookEvent> {
        self.check_card_processor(raw_body, headers)?;

        let event: CardEvent = serde_json::from_slice(raw_body)
            .map_err(|e| invalid_payload(Provider::CardProcessor, e))?;
        let object = event.data.object;
        let order_reference = normalize_order_reference(object.metadata.get(ORDER_ID_KEY).map(String::as_str));

        let (operation_id, canonical_status, provider_status) = match object.object.as_str() {
            "payment_intent" => {
                let raw = object.status.unwrap_or_default();
                let status = if event.event_type == "payment_intent.payment_failed" {
                    CanonicalStatus::Declined
                } else {
                    card_processor::map_status(&raw)
                };
                (object.id, status, raw)
            }
            "charge" if event.event_type == "charge.refunded" => {
                let intent = object.payment_intent.ok_or_else(|| {
                    PaymentError::InvalidPayload(format!("charge {} has no payment intent", object.id))
                })?;
                let status = if object.amount_refunded >= object.amount {
                    CanonicalStatus::Refunded
                } else {
                    CanonicalStatus::PartiallyRefunded
                };
                (intent, status, "refunded".to_string())
            }
            other => {
                return Err(PaymentError::InvalidPayload(format!(
                    "unsupported card processor event {} on {other}",
                    event.event_type
                )));
            }
        };

        Ok(WebhookEvent {
            provider: Provider::CardProcessor,
            event_type: event.event_type,
            operation_id,
            canonical_status,
            provider_status,
            order_reference,
            trust: TrustLevel::Verified,
        })
    }

    fn transaction_gateway(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<WebhookEvent> {
        let event: GatewayEvent<'_> = serde_json::from_slice(raw_body)
            .map_err(|e| invalid_payload(Provider::TransactionGateway, e))?;

        self.check_transaction_gateway(&event, headers)?;

        let data: GatewayData = serde_json::from_str(event.data.get())
            .map_err(|e| invalid_payload(Provider::TransactionGateway, e))?;
        let transaction = data.transaction;
        let raw = transaction.status.ok_or_else(|| {
            PaymentError::InvalidPayload(format!("transaction {} carries no status", transaction.id))
        })?;

        Ok(WebhookEvent {
            provider: Provider::TransactionGateway,
            event_type: event.event,
            operation_id: transaction.id,
            canonical_status: transaction_gateway::map_status(&raw),
            provider_status: raw,
            order_reference: normalize_order_reference(transaction.reference.as_deref()),
            trust: TrustLevel::Verified,
        })
    }

    /// No signature exists on this channel: the event is decoded but marked
    /// unverified, in live and simulated mode alike.
    fn redirect_checkout(raw_body: &[u8]) -> Result<WebhookEvent> {
        let notification: RedirectNotification = serde_json::from_slice(raw_body)
            .map_err(|e| invalid_payload(Provider::RedirectCheckout, e))?;
        let data = notification.data;
        let (canonical_status, provider_status) = match data.status {
            Some(raw) => (redirect_checkout::map_status(&raw), raw),
            None => (CanonicalStatus::PendingConfirmation, "notification".to_string()),
        };

        Ok(WebhookEvent {
            provider: Provider::RedirectCheckout,
            event_type: notification
                .action
                .or(notification.topic)
                .unwrap_or_else(|| "notification".to_string()),
            operation_id: data.id,
            canonical_status,
            provider_status,
            order_reference: normalize_order_reference(data.external_reference.as_deref()),
            trust: TrustLevel::Unverified,
        })
    }
}
