//! Credential and mode configuration.
//!
//! Live versus simulated mode is decided once per provider, when its adapter
//! is constructed, never per call.

use crate::domain::operation::{Mode, Provider};
use crate::error::{PaymentError, Result};
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::time::Duration;

/// Client timeout for live provider calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_CARD_PROCESSOR_URL: &str = "https://api.stripe.com";
pub const DEFAULT_REDIRECT_CHECKOUT_URL: &str = "https://api.mercadopago.com";
pub const DEFAULT_TRANSACTION_GATEWAY_URL: &str = "https://production.wompi.co";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeSelection {
    /// Live when all credentials are present, simulated when none are.
    #[default]
    Auto,
    Live,
    Simulated,
}

impl FromStr for ModeSelection {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(ModeSelection::Auto),
            "live" => Ok(ModeSelection::Live),
            "simulated" => Ok(ModeSelection::Simulated),
            other => Err(PaymentError::Configuration(format!(
                "unknown mode '{other}', expected auto, live or simulated"
            ))),
        }
    }
}

/// Credentials for one provider. Which fields are required depends on the
/// provider, see [`PaymentConfig::resolve_mode`].
#[derive(Debug, Default)]
pub struct ProviderSettings {
    pub api_key: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    /// Only used by the transaction gateway's widget checkout.
    pub integrity_secret: Option<SecretString>,
    pub base_url: Option<String>,
}

impl ProviderSettings {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_integrity_secret(mut self, secret: impl Into<String>) -> Self {
        self.integrity_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Copies a configured secret out for a component that owns its own.
    pub fn secret(field: &Option<SecretString>) -> Option<SecretString> {
        field
            .as_ref()
            .map(|s| SecretString::from(s.expose_secret().to_string()))
    }
}

#[derive(Debug)]
pub struct PaymentConfig {
    pub mode: ModeSelection,
    pub timeout: Duration,
    pub card_processor: ProviderSettings,
    pub redirect_checkout: ProviderSettings,
    pub transaction_gateway: ProviderSettings,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            mode: ModeSelection::Auto,
            timeout: DEFAULT_TIMEOUT,
            card_processor: ProviderSettings::default(),
            redirect_checkout: ProviderSettings::default(),
            transaction_gateway: ProviderSettings::default(),
        }
    }
}

impl PaymentConfig {
    /// Every provider in simulated mode, no credentials.
    pub fn simulated() -> Self {
        Self {
            mode: ModeSelection::Simulated,
            ..Self::default()
        }
    }

    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, treating empty values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secret = |key: &str| var(key).map(SecretString::from);

        let mode = var("STOREPAY_MODE")
            .map(|m| m.parse::<ModeSelection>())
            .transpose()?
            .unwrap_or_default();
        let timeout = match var("STOREPAY_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.trim().parse().map_err(|_| {
                PaymentError::Configuration(format!("invalid STOREPAY_TIMEOUT_SECS '{raw}'"))
            })?),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            mode,
            timeout,
            card_processor: ProviderSettings {
                api_key: secret("CARD_PROCESSOR_API_KEY"),
                webhook_secret: secret("CARD_PROCESSOR_WEBHOOK_SECRET"),
                integrity_secret: None,
                base_url: var("CARD_PROCESSOR_BASE_URL"),
            },
            redirect_checkout: ProviderSettings {
                api_key: secret("REDIRECT_CHECKOUT_ACCESS_TOKEN"),
                webhook_secret: None,
                integrity_secret: None,
                base_url: var("REDIRECT_CHECKOUT_BASE_URL"),
            },
            transaction_gateway: ProviderSettings {
                api_key: secret("TRANSACTION_GATEWAY_PRIVATE_KEY"),
                webhook_secret: secret("TRANSACTION_GATEWAY_EVENTS_SECRET"),
                integrity_secret: secret("TRANSACTION_GATEWAY_INTEGRITY_SECRET"),
                base_url: var("TRANSACTION_GATEWAY_BASE_URL"),
            },
        })
    }

    pub fn settings(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::CardProcessor => &self.card_processor,
            Provider::RedirectCheckout => &self.redirect_checkout,
            Provider::TransactionGateway => &self.transaction_gateway,
        }
    }

    /// Base URL for live calls, falling back to the provider's public API.
    pub fn base_url(&self, provider: Provider) -> &str {
        self.settings(provider)
            .base_url
            .as_deref()
            .unwrap_or(match provider {
                Provider::CardProcessor => DEFAULT_CARD_PROCESSOR_URL,
                Provider::RedirectCheckout => DEFAULT_REDIRECT_CHECKOUT_URL,
                Provider::TransactionGateway => DEFAULT_TRANSACTION_GATEWAY_URL,
            })
    }

    /// Decides live or simulated mode for `provider`.
    ///
    /// Fails with `Configuration` when live mode is selected, explicitly or
    /// through partially present credentials, and a credential is missing.
    pub fn resolve_mode(&self, provider: Provider) -> Result<Mode> {
        let credentials = self.required_credentials(provider);
        let missing: Vec<&str> = credentials
            .iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect();

        let mode = match self.mode {
            ModeSelection::Simulated => Mode::Simulated,
            ModeSelection::Auto if missing.len() == credentials.len() => Mode::Simulated,
            ModeSelection::Auto | ModeSelection::Live if missing.is_empty() => Mode::Live,
            _ => {
                return Err(PaymentError::Configuration(format!(
                    "{provider} selected as live but missing {}",
                    missing.join(", ")
                )));
            }
        };
        Ok(mode)
    }

    fn required_credentials(&self, provider: Provider) -> Vec<(&'static str, bool)> {
        let s = self.settings(provider);
        match provider {
            Provider::CardProcessor => vec![
                ("api key", s.api_key.is_some()),
                ("webhook secret", s.webhook_secret.is_some()),
            ],
            Provider::RedirectCheckout => vec![("access token", s.api_key.is_some())],
            Provider::TransactionGateway => vec![
                ("private key", s.api_key.is_some()),
                ("events secret", s.webhook_secret.is_some()),
                ("integrity secret", s.integrity_secret.is_some()),
            ],
        }
    }
}
