use super::operation::Provider;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;

/// Currencies the card processor treats as having no minor unit.
const CARD_ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// ISO 4217 currencies with exponent 0.
const ISO_ZERO_EXPONENT: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "UYI", "VND",
    "VUV", "XAF", "XOF", "XPF",
];

/// ISO 4217 currencies with exponent 3.
const ISO_THREE_EXPONENT: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// How a provider expects amounts to be expressed.
///
/// Amounts are never normalized across providers: a `PaymentOperation`
/// carries the amount in the convention of the provider that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinorUnitPolicy {
    /// Two decimals except for the processor's zero-decimal currencies.
    ZeroDecimalAware,
    /// Plain ISO 4217 exponent.
    Iso4217,
    /// Always hundredths of the major unit, whatever the currency exponent.
    AlwaysCents,
}

impl MinorUnitPolicy {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::CardProcessor => MinorUnitPolicy::ZeroDecimalAware,
            Provider::RedirectCheckout => MinorUnitPolicy::Iso4217,
            Provider::TransactionGateway => MinorUnitPolicy::AlwaysCents,
        }
    }

    /// Number of decimal places one major unit is split into.
    pub fn exponent(&self, currency: &str) -> u32 {
        let code = currency.to_ascii_uppercase();
        match self {
            MinorUnitPolicy::ZeroDecimalAware if CARD_ZERO_DECIMAL.contains(&code.as_str()) => 0,
            MinorUnitPolicy::ZeroDecimalAware => 2,
            MinorUnitPolicy::Iso4217 if ISO_ZERO_EXPONENT.contains(&code.as_str()) => 0,
            MinorUnitPolicy::Iso4217 if ISO_THREE_EXPONENT.contains(&code.as_str()) => 3,
            MinorUnitPolicy::Iso4217 => 2,
            MinorUnitPolicy::AlwaysCents => 2,
        }
    }

    /// Converts a major-unit amount into this policy's minor units.
    ///
    /// Fails if the amount is not positive or carries more precision than
    /// the minor unit can express.
    pub fn to_minor(&self, major: Decimal, currency: &str) -> Result<i64> {
        if major <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!(
                "amount must be positive, got {major}"
            )));
        }
        let scaled = major * Decimal::from(10_i64.pow(self.exponent(currency)));
        if scaled.fract() != Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!(
                "{major} {currency} has more precision than its minor unit"
            )));
        }
        i64::try_from(scaled)
            .map_err(|_| PaymentError::InvalidAmount(format!("{major} {currency} is out of range")))
    }

    /// Converts minor units back into a major-unit decimal.
    pub fn to_major(&self, minor: i64, currency: &str) -> Decimal {
        Decimal::new(minor, self.exponent(currency))
    }
}

/// Validates a minor-unit amount received from a caller.
pub fn ensure_positive(amount_minor: i64) -> Result<()> {
    if amount_minor > 0 {
        Ok(())
    } else {
        Err(PaymentError::InvalidAmount(format!(
            "amount must be positive, got {amount_minor}"
        )))
    }
}

/// Normalizes a currency code to upper-case ISO 4217 form.
pub fn normalize_currency(currency: &str) -> Result<String> {
    let code = currency.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(PaymentError::InvalidAmount(format!(
            "'{currency}' is not an ISO 4217 code"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_card_processor_zero_decimal_currencies() {
        let policy = MinorUnitPolicy::for_provider(Provider::CardProcessor);
        assert_eq!(policy.to_minor(dec!(1000), "jpy").unwrap(), 1000);
        assert_eq!(policy.to_minor(dec!(10.50), "USD").unwrap(), 1050);
        assert_eq!(policy.to_minor(dec!(1000), "COP").unwrap(), 100000);
    }

    #[test]
    fn test_redirect_checkout_follows_iso_exponent() {
        let policy = MinorUnitPolicy::for_provider(Provider::RedirectCheckout);
        assert_eq!(policy.to_minor(dec!(1.5), "KWD").unwrap(), 1500);
        assert_eq!(policy.to_minor(dec!(5000), "CLP").unwrap(), 5000);
        assert_eq!(policy.to_major(150000, "COP"), dec!(1500.00));
    }

    #[test]
    fn test_transaction_gateway_always_cents() {
        let policy = MinorUnitPolicy::for_provider(Provider::TransactionGateway);
        // Whole-unit currencies are still multiplied by 100.
        assert_eq!(policy.to_minor(dec!(5000), "CLP").unwrap(), 500000);
        assert_eq!(policy.to_minor(dec!(15000), "COP").unwrap(), 1500000);
        assert_eq!(policy.to_major(1500000, "COP"), dec!(15000));
    }

    #[test]
    fn test_rejects_non_positive_and_excess_precision() {
        let policy = MinorUnitPolicy::Iso4217;
        assert!(matches!(
            policy.to_minor(dec!(0), "USD"),
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(matches!(
            policy.to_minor(dec!(1.005), "USD"),
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(ensure_positive(-1).is_err());
        assert!(ensure_positive(1).is_ok());
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency(" cop ").unwrap(), "COP");
        assert!(normalize_currency("pesos").is_err());
        assert!(normalize_currency("U1D").is_err());
    }
}
