use thiserror::Error;

/// Errors raised by the payment core.
///
/// The first six variants form the operational taxonomy the rest of the
/// application reacts to; the remainder describe malformed input or I/O.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Missing or partial credentials for a provider selected as live.
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Operation not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,
    /// Network failure, timeout or 5xx from a live provider API.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Webhook from a channel that cannot be authenticated and could not be
    /// corroborated by a direct status read.
    #[error("Unverified webhook source: {0}")]
    UnverifiedSource(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// Live provider answered with a 4xx other than not-found.
    #[error("Provider rejected request ({status}): {message}")]
    ProviderRejected { status: u16, message: String },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Copyable discriminant of [`PaymentError`], used where the anomaly must be
/// reported without handing over the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    InvalidState,
    InvalidSignature,
    ProviderUnavailable,
    UnverifiedSource,
    InvalidAmount,
    InvalidPayload,
    Unsupported,
    ProviderRejected,
    Internal,
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InvalidSignature => ErrorKind::InvalidSignature,
            Self::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Self::UnverifiedSource(_) => ErrorKind::UnverifiedSource,
            Self::InvalidAmount(_) => ErrorKind::InvalidAmount,
            Self::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::ProviderRejected { .. } => ErrorKind::ProviderRejected,
            Self::Csv(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may offer a retry to the user. Nothing here is
    /// retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        Self::ProviderUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(PaymentError::ProviderUnavailable("timeout".into()).is_retryable());
        assert!(!PaymentError::InvalidSignature.is_retryable());
        assert!(!PaymentError::Configuration("missing key".into()).is_retryable());
    }

    #[test]
    fn test_kind_discriminant() {
        let err = PaymentError::ProviderRejected {
            status: 400,
            message: "bad".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ProviderRejected);
        assert_eq!(
            PaymentError::NotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
    }
}
