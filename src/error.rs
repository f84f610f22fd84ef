//! Payment layer error taxonomy
//!
//! Every public operation surfaces failures as structured values carrying a
//! stable code and a retryability flag; nothing in this layer panics on a
//! vendor or configuration problem.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::payments::types::ProviderName;

/// Result alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Missing or malformed credentials; fatal for that one provider only
    #[error("Configuration error for {provider}: {message}")]
    Configuration {
        provider: ProviderName,
        message: String,
    },

    /// An operation was invoked before `initialize()` completed
    #[error("Provider {provider} has not been initialized")]
    NotInitialized { provider: ProviderName },

    /// Caller input failed validation before any network call
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Amount outside the provider's configured bounds
    #[error("Amount {amount} is outside the allowed range {minimum}..={maximum}")]
    AmountOutOfBounds {
        amount: Decimal,
        minimum: Decimal,
        maximum: Decimal,
    },

    /// Provider does not settle in the requested currency
    #[error("Provider {provider} does not support currency {currency}")]
    UnsupportedCurrency {
        provider: ProviderName,
        currency: String,
    },

    /// Timeout, connection failure or non-2xx vendor response
    #[error("Transport error talking to {provider}: {message}")]
    Transport {
        provider: ProviderName,
        message: String,
        retryable: bool,
    },

    /// Vendor accepted the request but reported a failure
    #[error("{provider} rejected the request: {message}")]
    Provider {
        provider: ProviderName,
        message: String,
        retryable: bool,
    },

    /// Deployment/configuration gap, not a transient condition
    #[error("No payment provider is available for this request")]
    NoProviderAvailable,

    /// Provider name not present in the registry
    #[error("Unknown payment provider: {provider}")]
    UnknownProvider { provider: String },

    /// Inbound webhook failed signature validation
    #[error("Webhook signature verification failed for {provider}")]
    WebhookVerification { provider: ProviderName },

    /// Webhook body could not be parsed after verification
    #[error("Malformed webhook payload: {message}")]
    MalformedWebhook { message: String },

    /// Order-store collaborator failure
    #[error("Order store error: {message}")]
    Store { message: String, retryable: bool },
}

impl PaymentError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Configuration { .. } => "CONFIGURATION_ERROR",
            PaymentError::NotInitialized { .. } => "NOT_INITIALIZED",
            PaymentError::Validation { .. } => "VALIDATION_ERROR",
            PaymentError::AmountOutOfBounds { .. } => "AMOUNT_OUT_OF_BOUNDS",
            PaymentError::UnsupportedCurrency { .. } => "UNSUPPORTED_CURRENCY",
            PaymentError::Transport { .. } => "TRANSPORT_ERROR",
            PaymentError::Provider { .. } => "PROVIDER_ERROR",
            PaymentError::NoProviderAvailable => "NO_PROVIDER_AVAILABLE",
            PaymentError::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            PaymentError::WebhookVerification { .. } => "WEBHOOK_VERIFICATION_FAILED",
            PaymentError::MalformedWebhook { .. } => "MALFORMED_WEBHOOK",
            PaymentError::Store { .. } => "STORE_ERROR",
        }
    }

    /// Whether the caller may resubmit (with a fresh idempotency key).
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Transport { retryable, .. }
            | PaymentError::Provider { retryable, .. }
            | PaymentError::Store { retryable, .. } => *retryable,
            PaymentError::Configuration { .. }
            | PaymentError::NotInitialized { .. }
            | PaymentError::Validation { .. }
            | PaymentError::AmountOutOfBounds { .. }
            | PaymentError::UnsupportedCurrency { .. }
            | PaymentError::NoProviderAvailable
            | PaymentError::UnknownProvider { .. }
            | PaymentError::WebhookVerification { .. }
            | PaymentError::MalformedWebhook { .. } => false,
        }
    }

    /// Map a reqwest failure to a transport error. Timeouts and connection
    /// failures are retryable; anything else depends on the status class.
    pub fn from_reqwest(provider: ProviderName, err: reqwest::Error) -> Self {
        let retryable = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .map(|s| s.is_server_error() || s.as_u16() == 429)
                .unwrap_or(true);
        PaymentError::Transport {
            provider,
            message: err.to_string(),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let err = PaymentError::Validation {
            message: "bad input".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let err = PaymentError::AmountOutOfBounds {
            amount: dec!(2.00),
            minimum: dec!(5.00),
            maximum: dec!(100000.00),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "AMOUNT_OUT_OF_BOUNDS");
    }

    #[test]
    fn test_no_provider_is_first_class_and_non_retryable() {
        let err = PaymentError::NoProviderAvailable;
        assert_eq!(err.code(), "NO_PROVIDER_AVAILABLE");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_retryability_is_carried() {
        let err = PaymentError::Transport {
            provider: ProviderName::Yoco,
            message: "timed out".to_string(),
            retryable: true,
        };
        assert!(err.is_retryable());
        assert_eq!(err.code(), "TRANSPORT_ERROR");
    }
}
