//! Payment provider trait definition
//!
//! The common interface every gateway adapter implements, plus the shared
//! default behavior (fee calculation, amount bounds, capability checks)
//! that concrete providers inherit.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::{FeeModel, PaymentConfig};
use crate::error::{PaymentError, PaymentResult};
use crate::orders::OrderStore;
use crate::payments::types::{
    Currency, PaymentMethod, PaymentRequest, PaymentResponse, PaymentStatus, PaymentWebhook,
    ProviderName,
};

/// Trait for payment gateway adapters
///
/// Providers are constructed from a [`PaymentConfig`], initialized once by
/// the manager, and then serve create/status/refund/webhook calls. All
/// vendor I/O stays inside the implementations; callers only ever see the
/// standardized types.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// The read-only configuration this provider was built from
    fn config(&self) -> &PaymentConfig;

    fn is_initialized(&self) -> bool;

    /// Validate credentials and prepare the vendor client. Idempotent:
    /// a second call is a no-op. Must succeed before any other operation.
    async fn initialize(&mut self) -> PaymentResult<()>;

    /// Whether all required credentials are present
    fn validate_credentials(&self) -> bool;

    /// Initiate a payment with the vendor and return the redirect
    /// mechanism. Implementations must call [`validate_amount`] and
    /// [`ensure_initialized`] before any network traffic.
    ///
    /// [`validate_amount`]: PaymentProvider::validate_amount
    /// [`ensure_initialized`]: PaymentProvider::ensure_initialized
    async fn create_payment(&self, request: &PaymentRequest) -> PaymentResult<PaymentResponse>;

    /// Query the vendor for the current status of a payment.
    ///
    /// "Not found" is not an error: unknown payments map to
    /// [`PaymentStatus::Pending`]. Errors are reserved for transport
    /// failures.
    async fn get_payment_status(&self, payment_id: &str) -> PaymentResult<PaymentStatus>;

    /// Refund a payment. A partial refund happens when `amount` is given
    /// and smaller than the original; otherwise the refund is full.
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: Option<&str>,
    ) -> PaymentResult<PaymentResponse>;

    /// Verify an inbound webhook against the raw (unparsed) body.
    ///
    /// `signature` is the vendor-supplied value when it travels out of
    /// band; providers whose signature is embedded in the body extract it
    /// themselves. Comparison must be constant-time.
    fn verify_webhook(
        &self,
        payload: &str,
        signature: Option<&str>,
        headers: &http::HeaderMap,
    ) -> bool;

    /// Parse a verified raw body into `(event name, data)`. Called only
    /// after [`verify_webhook`] succeeded.
    ///
    /// [`verify_webhook`]: PaymentProvider::verify_webhook
    fn parse_webhook_event(&self, payload: &str) -> PaymentResult<(String, serde_json::Value)>;

    /// Map the verified webhook to a standardized status and persist it
    /// through the order-store collaborator.
    async fn process_webhook(
        &self,
        webhook: &PaymentWebhook,
        store: &dyn OrderStore,
    ) -> PaymentResult<()>;

    /// Available iff enabled, initialized and credentialed. Pure query.
    fn is_available(&self) -> bool {
        self.config().enabled && self.is_initialized() && self.validate_credentials()
    }

    /// Transaction fee for `amount` under this provider's fee model.
    /// No min/max clamping; bounds are validated separately.
    fn calculate_fees(&self, amount: Decimal) -> Decimal {
        match self.config().settings.fee {
            FeeModel::Percentage(percent) => amount * percent / Decimal::ONE_HUNDRED,
            FeeModel::Fixed(fee) => fee,
        }
    }

    fn supports_method(&self, method: PaymentMethod) -> bool {
        self.config().settings.supported_methods.contains(&method)
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        self.config().settings.supported_currencies.contains(&currency)
    }

    /// Fail fast (non-retryable) outside the configured amount bounds.
    fn validate_amount(&self, amount: Decimal) -> PaymentResult<()> {
        let settings = &self.config().settings;
        if amount < settings.minimum_amount || amount > settings.maximum_amount {
            return Err(PaymentError::AmountOutOfBounds {
                amount,
                minimum: settings.minimum_amount,
                maximum: settings.maximum_amount,
            });
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> PaymentResult<()> {
        if !self.is_initialized() {
            return Err(PaymentError::NotInitialized {
                provider: self.name(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct StubProvider {
        config: PaymentConfig,
        initialized: bool,
    }

    impl StubProvider {
        fn new(fee: FeeModel) -> Self {
            Self {
                config: PaymentConfig {
                    provider: ProviderName::PayFast,
                    enabled: true,
                    test_mode: true,
                    credentials: HashMap::from([("merchant_id".to_string(), "10000100".to_string())]),
                    settings: ProviderSettings {
                        supported_methods: vec![PaymentMethod::Card],
                        supported_currencies: vec![Currency::Zar],
                        minimum_amount: dec!(5.00),
                        maximum_amount: dec!(1000000.00),
                        fee,
                    },
                    timeout_secs: 30,
                    max_retries: 3,
                },
                initialized: true,
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for StubProvider {
        fn name(&self) -> ProviderName {
            ProviderName::PayFast
        }

        fn config(&self) -> &PaymentConfig {
            &self.config
        }

        fn is_initialized(&self) -> bool {
            self.initialized
        }

        async fn initialize(&mut self) -> PaymentResult<()> {
            self.initialized = true;
            Ok(())
        }

        fn validate_credentials(&self) -> bool {
            self.config.credential("merchant_id").is_some()
        }

        async fn create_payment(
            &self,
            request: &PaymentRequest,
        ) -> PaymentResult<PaymentResponse> {
            self.ensure_initialized()?;
            self.validate_amount(request.amount.amount)?;
            Ok(PaymentResponse::success("stub_1", PaymentStatus::Pending, &request.reference))
        }

        async fn get_payment_status(&self, _payment_id: &str) -> PaymentResult<PaymentStatus> {
            Ok(PaymentStatus::Pending)
        }

        async fn refund_payment(
            &self,
            payment_id: &str,
            _amount: Option<Decimal>,
            _reason: Option<&str>,
        ) -> PaymentResult<PaymentResponse> {
            Ok(PaymentResponse::success(payment_id, PaymentStatus::Refunded, "ref"))
        }

        fn verify_webhook(
            &self,
            _payload: &str,
            _signature: Option<&str>,
            _headers: &http::HeaderMap,
        ) -> bool {
            true
        }

        fn parse_webhook_event(
            &self,
            payload: &str,
        ) -> PaymentResult<(String, serde_json::Value)> {
            Ok(("test.event".to_string(), serde_json::json!({ "raw": payload })))
        }

        async fn process_webhook(
            &self,
            _webhook: &PaymentWebhook,
            _store: &dyn OrderStore,
        ) -> PaymentResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_percentage_fee() {
        let provider = StubProvider::new(FeeModel::Percentage(dec!(3.5)));
        assert_eq!(provider.calculate_fees(dec!(100.00)), dec!(3.50));
        assert_eq!(provider.calculate_fees(dec!(0)), dec!(0));
    }

    #[test]
    fn test_fixed_fee_ignores_amount() {
        let provider = StubProvider::new(FeeModel::Fixed(dec!(2.50)));
        assert_eq!(provider.calculate_fees(dec!(100.00)), dec!(2.50));
        assert_eq!(provider.calculate_fees(dec!(99999.00)), dec!(2.50));
    }

    #[test]
    fn test_amount_bounds() {
        let provider = StubProvider::new(FeeModel::Percentage(dec!(3.5)));
        assert!(provider.validate_amount(dec!(5.00)).is_ok());
        assert!(provider.validate_amount(dec!(1000000.00)).is_ok());

        let err = provider.validate_amount(dec!(4.99)).unwrap_err();
        assert_eq!(err.code(), "AMOUNT_OUT_OF_BOUNDS");
        assert!(!err.is_retryable());
        assert!(provider.validate_amount(dec!(1000000.01)).is_err());
    }

    #[test]
    fn test_availability_requires_init_and_credentials() {
        let mut provider = StubProvider::new(FeeModel::Percentage(dec!(3.5)));
        assert!(provider.is_available());

        provider.initialized = false;
        assert!(!provider.is_available());

        provider.initialized = true;
        provider.config.enabled = false;
        assert!(!provider.is_available());
    }
}
