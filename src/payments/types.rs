//! Payment types and data structures
//!
//! Common types used across all payment providers for requests, responses,
//! status tracking and webhook envelopes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PaymentError;
use crate::payments::utils;

/// Supported settlement currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Zar,
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Zar => "ZAR",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Zar => "R",
            Currency::Usd => "$",
            Currency::Eur => "€",
            Currency::Gbp => "£",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ZAR" => Ok(Currency::Zar),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            other => Err(PaymentError::Validation {
                message: format!("Unsupported currency: {}", other),
            }),
        }
    }
}

/// Payment methods a provider can offer at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Eft,
    InstantEft,
    QrCode,
}

/// Known payment gateway providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    PayFast,
    Yoco,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::PayFast => "payfast",
            ProviderName::Yoco => "yoco",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "payfast" => Ok(ProviderName::PayFast),
            "yoco" => Ok(ProviderName::Yoco),
            other => Err(PaymentError::UnknownProvider {
                provider: other.to_string(),
            }),
        }
    }
}

/// Monetary amount in major units with a display-only formatted rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAmount {
    /// Amount in major units (rand, not cents)
    pub amount: Decimal,
    /// Settlement currency
    pub currency: Currency,
    /// Locale-formatted rendering, derived. Never used in calculation.
    pub formatted: String,
}

impl PaymentAmount {
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, PaymentError> {
        if amount.is_sign_negative() {
            return Err(PaymentError::Validation {
                message: format!("Amount must not be negative, got {}", amount),
            });
        }
        Ok(Self {
            amount,
            currency,
            formatted: utils::format_amount(amount, currency),
        })
    }
}

/// Customer identity and contact details passed to provider risk fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// South African mobile number, local or +27 prefixed
    pub phone: Option<String>,
    /// 13-digit South African ID number; must pass the checksum when present
    pub id_number: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
}

/// One checkout line item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentItem {
    pub name: String,
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl PaymentItem {
    /// Line-item consistency: unit_price * quantity must equal total_price.
    pub fn is_consistent(&self) -> bool {
        self.unit_price * Decimal::from(self.quantity) == self.total_price
    }
}

/// Free-form metadata bag. `order_id` and `customer_id` are the join keys
/// back to the order store and must survive a round trip through every
/// provider so asynchronous webhooks can be correlated to orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub order_id: String,
    pub customer_id: String,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

/// The single unit of work submitted to the payment layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Caller-supplied idempotent reference for this attempt
    pub reference: String,
    pub amount: PaymentAmount,
    pub customer: PaymentCustomer,
    pub items: Vec<PaymentItem>,
    pub metadata: PaymentMetadata,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub preferred_methods: Option<Vec<PaymentMethod>>,
}

impl PaymentRequest {
    /// Pre-submission validation. Runs before any provider is contacted;
    /// failures are non-retryable.
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.reference.trim().is_empty() {
            return Err(PaymentError::Validation {
                message: "Payment reference must not be empty".to_string(),
            });
        }
        if self.metadata.order_id.trim().is_empty() || self.metadata.customer_id.trim().is_empty() {
            return Err(PaymentError::Validation {
                message: "Metadata must carry order_id and customer_id".to_string(),
            });
        }
        if self.amount.amount.is_sign_negative() {
            return Err(PaymentError::Validation {
                message: "Amount must not be negative".to_string(),
            });
        }
        for item in &self.items {
            if !item.is_consistent() {
                return Err(PaymentError::Validation {
                    message: format!(
                        "Line item '{}' is inconsistent: {} x {} != {}",
                        item.name, item.unit_price, item.quantity, item.total_price
                    ),
                });
            }
        }
        if let Some(id_number) = &self.customer.id_number {
            if !utils::validate_sa_id_number(id_number) {
                return Err(PaymentError::Validation {
                    message: "Customer ID number failed checksum validation".to_string(),
                });
            }
        }
        if let Some(phone) = &self.customer.phone {
            if !utils::validate_sa_phone_number(phone) {
                return Err(PaymentError::Validation {
                    message: "Customer phone number is not a valid SA number".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Standardized payment lifecycle status across all providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Authorized,
    Captured,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Refunded,
    PartiallyRefunded,
    Disputed,
}

impl PaymentStatus {
    /// Terminal states get no further automatic status refresh.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Expired
                | PaymentStatus::Refunded
        )
    }

    /// Whether a transition from `self` to `next` is allowed by the
    /// lifecycle state machine. Any state may move to `Disputed`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        if next == Disputed {
            return true;
        }
        match self {
            Pending => matches!(
                next,
                Processing | Authorized | Completed | Failed | Cancelled | Expired
            ),
            Processing => matches!(next, Authorized | Completed | Failed | Cancelled | Expired),
            Authorized => matches!(next, Captured | Completed | Failed | Cancelled | Expired),
            Captured => matches!(next, Completed | Failed),
            Completed => matches!(next, Refunded | PartiallyRefunded),
            PartiallyRefunded => matches!(next, Refunded | PartiallyRefunded),
            Failed | Cancelled | Expired | Refunded | Disputed => false,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
            PaymentStatus::Disputed => "DISPUTED",
        };
        f.write_str(s)
    }
}

/// Structured error carried inside a failed [`PaymentResponse`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponseError {
    /// Stable machine-readable code, e.g. NO_PROVIDER_AVAILABLE
    pub code: String,
    pub message: String,
    /// Whether the caller may retry with a fresh idempotency key
    pub retryable: bool,
}

impl From<&PaymentError> for PaymentResponseError {
    fn from(err: &PaymentError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Outcome of a payment operation. On success exactly one redirect
/// mechanism is populated; callers follow `redirect_url`, then
/// `payment_url`, then `metadata.form_html`, in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub payment_id: Option<String>,
    pub status: PaymentStatus,
    pub reference: String,
    pub redirect_url: Option<String>,
    pub payment_url: Option<String>,
    pub error: Option<PaymentResponseError>,
    pub metadata: Option<serde_json::Value>,
}

impl PaymentResponse {
    pub fn success(
        payment_id: impl Into<String>,
        status: PaymentStatus,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            payment_id: Some(payment_id.into()),
            status,
            reference: reference.into(),
            redirect_url: None,
            payment_url: None,
            error: None,
            metadata: None,
        }
    }

    pub fn failure(reference: impl Into<String>, err: &PaymentError) -> Self {
        Self {
            success: false,
            payment_id: None,
            status: PaymentStatus::Failed,
            reference: reference.into(),
            redirect_url: None,
            payment_url: None,
            error: Some(PaymentResponseError::from(err)),
            metadata: None,
        }
    }

    pub fn with_redirect_url(mut self, url: impl Into<String>) -> Self {
        self.redirect_url = Some(url.into());
        self
    }

    pub fn with_payment_url(mut self, url: impl Into<String>) -> Self {
        self.payment_url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Normalized inbound vendor notification. `verified` is set only after
/// signature validation succeeded; `data` must not be trusted before then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhook {
    pub id: uuid::Uuid,
    pub provider: ProviderName,
    pub event: String,
    pub data: serde_json::Value,
    pub signature: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_rejects_negative() {
        assert!(PaymentAmount::new(dec!(-1), Currency::Zar).is_err());
        assert!(PaymentAmount::new(dec!(0), Currency::Zar).is_ok());
    }

    #[test]
    fn test_amount_formatted_is_derived() {
        let amount = PaymentAmount::new(dec!(1234.5), Currency::Zar).unwrap();
        assert_eq!(amount.formatted, "R 1 234.50");
    }

    #[test]
    fn test_item_consistency() {
        let item = PaymentItem {
            name: "Sticker pack".to_string(),
            description: None,
            quantity: 3,
            unit_price: dec!(10.50),
            total_price: dec!(31.50),
        };
        assert!(item.is_consistent());

        let bad = PaymentItem {
            total_price: dec!(31.00),
            ..item
        };
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_terminal_states() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Completed.is_terminal());
        assert!(!PaymentStatus::PartiallyRefunded.is_terminal());
    }

    #[test]
    fn test_state_machine_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Refunded));
        assert!(Completed.can_transition_to(PartiallyRefunded));
        assert!(Authorized.can_transition_to(Captured));
        // Any state may become disputed
        assert!(Failed.can_transition_to(Disputed));
        assert!(Completed.can_transition_to(Disputed));
        // Terminal states do not move on
        assert!(!Refunded.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Expired.can_transition_to(Processing));
    }

    #[test]
    fn test_provider_name_round_trip() {
        assert_eq!(
            "payfast".parse::<ProviderName>().unwrap(),
            ProviderName::PayFast
        );
        assert_eq!("YOCO".parse::<ProviderName>().unwrap(), ProviderName::Yoco);
        assert!("stripe".parse::<ProviderName>().is_err());
    }
}
