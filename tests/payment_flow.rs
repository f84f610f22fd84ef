//! End-to-end manager tests: registry degradation, provider selection,
//! structured no-provider failures and the webhook verification path,
//! exercised against the real PayFast adapter and an in-memory order store.

use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use storefront_payments::config::{FeeModel, PaymentConfig, ProviderSettings};
use storefront_payments::error::PaymentResult;
use storefront_payments::orders::{OrderStatusUpdate, OrderStore};
use storefront_payments::payments::types::{
    Currency, PaymentAmount, PaymentCustomer, PaymentItem, PaymentMetadata, PaymentMethod,
    PaymentRequest, PaymentStatus, ProviderName,
};
use storefront_payments::payments::PaymentManager;

#[derive(Default)]
struct RecordingStore {
    calls: AtomicUsize,
    last_update: Mutex<Option<OrderStatusUpdate>>,
}

#[async_trait]
impl OrderStore for RecordingStore {
    async fn update_order_status(&self, update: OrderStatusUpdate) -> PaymentResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_update.lock().unwrap() = Some(update);
        Ok(())
    }
}

fn payfast_config() -> PaymentConfig {
    PaymentConfig {
        provider: ProviderName::PayFast,
        enabled: true,
        test_mode: true,
        credentials: HashMap::from([
            ("merchant_id".to_string(), "10000100".to_string()),
            ("merchant_key".to_string(), "46f0cd694581a".to_string()),
        ]),
        settings: ProviderSettings {
            supported_methods: vec![PaymentMethod::Card, PaymentMethod::Eft],
            supported_currencies: vec![Currency::Zar],
            minimum_amount: dec!(5.00),
            maximum_amount: dec!(1000000.00),
            fee: FeeModel::Percentage(dec!(3.5)),
        },
        timeout_secs: 30,
        max_retries: 3,
    }
}

/// Enabled but missing its required credential, so initialization fails.
fn broken_yoco_config() -> PaymentConfig {
    PaymentConfig {
        provider: ProviderName::Yoco,
        enabled: true,
        test_mode: true,
        credentials: HashMap::new(),
        settings: ProviderSettings {
            supported_methods: vec![PaymentMethod::Card],
            supported_currencies: vec![Currency::Zar],
            minimum_amount: dec!(2.00),
            maximum_amount: dec!(500000.00),
            fee: FeeModel::Percentage(dec!(2.95)),
        },
        timeout_secs: 30,
        max_retries: 3,
    }
}

fn checkout_request(amount: rust_decimal::Decimal) -> PaymentRequest {
    PaymentRequest {
        reference: "ORD_1700000000000_TEST01".to_string(),
        amount: PaymentAmount::new(amount, Currency::Zar).unwrap(),
        customer: PaymentCustomer {
            first_name: "Lerato".to_string(),
            last_name: "Ndlovu".to_string(),
            email: "lerato@example.co.za".to_string(),
            phone: Some("0831234567".to_string()),
            id_number: Some("8001015009087".to_string()),
            address_line1: None,
            city: Some("Cape Town".to_string()),
            postal_code: Some("8001".to_string()),
        },
        items: vec![PaymentItem {
            name: "Linen shirt".to_string(),
            description: Some("Slim fit, navy".to_string()),
            quantity: 1,
            unit_price: amount,
            total_price: amount,
        }],
        metadata: PaymentMetadata {
            order_id: "order_abc".to_string(),
            customer_id: "cust_def".to_string(),
            extra: HashMap::new(),
        },
        return_url: "https://shop.example.co.za/checkout/return".to_string(),
        cancel_url: "https://shop.example.co.za/checkout/cancel".to_string(),
        notify_url: "https://shop.example.co.za/api/webhooks/payfast".to_string(),
        expires_at: None,
        preferred_methods: Some(vec![PaymentMethod::Card]),
    }
}

async fn manager_with(
    configs: Vec<PaymentConfig>,
) -> (PaymentManager, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::default());
    let manager = PaymentManager::initialize(configs, store.clone()).await;
    (manager, store)
}

#[tokio::test]
async fn manager_degrades_when_one_provider_is_misconfigured() {
    let (manager, _) = manager_with(vec![payfast_config(), broken_yoco_config()]).await;

    assert_eq!(manager.get_available_providers(), vec![ProviderName::PayFast]);

    let health = manager.health_check();
    assert_eq!(health.get(&ProviderName::PayFast), Some(&true));
    assert_eq!(health.get(&ProviderName::Yoco), Some(&false));
}

#[tokio::test]
async fn empty_registry_yields_structured_no_provider_failure() {
    let (manager, _) = manager_with(vec![]).await;

    let response = manager.create_payment(&checkout_request(dec!(500.00)), None).await;
    assert!(!response.success);
    let error = response.error.expect("structured error");
    assert_eq!(error.code, "NO_PROVIDER_AVAILABLE");
    assert!(!error.retryable);
}

#[tokio::test]
async fn create_payment_returns_signed_form_for_payfast() {
    let (manager, _) = manager_with(vec![payfast_config()]).await;
    let request = checkout_request(dec!(500.00));

    let response = manager.create_payment(&request, None).await;
    assert!(response.success, "error: {:?}", response.error);
    assert_eq!(response.status, PaymentStatus::Pending);
    assert_eq!(response.reference, request.reference);

    // Redirect mechanism priority: no URLs here, only the form
    assert!(response.redirect_url.is_none());
    assert!(response.payment_url.is_none());
    let form_html = response.metadata.unwrap()["form_html"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(form_html.contains("name=\"m_payment_id\""));
    assert!(form_html.contains(&format!("value=\"{}\"", request.reference)));
}

#[tokio::test]
async fn invalid_request_fails_before_provider_dispatch() {
    let (manager, _) = manager_with(vec![payfast_config()]).await;

    let mut request = checkout_request(dec!(500.00));
    request.items[0].total_price = dec!(499.00);

    let response = manager.create_payment(&request, None).await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn out_of_bounds_amount_is_non_retryable() {
    let (manager, _) = manager_with(vec![payfast_config()]).await;

    let response = manager.create_payment(&checkout_request(dec!(4.00)), None).await;
    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.code, "AMOUNT_OUT_OF_BOUNDS");
    assert!(!error.retryable);
}

#[tokio::test]
async fn fee_quotes_cover_available_providers() {
    let (manager, _) = manager_with(vec![payfast_config(), broken_yoco_config()]).await;

    let fees = manager.calculate_fees(dec!(1000.00));
    assert_eq!(fees.len(), 1);
    assert_eq!(fees.get(&ProviderName::PayFast), Some(&dec!(35.00)));
}

#[tokio::test]
async fn best_provider_falls_back_when_preference_matches_nothing() {
    let (manager, _) = manager_with(vec![payfast_config()]).await;

    // PayFast does not offer QR payments, but it is the only provider up
    let selected = manager.get_best_provider(Some(&[PaymentMethod::QrCode]));
    assert_eq!(selected, Some(ProviderName::PayFast));
}

fn itn_body(pairs: &[(&str, &str)]) -> String {
    fn encode(value: &str) -> String {
        let mut out = String::new();
        for byte in value.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                    out.push(byte as char)
                }
                b' ' => out.push('+'),
                other => out.push_str(&format!("%{:02X}", other)),
            }
        }
        out
    }

    let base = pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    let signature = format!("{:x}", md5::compute(base.as_bytes()));
    format!("{}&signature={}", base, signature)
}

#[tokio::test]
async fn verified_webhook_updates_the_order_store() {
    let (manager, store) = manager_with(vec![payfast_config()]).await;

    let body = itn_body(&[
        ("m_payment_id", "ORD_1700000000000_TEST01"),
        ("pf_payment_id", "1089250"),
        ("payment_status", "COMPLETE"),
        ("amount_gross", "500.00"),
        ("custom_str1", "order_abc"),
        ("custom_str2", "cust_def"),
    ]);

    let accepted = manager
        .process_webhook(ProviderName::PayFast, &body, None, &http::HeaderMap::new())
        .await;
    assert!(accepted);
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);

    let update = store.last_update.lock().unwrap().clone().unwrap();
    assert_eq!(update.order_id, "order_abc");
    assert_eq!(update.payment_status, PaymentStatus::Completed);
    assert_eq!(update.payment_id.as_deref(), Some("1089250"));
}

#[tokio::test]
async fn tampered_webhook_is_rejected_and_store_untouched() {
    let (manager, store) = manager_with(vec![payfast_config()]).await;

    let body = itn_body(&[
        ("m_payment_id", "ORD_1700000000000_TEST01"),
        ("payment_status", "COMPLETE"),
        ("custom_str1", "order_abc"),
    ]);
    let tampered = body.replace("COMPLETE", "COMPLETF");

    let accepted = manager
        .process_webhook(ProviderName::PayFast, &tampered, None, &http::HeaderMap::new())
        .await;
    assert!(!accepted);
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn webhook_for_unknown_provider_is_rejected_without_panic() {
    let (manager, store) = manager_with(vec![payfast_config()]).await;

    let accepted = manager
        .process_webhook(ProviderName::Yoco, "{}", None, &http::HeaderMap::new())
        .await;
    assert!(!accepted);
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}
