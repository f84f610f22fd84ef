//! PayFast payment provider implementation
//!
//! Redirect/form-post gateway: checkout is an auto-submitting HTML form
//! posted to the PayFast engine, signed with an MD5 hash over a fixed,
//! vendor-documented field order. Status changes arrive through ITN
//! (Instant Transaction Notification) webhooks whose signature is
//! recomputed over the inbound payload.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PaymentConfig;
use crate::error::{PaymentError, PaymentResult};
use crate::orders::{OrderStatusUpdate, OrderStore};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    PaymentMethod, PaymentRequest, PaymentResponse, PaymentStatus, PaymentWebhook, ProviderName,
};
use crate::payments::utils;

const LIVE_ENGINE_URL: &str = "https://www.payfast.co.za/eng/process";
const SANDBOX_ENGINE_URL: &str = "https://sandbox.payfast.co.za/eng/process";
const API_BASE_URL: &str = "https://api.payfast.co.za";

/// Checkout signature field order, as documented by PayFast. Neither
/// alphabetical nor insertion order; do not reorder.
const SIGNATURE_FIELD_ORDER: &[&str] = &[
    "merchant_id",
    "merchant_key",
    "return_url",
    "cancel_url",
    "notify_url",
    "name_first",
    "name_last",
    "email_address",
    "cell_number",
    "m_payment_id",
    "amount",
    "item_name",
    "item_description",
    "custom_str1",
    "custom_str2",
    "custom_str3",
    "payment_method",
];

pub struct PayFastProvider {
    config: PaymentConfig,
    client: reqwest::Client,
    initialized: bool,
}

impl PayFastProvider {
    pub fn new(config: PaymentConfig) -> PaymentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::Configuration {
                provider: ProviderName::PayFast,
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            client,
            initialized: false,
        })
    }

    fn engine_url(&self) -> &'static str {
        if self.config.test_mode {
            SANDBOX_ENGINE_URL
        } else {
            LIVE_ENGINE_URL
        }
    }

    fn passphrase(&self) -> Option<&str> {
        self.config.credential("passphrase")
    }

    /// Flat key-value payload for the checkout form, in signature order.
    /// `custom_str1`/`custom_str2` carry the order/customer join keys so
    /// ITN callbacks can be correlated back to the order.
    fn build_payload(&self, request: &PaymentRequest) -> PaymentResult<Vec<(&'static str, String)>> {
        let merchant_id = self.require_credential("merchant_id")?.to_string();
        let merchant_key = self.require_credential("merchant_key")?.to_string();

        let item_name = request
            .items
            .first()
            .map(|item| item.name.clone())
            .unwrap_or_else(|| format!("Order {}", request.metadata.order_id));
        let item_description = request
            .items
            .iter()
            .map(|item| format!("{} x{}", item.name, item.quantity))
            .collect::<Vec<_>>()
            .join(", ");

        let payment_method = request
            .preferred_methods
            .as_deref()
            .and_then(|methods| methods.first())
            .and_then(|method| match method {
                PaymentMethod::Card => Some("cc"),
                PaymentMethod::Eft | PaymentMethod::InstantEft => Some("eft"),
                PaymentMethod::QrCode => None,
            });

        let mut fields: Vec<(&'static str, String)> = vec![
            ("merchant_id", merchant_id),
            ("merchant_key", merchant_key),
            ("return_url", request.return_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("notify_url", request.notify_url.clone()),
            ("name_first", request.customer.first_name.clone()),
            ("name_last", request.customer.last_name.clone()),
            ("email_address", request.customer.email.clone()),
            ("m_payment_id", request.reference.clone()),
            ("amount", format!("{:.2}", request.amount.amount)),
            ("item_name", item_name),
            ("custom_str1", request.metadata.order_id.clone()),
            ("custom_str2", request.metadata.customer_id.clone()),
            // Strictly-unique token for this creation attempt
            ("custom_str3", uuid::Uuid::new_v4().to_string()),
        ];
        if let Some(phone) = &request.customer.phone {
            fields.push(("cell_number", phone.clone()));
        }
        if !item_description.is_empty() {
            fields.push(("item_description", item_description));
        }
        if let Some(method) = payment_method {
            fields.push(("payment_method", method.to_string()));
        }

        // Present fields sorted into the documented signature order
        fields.sort_by_key(|(key, _)| {
            SIGNATURE_FIELD_ORDER
                .iter()
                .position(|candidate| candidate == key)
                .unwrap_or(usize::MAX)
        });
        Ok(fields)
    }

    fn require_credential(&self, key: &str) -> PaymentResult<&str> {
        self.config
            .credential(key)
            .ok_or_else(|| PaymentError::Configuration {
                provider: ProviderName::PayFast,
                message: format!("Missing credential '{}'", key),
            })
    }

    /// Auto-submitting HTML form carrying the signed payload.
    fn render_form(&self, fields: &[(&'static str, String)], signature: &str) -> String {
        let mut inputs = String::new();
        for (key, value) in fields {
            inputs.push_str(&format!(
                "    <input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                key,
                html_escape(value)
            ));
        }
        inputs.push_str(&format!(
            "    <input type=\"hidden\" name=\"signature\" value=\"{}\">\n",
            signature
        ));

        format!(
            "<form id=\"payfast-checkout\" action=\"{}\" method=\"post\">\n{}</form>\n\
             <script>document.getElementById(\"payfast-checkout\").submit();</script>",
            self.engine_url(),
            inputs
        )
    }

    /// Authentication signature for the PayFast merchant API: MD5 over the
    /// alphabetically-sorted auth parameters (unlike the checkout form,
    /// which uses the documented field order).
    fn api_signature(&self, merchant_id: &str, timestamp: &str) -> String {
        let mut params: Vec<(&str, &str)> = vec![
            ("merchant-id", merchant_id),
            ("timestamp", timestamp),
            ("version", "v1"),
        ];
        if let Some(passphrase) = self.passphrase() {
            params.push(("passphrase", passphrase));
        }
        params.sort_by_key(|(key, _)| *key);

        let base = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, pf_urlencode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{:x}", md5::compute(base.as_bytes()))
    }

    async fn api_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> PaymentResult<Option<Value>> {
        let merchant_id = self.require_credential("merchant_id")?.to_string();
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string();
        let signature = self.api_signature(&merchant_id, &timestamp);

        let mut url = format!("{}{}", API_BASE_URL, path);
        if self.config.test_mode {
            url.push_str(if url.contains('?') { "&testing=true" } else { "?testing=true" });
        }

        let mut last_error: Option<PaymentError> = None;
        for attempt in 0..=self.config.max_retries {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("merchant-id", &merchant_id)
                .header("version", "v1")
                .header("timestamp", &timestamp)
                .header("signature", &signature);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        let value = serde_json::from_str(&body).map_err(|e| {
                            PaymentError::Provider {
                                provider: ProviderName::PayFast,
                                message: format!("Invalid API response: {}", e),
                                retryable: false,
                            }
                        })?;
                        return Ok(Some(value));
                    }
                    if (status.is_server_error() || status.as_u16() == 429)
                        && attempt < self.config.max_retries
                    {
                        let backoff = 2_u64.pow(attempt);
                        warn!(
                            "PayFast API {} on {}, retrying after {}s (attempt {})",
                            status,
                            path,
                            backoff,
                            attempt + 1
                        );
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }
                    return Err(PaymentError::Transport {
                        provider: ProviderName::PayFast,
                        message: format!("HTTP {}: {}", status, body),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(PaymentError::from_reqwest(ProviderName::PayFast, e));
                    if attempt < self.config.max_retries {
                        let backoff = 2_u64.pow(attempt);
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::Transport {
            provider: ProviderName::PayFast,
            message: "Request failed after retries".to_string(),
            retryable: true,
        }))
    }
}

#[async_trait]
impl PaymentProvider for PayFastProvider {
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
        if self.initialized {
            return Ok(());
        }
        if !self.validate_credentials() {
            return Err(PaymentError::Configuration {
                provider: ProviderName::PayFast,
                message: "merchant_id and merchant_key are required".to_string(),
            });
        }
        self.initialized = true;
        info!(
            test_mode = self.config.test_mode,
            "PayFast provider initialized"
        );
        Ok(())
    }

    fn validate_credentials(&self) -> bool {
        self.config.credential("merchant_id").is_some()
            && self.config.credential("merchant_key").is_some()
    }

    async fn create_payment(&self, request: &PaymentRequest) -> PaymentResult<PaymentResponse> {
        self.ensure_initialized()?;
        if !self.supports_currency(request.amount.currency) {
            return Err(PaymentError::UnsupportedCurrency {
                provider: ProviderName::PayFast,
                currency: request.amount.currency.code().to_string(),
            });
        }
        self.validate_amount(request.amount.amount)?;

        let fields = self.build_payload(request)?;
        let signature = checkout_signature(&fields, self.passphrase());
        let form_html = self.render_form(&fields, &signature);

        info!(
            reference = %request.reference,
            amount = %request.amount.formatted,
            "PayFast checkout form generated"
        );

        // PayFast assigns its own payment id only at ITN time; until then
        // the merchant reference is the id.
        Ok(
            PaymentResponse::success(&request.reference, PaymentStatus::Pending, &request.reference)
                .with_metadata(json!({ "form_html": form_html })),
        )
    }

    async fn get_payment_status(&self, payment_id: &str) -> PaymentResult<PaymentStatus> {
        self.ensure_initialized()?;

        let response = self
            .api_request(
                reqwest::Method::GET,
                &format!("/process/query/{}", payment_id),
                None,
            )
            .await?;

        let Some(body) = response else {
            // Unknown payment: poll again later rather than failing
            debug!(payment_id, "PayFast query found no payment, mapping to PENDING");
            return Ok(PaymentStatus::Pending);
        };

        let vendor_status = body
            .pointer("/data/response/status_name")
            .or_else(|| body.pointer("/data/attributes/status_name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        Ok(map_vendor_status(vendor_status))
    }

    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: Option<&str>,
    ) -> PaymentResult<PaymentResponse> {
        self.ensure_initialized()?;

        let mut body = serde_json::Map::new();
        if let Some(amount) = amount {
            body.insert("amount".to_string(), json!(format!("{:.2}", amount)));
        }
        if let Some(reason) = reason {
            body.insert("reason".to_string(), json!(reason));
        }

        self.api_request(
            reqwest::Method::POST,
            &format!("/refunds/v1/{}", payment_id),
            Some(&Value::Object(body)),
        )
        .await?
        .ok_or(PaymentError::Provider {
            provider: ProviderName::PayFast,
            message: format!("Refund target {} not found", payment_id),
            retryable: false,
        })?;

        let status = if amount.is_some() {
            PaymentStatus::PartiallyRefunded
        } else {
            PaymentStatus::Refunded
        };
        info!(payment_id, %status, "PayFast refund submitted");
        Ok(PaymentResponse::success(payment_id, status, payment_id))
    }

    /// ITN verification: recompute the MD5 signature over the pairs in the
    /// order they were received, excluding the `signature` field itself.
    fn verify_webhook(
        &self,
        payload: &str,
        signature: Option<&str>,
        _headers: &http::HeaderMap,
    ) -> bool {
        let pairs = parse_form_pairs(payload);
        let provided = signature
            .map(str::to_string)
            .or_else(|| {
                pairs
                    .iter()
                    .find(|(key, _)| key == "signature")
                    .map(|(_, value)| value.clone())
            });
        let Some(provided) = provided else {
            warn!("PayFast ITN without signature field rejected");
            return false;
        };

        let without_signature: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(key, _)| key != "signature")
            .collect();
        let base = without_signature
            .iter()
            .map(|(key, value)| format!("{}={}", key, pf_urlencode(value)))
            .collect::<Vec<_>>()
            .join("&");
        let base = match self.passphrase() {
            Some(passphrase) => format!("{}&passphrase={}", base, pf_urlencode(passphrase)),
            None => base,
        };
        let expected = format!("{:x}", md5::compute(base.as_bytes()));

        utils::constant_time_eq(expected.as_bytes(), provided.trim().as_bytes())
    }

    /// ITN bodies are URL-encoded forms; expose them as a JSON object with
    /// the event derived from `payment_status`.
    fn parse_webhook_event(&self, payload: &str) -> PaymentResult<(String, Value)> {
        let pairs = parse_form_pairs(payload);
        if pairs.is_empty() {
            return Err(PaymentError::MalformedWebhook {
                message: "Empty ITN body".to_string(),
            });
        }
        let mut data = serde_json::Map::with_capacity(pairs.len());
        let mut event = "payment.update".to_string();
        for (key, value) in pairs {
            if key == "payment_status" {
                event = format!("payment.{}", value.to_ascii_lowercase());
            }
            data.insert(key, Value::String(value));
        }
        Ok((event, Value::Object(data)))
    }

    async fn process_webhook(
        &self,
        webhook: &PaymentWebhook,
        store: &dyn OrderStore,
    ) -> PaymentResult<()> {
        if !webhook.verified {
            return Err(PaymentError::WebhookVerification {
                provider: ProviderName::PayFast,
            });
        }

        let data = &webhook.data;
        let order_id = data
            .get("custom_str1")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::MalformedWebhook {
                message: "ITN missing custom_str1 (order id)".to_string(),
            })?;
        let vendor_status = data
            .get("payment_status")
            .and_then(Value::as_str)
            .unwrap_or("");
        let status = map_vendor_status(vendor_status);
        let payment_id = data
            .get("pf_payment_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        info!(
            order_id,
            vendor_status, %status,
            "Processing PayFast ITN"
        );

        store
            .update_order_status(OrderStatusUpdate {
                order_id: order_id.to_string(),
                payment_status: status,
                provider: ProviderName::PayFast,
                payment_id,
            })
            .await
    }
}

/// MD5 signature over the checkout fields: `key=urlencoded(value)` joined
/// with `&` in field order, with the passphrase appended when configured.
fn checkout_signature(fields: &[(&'static str, String)], passphrase: Option<&str>) -> String {
    let mut base = fields
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", key, pf_urlencode(value)))
        .collect::<Vec<_>>()
        .join("&");
    if let Some(passphrase) = passphrase {
        base.push_str(&format!("&passphrase={}", pf_urlencode(passphrase)));
    }
    format!("{:x}", md5::compute(base.as_bytes()))
}

/// Map the PayFast ITN status vocabulary onto the standard lifecycle.
/// Unknown strings map to PENDING so a vendor vocabulary change degrades
/// to re-polling instead of false failure.
pub(crate) fn map_vendor_status(status: &str) -> PaymentStatus {
    match status.to_ascii_uppercase().as_str() {
        "COMPLETE" | "COMPLETED" | "PAID" => PaymentStatus::Completed,
        "PROCESSING" => PaymentStatus::Processing,
        "PENDING" | "" => PaymentStatus::Pending,
        "FAILED" => PaymentStatus::Failed,
        "CANCELLED" | "USER_CANCELLED" => PaymentStatus::Cancelled,
        "EXPIRED" => PaymentStatus::Expired,
        "REFUNDED" => PaymentStatus::Refunded,
        "PARTIALLY_REFUNDED" => PaymentStatus::PartiallyRefunded,
        "CHARGEBACK" | "DISPUTED" => PaymentStatus::Disputed,
        other => {
            warn!(vendor_status = other, "Unknown PayFast status, mapping to PENDING");
            PaymentStatus::Pending
        }
    }
}

/// Parse a URL-encoded form body into decoded pairs, preserving order.
pub(crate) fn parse_form_pairs(payload: &str) -> Vec<(String, String)> {
    payload
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (pf_urldecode(key), pf_urldecode(value))
        })
        .collect()
}

/// PHP-style urlencode as PayFast computes it: space becomes `+`, hex
/// digits uppercased, `-_.` left bare.
pub(crate) fn pf_urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
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

pub(crate) fn pf_urldecode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let hex = [bytes[i + 1], bytes[i + 2]];
                let digits = std::str::from_utf8(&hex).unwrap_or("00");
                out.push(u8::from_str_radix(digits, 16).unwrap_or(b'%'));
                i += 3;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
