//! Yoco payment provider implementation
//!
//! Hosted-checkout API gateway: payment creation is an authenticated JSON
//! POST that returns a redirect URL. Every create and refund call carries a
//! UUIDv4 idempotency key so client retries cannot double-charge. Amounts
//! cross the wire in minor units (cents).

use async_trait::async_trait;
use base64::Engine;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PaymentConfig;
use crate::error::{PaymentError, PaymentResult};
use crate::orders::{OrderStatusUpdate, OrderStore};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    PaymentRequest, PaymentResponse, PaymentStatus, PaymentWebhook, ProviderName,
};
use crate::payments::utils;

const API_BASE_URL: &str = "https://payments.yoco.com/api";

/// Maximum allowed skew between the webhook timestamp header and now
const WEBHOOK_TOLERANCE_SECS: i64 = 180;

pub struct YocoProvider {
    config: PaymentConfig,
    client: reqwest::Client,
    initialized: bool,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    id: String,
    #[serde(rename = "redirectUrl")]
    redirect_url: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    #[serde(rename = "refundId")]
    refund_id: Option<String>,
    id: Option<String>,
    status: Option<String>,
}

impl YocoProvider {
    pub fn new(config: PaymentConfig) -> PaymentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::Configuration {
                provider: ProviderName::Yoco,
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            client,
            initialized: false,
        })
    }

    fn secret_key(&self) -> PaymentResult<&str> {
        self.config
            .credential("secret_key")
            .ok_or_else(|| PaymentError::Configuration {
                provider: ProviderName::Yoco,
                message: "Missing credential 'secret_key'".to_string(),
            })
    }

    /// Webhook signing secret, `whsec_`-prefixed base64. Verification fails
    /// closed when it is not configured.
    fn webhook_secret_bytes(&self) -> Option<Vec<u8>> {
        let secret = self.config.credential("webhook_secret")?;
        let trimmed = secret.strip_prefix("whsec_").unwrap_or(secret);
        base64::engine::general_purpose::STANDARD.decode(trimmed).ok()
    }

    /// Authenticated JSON request with retry on 429/5xx and an idempotency
    /// key when the operation mutates vendor state.
    async fn api_request<T>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        idempotency_key: Option<&str>,
    ) -> PaymentResult<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", API_BASE_URL, path);
        let secret_key = self.secret_key()?.to_string();

        let mut last_error: Option<PaymentError> = None;
        for attempt in 0..=self.config.max_retries {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bearer {}", secret_key))
                .header("Content-Type", "application/json");
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str(&text)
                            .map(Some)
                            .map_err(|e| PaymentError::Provider {
                                provider: ProviderName::Yoco,
                                message: format!("Invalid response format: {}", e),
                                retryable: false,
                            });
                    }
                    if (status.is_server_error() || status.as_u16() == 429)
                        && attempt < self.config.max_retries
                    {
                        let backoff = 2_u64.pow(attempt);
                        warn!(
                            "Yoco API {} on {}, retrying after {}s (attempt {})",
                            status,
                            path,
                            backoff,
                            attempt + 1
                        );
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }
                    let message = serde_json::from_str::<Value>(&text)
                        .ok()
                        .and_then(|v| {
                            v.get("message")
                                .or_else(|| v.pointer("/error/message"))
                                .and_then(Value::as_str)
                                .map(str::to_string)
                        })
                        .unwrap_or_else(|| format!("HTTP {}: {}", status, text));
                    return Err(PaymentError::Provider {
                        provider: ProviderName::Yoco,
                        message,
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(PaymentError::from_reqwest(ProviderName::Yoco, e));
                    if attempt < self.config.max_retries {
                        let backoff = 2_u64.pow(attempt);
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::Transport {
            provider: ProviderName::Yoco,
            message: "Request failed after retries".to_string(),
            retryable: true,
        }))
    }
}

#[async_trait]
impl PaymentProvider for YocoProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Yoco
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
                provider: ProviderName::Yoco,
                message: "secret_key is required".to_string(),
            });
        }
        if self.config.credential("webhook_secret").is_none() {
            warn!("Yoco webhook_secret not configured; inbound webhooks will be rejected");
        }
        self.initialized = true;
        info!(test_mode = self.config.test_mode, "Yoco provider initialized");
        Ok(())
    }

    fn validate_credentials(&self) -> bool {
        self.config.credential("secret_key").is_some()
    }

    async fn create_payment(&self, request: &PaymentRequest) -> PaymentResult<PaymentResponse> {
        self.ensure_initialized()?;
        if !self.supports_currency(request.amount.currency) {
            return Err(PaymentError::UnsupportedCurrency {
                provider: ProviderName::Yoco,
                currency: request.amount.currency.code().to_string(),
            });
        }
        self.validate_amount(request.amount.amount)?;

        // Minor units, rounded at the shared conversion boundary
        let amount_cents = utils::to_minor_units(request.amount.amount);

        let mut metadata = json!({
            "order_id": request.metadata.order_id,
            "customer_id": request.metadata.customer_id,
            "reference": request.reference,
        });
        for (key, value) in &request.metadata.extra {
            metadata[key] = Value::String(value.clone());
        }

        let body = json!({
            "amount": amount_cents,
            "currency": request.amount.currency.code(),
            "successUrl": request.return_url,
            "cancelUrl": request.cancel_url,
            "failureUrl": request.cancel_url,
            "externalId": request.reference,
            "metadata": metadata,
        });

        // Fresh idempotency key per creation attempt; vendor-enforced
        // exactly-once on retry of the same key.
        let idempotency_key = uuid::Uuid::new_v4().to_string();

        info!(
            reference = %request.reference,
            amount_cents,
            "Creating Yoco checkout"
        );

        let checkout: CheckoutResponse = self
            .api_request(reqwest::Method::POST, "/checkouts", Some(&body), Some(&idempotency_key))
            .await?
            .ok_or(PaymentError::Provider {
                provider: ProviderName::Yoco,
                message: "Checkout endpoint returned not found".to_string(),
                retryable: false,
            })?;

        let redirect_url = checkout.redirect_url.ok_or(PaymentError::Provider {
            provider: ProviderName::Yoco,
            message: "Checkout created without a redirect URL".to_string(),
            retryable: false,
        })?;
        let status = checkout
            .status
            .as_deref()
            .map(map_vendor_status)
            .unwrap_or(PaymentStatus::Pending);

        Ok(
            PaymentResponse::success(checkout.id, status, &request.reference)
                .with_redirect_url(redirect_url),
        )
    }

    async fn get_payment_status(&self, payment_id: &str) -> PaymentResult<PaymentStatus> {
        self.ensure_initialized()?;

        let checkout: Option<CheckoutResponse> = self
            .api_request(
                reqwest::Method::GET,
                &format!("/checkouts/{}", payment_id),
                None,
                None,
            )
            .await?;

        match checkout {
            Some(checkout) => Ok(checkout
                .status
                .as_deref()
                .map(map_vendor_status)
                .unwrap_or(PaymentStatus::Pending)),
            None => {
                debug!(payment_id, "Yoco checkout not found, mapping to PENDING");
                Ok(PaymentStatus::Pending)
            }
        }
    }

    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: Option<&str>,
    ) -> PaymentResult<PaymentResponse> {
        self.ensure_initialized()?;

        let mut body = json!({});
        if let Some(amount) = amount {
            body["amount"] = json!(utils::to_minor_units(amount));
        }
        if let Some(reason) = reason {
            body["reason"] = json!(reason);
        }

        let idempotency_key = uuid::Uuid::new_v4().to_string();
        let refund: RefundResponse = self
            .api_request(
                reqwest::Method::POST,
                &format!("/checkouts/{}/refund", payment_id),
                Some(&body),
                Some(&idempotency_key),
            )
            .await?
            .ok_or(PaymentError::Provider {
                provider: ProviderName::Yoco,
                message: format!("Refund target {} not found", payment_id),
                retryable: false,
            })?;

        let status = if amount.is_some() {
            PaymentStatus::PartiallyRefunded
        } else {
            PaymentStatus::Refunded
        };
        let refund_id = refund
            .refund_id
            .or(refund.id)
            .unwrap_or_else(|| payment_id.to_string());
        info!(payment_id, refund_id = %refund_id, vendor_status = ?refund.status, "Yoco refund submitted");

        Ok(PaymentResponse::success(refund_id, status, payment_id))
    }

    /// Verify the signed webhook headers: HMAC-SHA256 over
    /// `{webhook-id}.{webhook-timestamp}.{raw body}` with the decoded
    /// signing secret, compared constant-time against each `v1,` entry.
    /// Fails closed on missing secret, headers or stale timestamp.
    fn verify_webhook(
        &self,
        payload: &str,
        signature: Option<&str>,
        headers: &http::HeaderMap,
    ) -> bool {
        let Some(secret) = self.webhook_secret_bytes() else {
            warn!("Yoco webhook rejected: no webhook_secret configured");
            return false;
        };

        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let Some(webhook_id) = header_value("webhook-id") else {
            warn!("Yoco webhook rejected: missing webhook-id header");
            return false;
        };
        let Some(timestamp) = header_value("webhook-timestamp") else {
            warn!("Yoco webhook rejected: missing webhook-timestamp header");
            return false;
        };
        let provided = signature
            .map(str::to_string)
            .or_else(|| header_value("webhook-signature"));
        let Some(provided) = provided else {
            warn!("Yoco webhook rejected: missing webhook-signature header");
            return false;
        };

        // Replay window check
        let Ok(timestamp_secs) = timestamp.parse::<i64>() else {
            return false;
        };
        let skew = (chrono::Utc::now().timestamp() - timestamp_secs).abs();
        if skew > WEBHOOK_TOLERANCE_SECS {
            warn!(skew, "Yoco webhook rejected: timestamp outside tolerance");
            return false;
        }

        let signed_content = format!("{}.{}.{}", webhook_id, timestamp, payload);
        let expected = base64::engine::general_purpose::STANDARD
            .encode(utils::hmac_sha256_raw(signed_content.as_bytes(), &secret));

        // Header carries space-separated `v1,<base64>` entries
        provided.split_whitespace().any(|entry| {
            let candidate = entry.strip_prefix("v1,").unwrap_or(entry);
            utils::constant_time_eq(expected.as_bytes(), candidate.as_bytes())
        })
    }

    fn parse_webhook_event(&self, payload: &str) -> PaymentResult<(String, Value)> {
        let data: Value =
            serde_json::from_str(payload).map_err(|e| PaymentError::MalformedWebhook {
                message: format!("Invalid JSON event: {}", e),
            })?;
        let event = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok((event, data))
    }

    async fn process_webhook(
        &self,
        webhook: &PaymentWebhook,
        store: &dyn OrderStore,
    ) -> PaymentResult<()> {
        if !webhook.verified {
            return Err(PaymentError::WebhookVerification {
                provider: ProviderName::Yoco,
            });
        }

        let payload = webhook.data.get("payload").unwrap_or(&webhook.data);
        let order_id = payload
            .pointer("/metadata/order_id")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::MalformedWebhook {
                message: "Yoco event missing metadata.order_id".to_string(),
            })?;
        let payment_id = payload.get("id").and_then(Value::as_str).map(str::to_string);

        // Event type is authoritative; the payload status is the fallback
        let status = match webhook.event.as_str() {
            "payment.succeeded" | "checkout.succeeded" => PaymentStatus::Completed,
            "payment.failed" | "checkout.failed" => PaymentStatus::Failed,
            "payment.cancelled" => PaymentStatus::Cancelled,
            "refund.succeeded" => PaymentStatus::Refunded,
            _ => payload
                .get("status")
                .and_then(Value::as_str)
                .map(map_vendor_status)
                .unwrap_or(PaymentStatus::Pending),
        };

        info!(order_id, event = %webhook.event, %status, "Processing Yoco webhook");

        store
            .update_order_status(OrderStatusUpdate {
                order_id: order_id.to_string(),
                payment_status: status,
                provider: ProviderName::Yoco,
                payment_id,
            })
            .await
    }
}

/// Case-insensitive mapping of Yoco status vocabulary to the standard
/// lifecycle. Unknown strings map to PENDING: better to poll again than to
/// falsely mark a payment failed.
pub(crate) fn map_vendor_status(status: &str) -> PaymentStatus {
    match status.to_ascii_lowercase().as_str() {
        "created" | "pending" | "" => PaymentStatus::Pending,
        "processing" | "started" => PaymentStatus::Processing,
        "authorized" => PaymentStatus::Authorized,
        "succeeded" | "successful" | "completed" | "complete" => PaymentStatus::Completed,
        "failed" | "error" => PaymentStatus::Failed,
        "cancelled" | "canceled" => PaymentStatus::Cancelled,
        "expired" => PaymentStatus::Expired,
        "refunded" => PaymentStatus::Refunded,
        "partially_refunded" => PaymentStatus::PartiallyRefunded,
        "disputed" | "chargeback" => PaymentStatus::Disputed,
        other => {
            warn!(vendor_status = other, "Unknown Yoco status, mapping to PENDING");
            PaymentStatus::Pending
        }
    }
}
