//! Provider registry and orchestration
//!
//! The manager owns the provider registry for the life of the process. It
//! is built once at startup, initializes all enabled providers in parallel
//! and is read-only afterwards; no locking is needed because nothing
//! mutates the registry post-init.
//!
//! No provider error ever propagates to callers: create/refund return a
//! structured [`PaymentResponse`], webhook processing returns a boolean,
//! fee quotes and health checks are total.

use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::error::{PaymentError, PaymentResult};
use crate::orders::OrderStore;
use crate::payments::providers::{payfast::PayFastProvider, yoco::YocoProvider};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{
    PaymentMethod, PaymentRequest, PaymentResponse, PaymentStatus, PaymentWebhook, ProviderName,
};
use crate::payments::utils;

/// Deterministic selection order when several providers qualify.
/// This is not cost-optimizing; fee comparison is a display concern.
const PROVIDER_PRIORITY: &[ProviderName] = &[ProviderName::PayFast, ProviderName::Yoco];

pub struct PaymentManager {
    providers: HashMap<ProviderName, Box<dyn PaymentProvider>>,
    store: Arc<dyn OrderStore>,
}

fn build_provider(config: PaymentConfig) -> PaymentResult<Box<dyn PaymentProvider>> {
    Ok(match config.provider {
        ProviderName::PayFast => Box::new(PayFastProvider::new(config)?),
        ProviderName::Yoco => Box::new(YocoProvider::new(config)?),
    })
}

impl PaymentManager {
    /// Build the registry from config: one provider per enabled entry,
    /// initialized concurrently. A provider that fails to initialize is
    /// logged and left out; partial availability beats total failure.
    pub async fn initialize(configs: Vec<PaymentConfig>, store: Arc<dyn OrderStore>) -> Self {
        let mut join_set: JoinSet<(ProviderName, PaymentResult<Box<dyn PaymentProvider>>)> =
            JoinSet::new();

        for config in configs {
            let name = config.provider;
            if !config.enabled {
                info!(provider = %name, "Provider disabled, skipping");
                continue;
            }
            join_set.spawn(async move {
                let result = async {
                    let mut provider = build_provider(config)?;
                    provider.initialize().await?;
                    Ok(provider)
                }
                .await;
                (name, result)
            });
        }

        let mut providers: HashMap<ProviderName, Box<dyn PaymentProvider>> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(provider))) => {
                    info!(provider = %name, "Payment provider registered");
                    providers.insert(name, provider);
                }
                Ok((name, Err(e))) => {
                    warn!(provider = %name, error = %e, "Provider initialization failed, omitting");
                }
                Err(e) => {
                    error!(error = %e, "Provider initialization task panicked, omitting");
                }
            }
        }

        info!(count = providers.len(), "Payment manager initialized");
        Self { providers, store }
    }

    /// Test/composition seam: registry from pre-built providers.
    pub fn with_providers(
        providers: Vec<Box<dyn PaymentProvider>>,
        store: Arc<dyn OrderStore>,
    ) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|provider| (provider.name(), provider))
                .collect(),
            store,
        }
    }

    /// Providers currently available; re-checked per call, never cached.
    pub fn get_available_providers(&self) -> Vec<ProviderName> {
        PROVIDER_PRIORITY
            .iter()
            .copied()
            .filter(|name| {
                self.providers
                    .get(name)
                    .map(|provider| provider.is_available())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Deterministic provider selection: filter by preferred methods when
    /// given (falling back to the full available set if that filter empties
    /// the list), then pick by fixed priority order.
    pub fn get_best_provider(
        &self,
        preferred_methods: Option<&[PaymentMethod]>,
    ) -> Option<ProviderName> {
        let available = self.get_available_providers();
        if available.is_empty() {
            return None;
        }

        let filtered: Vec<ProviderName> = match preferred_methods {
            Some(methods) if !methods.is_empty() => {
                let matching: Vec<ProviderName> = available
                    .iter()
                    .copied()
                    .filter(|name| {
                        let provider = &self.providers[name];
                        methods.iter().any(|method| provider.supports_method(*method))
                    })
                    .collect();
                if matching.is_empty() {
                    available
                } else {
                    matching
                }
            }
            _ => available,
        };

        // `filtered` preserves PROVIDER_PRIORITY order
        filtered.into_iter().next()
    }

    /// Create a payment. Never returns an error: every failure mode is a
    /// structured response, callers branch on `success`.
    pub async fn create_payment(
        &self,
        request: &PaymentRequest,
        provider: Option<ProviderName>,
    ) -> PaymentResponse {
        if let Err(e) = request.validate() {
            warn!(reference = %request.reference, error = %e, "Payment request failed validation");
            return PaymentResponse::failure(&request.reference, &e);
        }

        let selected = match provider.or_else(|| {
            self.get_best_provider(request.preferred_methods.as_deref())
        }) {
            Some(name) => name,
            None => {
                warn!(reference = %request.reference, "No payment provider available");
                return PaymentResponse::failure(&request.reference, &PaymentError::NoProviderAvailable);
            }
        };

        let Some(provider) = self.providers.get(&selected).filter(|p| p.is_available()) else {
            warn!(provider = %selected, "Requested provider not available");
            return PaymentResponse::failure(&request.reference, &PaymentError::NoProviderAvailable);
        };

        info!(
            provider = %selected,
            reference = %request.reference,
            amount = %request.amount.formatted,
            order_id = %request.metadata.order_id,
            "Dispatching payment creation"
        );

        match provider.create_payment(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(provider = %selected, reference = %request.reference, error = %e,
                    "Payment creation failed");
                PaymentResponse::failure(&request.reference, &e)
            }
        }
    }

    /// Current status of a payment. The Err side is a structured,
    /// code-carrying value; nothing panics or escapes untyped.
    pub async fn get_payment_status(
        &self,
        provider: ProviderName,
        payment_id: &str,
    ) -> PaymentResult<PaymentStatus> {
        let provider = self.resolve(provider)?;
        provider.get_payment_status(payment_id).await
    }

    /// Refund a payment, full or partial. Same never-throw contract as
    /// [`create_payment`](Self::create_payment).
    pub async fn refund_payment(
        &self,
        provider: ProviderName,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: Option<&str>,
    ) -> PaymentResponse {
        let resolved = match self.resolve(provider) {
            Ok(resolved) => resolved,
            Err(e) => return PaymentResponse::failure(payment_id, &e),
        };
        match resolved.refund_payment(payment_id, amount, reason).await {
            Ok(response) => response,
            Err(e) => {
                error!(provider = %provider, payment_id, error = %e, "Refund failed");
                PaymentResponse::failure(payment_id, &e)
            }
        }
    }

    /// Verify and dispatch an inbound webhook. Returns the boolean the
    /// HTTP layer maps to 2xx/non-2xx for vendor retry semantics; this is
    /// reached from a public unauthenticated endpoint and must never
    /// crash the handler.
    pub async fn process_webhook(
        &self,
        provider: ProviderName,
        payload: &str,
        signature: Option<&str>,
        headers: &http::HeaderMap,
    ) -> bool {
        let Some(resolved) = self.providers.get(&provider) else {
            warn!(provider = %provider, "Webhook for unknown provider rejected");
            return false;
        };
        if !resolved.is_available() {
            warn!(provider = %provider, "Webhook for unavailable provider rejected");
            return false;
        }

        if !resolved.verify_webhook(payload, signature, headers) {
            warn!(provider = %provider, "Webhook signature verification failed");
            return false;
        }

        let (event, data) = match resolved.parse_webhook_event(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(provider = %provider, error = %e, "Verified webhook failed to parse");
                return false;
            }
        };

        info!(
            provider = %provider,
            event = %event,
            data = %utils::sanitize_for_logging(&data),
            "Webhook verified"
        );

        // `verified` is set only here, after signature validation
        let webhook = PaymentWebhook {
            id: Uuid::new_v4(),
            provider,
            event,
            data,
            signature: signature.map(str::to_string),
            timestamp: chrono::Utc::now(),
            verified: true,
        };

        match resolved.process_webhook(&webhook, self.store.as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                error!(provider = %provider, error = %e, "Webhook processing failed");
                false
            }
        }
    }

    /// Fee quote per available provider, for comparison displays. Total:
    /// a provider with unusable fee settings quotes 0 instead of failing.
    pub fn calculate_fees(&self, amount: Decimal) -> HashMap<ProviderName, Decimal> {
        self.get_available_providers()
            .into_iter()
            .map(|name| {
                let fee = self
                    .providers
                    .get(&name)
                    .map(|provider| provider.calculate_fees(amount))
                    .unwrap_or(Decimal::ZERO);
                (name, fee)
            })
            .collect()
    }

    /// Availability snapshot across the whole registry, including
    /// providers that are registered but currently unavailable.
    pub fn health_check(&self) -> HashMap<ProviderName, bool> {
        PROVIDER_PRIORITY
            .iter()
            .map(|name| {
                let healthy = self
                    .providers
                    .get(name)
                    .map(|provider| provider.is_available())
                    .unwrap_or(false);
                (*name, healthy)
            })
            .collect()
    }

    /// Summary used by the health endpoint.
    pub fn describe(&self) -> serde_json::Value {
        json!({
            "registered": self.providers.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            "available": self.get_available_providers(),
        })
    }

    fn resolve(&self, name: ProviderName) -> PaymentResult<&dyn PaymentProvider> {
        let provider = self
            .providers
            .get(&name)
            .ok_or_else(|| PaymentError::UnknownProvider {
                provider: name.to_string(),
            })?;
        if !provider.is_available() {
            return Err(PaymentError::NoProviderAvailable);
        }
        Ok(provider.as_ref())
    }
}
