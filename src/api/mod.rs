//! HTTP surface for the payment layer
//!
//! Thin axum handlers: the checkout frontend and the vendor webhook
//! callbacks are external collaborators speaking the request/response
//! contract of the payments module.

pub mod health;
pub mod payments;
pub mod webhooks;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::payments::PaymentManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PaymentManager>,
    pub environment: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/payments", post(payments::create_payment))
        .route("/api/payments/fees", get(payments::fee_quotes))
        .route(
            "/api/payments/:provider/:payment_id/status",
            get(payments::payment_status),
        )
        .route(
            "/api/payments/:provider/:payment_id/refund",
            post(payments::refund_payment),
        )
        .route("/api/webhooks/:provider", post(webhooks::handle_webhook))
        .with_state(state)
}
