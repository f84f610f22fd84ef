use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::api::AppState;
use crate::payments::types::{
    Currency, PaymentAmount, PaymentCustomer, PaymentItem, PaymentMetadata, PaymentMethod,
    PaymentRequest, PaymentResponse, PaymentStatus, ProviderName,
};
use crate::payments::utils;

/// Inbound checkout payload. The reference is optional; one is generated
/// when the storefront does not supply its own.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub reference: Option<String>,
    pub amount: Decimal,
    pub currency: Currency,
    pub customer: PaymentCustomer,
    #[serde(default)]
    pub items: Vec<PaymentItem>,
    pub metadata: PaymentMetadata,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
    pub preferred_methods: Option<Vec<PaymentMethod>>,
    /// Pin a specific provider instead of letting the manager choose
    pub provider: Option<ProviderName>,
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentBody>,
) -> (StatusCode, Json<PaymentResponse>) {
    let reference = body
        .reference
        .clone()
        .unwrap_or_else(|| utils::generate_reference("ord"));

    let amount = match PaymentAmount::new(body.amount, body.currency) {
        Ok(amount) => amount,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(PaymentResponse::failure(reference, &e)),
            )
        }
    };

    let request = PaymentRequest {
        reference,
        amount,
        customer: body.customer,
        items: body.items,
        metadata: body.metadata,
        return_url: body.return_url,
        cancel_url: body.cancel_url,
        notify_url: body.notify_url,
        expires_at: None,
        preferred_methods: body.preferred_methods,
    };

    let response = state.manager.create_payment(&request, body.provider).await;
    let status = if response.success {
        StatusCode::OK
    } else if response
        .error
        .as_ref()
        .map(|e| e.retryable)
        .unwrap_or(false)
    {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(response))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub terminal: bool,
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path((provider, payment_id)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let provider: ProviderName = provider.parse().map_err(|_| StatusCode::NOT_FOUND)?;

    let status = state
        .manager
        .get_payment_status(provider, &payment_id)
        .await
        .map_err(|e| {
            if e.is_retryable() {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::NOT_FOUND
            }
        })?;

    Ok(Json(StatusResponse {
        payment_id,
        terminal: status.is_terminal(),
        status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path((provider, payment_id)): Path<(String, String)>,
    Json(body): Json<RefundBody>,
) -> Result<(StatusCode, Json<PaymentResponse>), StatusCode> {
    let provider: ProviderName = provider.parse().map_err(|_| StatusCode::NOT_FOUND)?;

    info!(%provider, payment_id, amount = ?body.amount, "Refund requested");
    let response = state
        .manager
        .refund_payment(provider, &payment_id, body.amount, body.reason.as_deref())
        .await;

    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct FeeQuery {
    pub amount: Decimal,
}

#[derive(Serialize)]
pub struct FeeQuotes {
    pub amount: Decimal,
    pub fees: HashMap<ProviderName, Decimal>,
}

/// Fee comparison across available providers; display-only.
pub async fn fee_quotes(
    State(state): State<AppState>,
    Query(query): Query<FeeQuery>,
) -> Json<FeeQuotes> {
    Json(FeeQuotes {
        amount: query.amount,
        fees: state.manager.calculate_fees(query.amount),
    })
}
