//! Order store collaborator
//!
//! The payment layer's only shared mutable resource. It exposes exactly one
//! operation, a single-row status update keyed by order id. Webhook-driven
//! updates are idempotent upserts, never strictly-ordered-after-creation
//! events: a vendor callback may land before the create response is
//! processed by the caller.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use crate::error::{PaymentError, PaymentResult};
use crate::payments::types::{PaymentStatus, ProviderName};

/// One status update for an order, keyed by the metadata join keys
#[derive(Debug, Clone)]
pub struct OrderStatusUpdate {
    pub order_id: String,
    pub payment_status: PaymentStatus,
    pub provider: ProviderName,
    /// Vendor-side payment id, when known
    pub payment_id: Option<String>,
}

/// Narrow write-only contract to the order persistence layer
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn update_order_status(&self, update: OrderStatusUpdate) -> PaymentResult<()>;
}

/// Postgres-backed order store
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn update_order_status(&self, update: OrderStatusUpdate) -> PaymentResult<()> {
        // Terminal states never regress; the WHERE clause makes replayed
        // webhooks a no-op instead of an error.
        let result = sqlx::query(
            "UPDATE orders
             SET payment_status = $2,
                 payment_provider = $3,
                 payment_id = COALESCE($4, payment_id),
                 is_paid = ($2 = 'COMPLETED'),
                 updated_at = NOW()
             WHERE id = $1
               AND payment_status NOT IN ('FAILED', 'CANCELLED', 'EXPIRED', 'REFUNDED')",
        )
        .bind(&update.order_id)
        .bind(update.payment_status.to_string())
        .bind(update.provider.as_str())
        .bind(&update.payment_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            warn!(
                order_id = %update.order_id,
                status = %update.payment_status,
                "Order status update matched no row (missing order or terminal state)"
            );
        }
        Ok(())
    }
}

fn store_error(err: sqlx::Error) -> PaymentError {
    let retryable = matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    );
    PaymentError::Store {
        message: err.to_string(),
        retryable,
    }
}
