use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use tracing::info;

use crate::api::AppState;
use crate::payments::types::ProviderName;

/// Vendor webhook endpoint. The body stays a raw string so providers can
/// recompute signatures over exactly the bytes the vendor signed; parsing
/// happens only after verification. The manager's boolean maps to
/// 200/400, which is what drives vendor retry behavior.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let Ok(provider) = provider.parse::<ProviderName>() else {
        return StatusCode::NOT_FOUND;
    };

    info!(%provider, bytes = body.len(), "Webhook received");

    if state
        .manager
        .process_webhook(provider, &body, None, &headers)
        .await
    {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}
