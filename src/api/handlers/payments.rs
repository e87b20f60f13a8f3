use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::{
    api::state::AppState,
    error::{AppError, Result},
    service::WebhookOutcome,
};

/// Platform webhook. Anything past signature verification is acknowledged,
/// whether or not it changed a record; store failures answer 500 so the
/// platform redelivers.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    match state
        .service_context
        .webhook_service
        .handle_webhook(&body, signature)
        .await?
    {
        WebhookOutcome::Processed => {}
        WebhookOutcome::Duplicate => {
            tracing::debug!("Webhook redelivery acknowledged without changes");
        }
    }

    Ok(Json(json!({ "received": true })))
}
