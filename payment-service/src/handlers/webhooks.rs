use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::WebhookAck,
    services::reconciliation::WebhookEvent,
    AppState,
};

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe webhook endpoint.
///
/// Signature verification happens in front of this service; the header must
/// still be present. Once the event parses it is always acknowledged, so
/// store or queue trouble never triggers a Stripe redelivery.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if !headers.contains_key(STRIPE_SIGNATURE_HEADER) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Missing stripe-signature header"
        )));
    }

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Rejecting malformed webhook payload");
        AppError::BadRequest(anyhow::anyhow!("Webhook Error: {}", e))
    })?;

    let report = state.pipeline.process(&event).await;

    let failed: Vec<&str> = report
        .steps
        .iter()
        .filter(|(_, outcome)| outcome.is_failed())
        .map(|(step, _)| step.as_str())
        .collect();
    if !failed.is_empty() {
        tracing::warn!(
            event_type = %report.event_type,
            payment_reference = ?report.payment_reference,
            failed_steps = ?failed,
            "Webhook acknowledged with failed side effects"
        );
    }

    Ok(Json(WebhookAck { received: true }))
}
