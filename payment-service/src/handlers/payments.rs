//! Stripe payment intent handlers.
//!
//! Pass-through to the payment gateway. Nothing here writes to the store;
//! transactions are recorded by the webhook pipeline once Stripe reports them.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::str::FromStr;
use validator::Validate;

use crate::{
    dtos::{
        CreatePaymentIntentRequest, CreatePaymentIntentResponse, DataResponse,
        IntentStatusView, PaymentConfigResponse, PaymentIntentView,
    },
    services::stripe::{CreateIntentParams, GatewayError},
    AppState,
};

pub async fn get_config(
    State(state): State<AppState>,
) -> Json<DataResponse<PaymentConfigResponse>> {
    Json(DataResponse::new(PaymentConfigResponse {
        publishable_key: state.config.stripe.publishable_key.clone(),
    }))
}

/// Create a payment intent for a USDC purchase.
///
/// The USDC amount is fixed here, at `amount × exchange_rate`, and travels
/// with the intent as metadata.
pub async fn create_payment_intent(
    State(state): State<AppState>,
    payload: Result<Json<CreatePaymentIntentRequest>, JsonRejection>,
) -> Result<Json<DataResponse<CreatePaymentIntentResponse>>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(anyhow::anyhow!(e.body_text())))?;
    payload.validate()?;

    let amount = Decimal::from_str(&payload.amount.to_string())
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid amount: {}", e)))?;
    let usdc_amount = (amount * state.config.usdc.exchange_rate).normalize();

    tracing::info!(
        amount = %amount,
        currency = %payload.currency,
        usdc_amount = %usdc_amount,
        "Creating payment intent"
    );

    let params = CreateIntentParams {
        amount: payload.amount,
        currency: payload.currency.clone(),
        customer_email: payload.customer_email.clone(),
        usdc_amount,
        wallet_address: state.config.usdc.wallet_address.clone(),
    };

    let intent = state
        .gateway
        .create_intent(&params)
        .await
        .map_err(|e| match e {
            GatewayError::Api { .. } => AppError::from(e),
            other => {
                tracing::error!(error = %other, "Failed to create payment intent");
                AppError::InternalError(anyhow::anyhow!("Failed to create payment intent: {}", other))
            }
        })?;

    Ok(Json(DataResponse::new(CreatePaymentIntentResponse {
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
        amount: payload.amount,
        usdc_amount,
    })))
}

pub async fn get_payment_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<PaymentIntentView>>, AppError> {
    let intent = state.gateway.retrieve_intent(&id).await?;
    Ok(Json(DataResponse::new(intent.into())))
}

pub async fn confirm_payment_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<IntentStatusView>>, AppError> {
    tracing::info!(payment_intent_id = %id, "Confirming payment intent");
    let intent = state.gateway.confirm_intent(&id).await?;
    Ok(Json(DataResponse::new(intent.into())))
}

pub async fn cancel_payment_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<IntentStatusView>>, AppError> {
    tracing::info!(payment_intent_id = %id, "Canceling payment intent");
    let intent = state.gateway.cancel_intent(&id).await?;
    Ok(Json(DataResponse::new(intent.into())))
}
