//! Transaction handlers: store-backed reads plus Stripe listing and sync.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        DataResponse, ListTransactionsQuery, Pagination, StripeListQuery, StripeListResponse,
        SyncQuery, TransactionListResponse,
    },
    models::Transaction,
    services::SyncReport,
    AppState,
};

/// Unknown statuses or non-numeric paging fail in the JSON error envelope.
fn bad_query(rejection: QueryRejection) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(rejection.body_text()))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    query: Result<Query<ListTransactionsQuery>, QueryRejection>,
) -> Result<Json<TransactionListResponse>, AppError> {
    let Query(query) = query.map_err(bad_query)?;
    let filter = query.filter();

    let (data, total) = tokio::try_join!(state.store.list(&filter), state.store.count(&filter))?;

    Ok(Json(TransactionListResponse {
        success: true,
        data,
        pagination: Pagination::new(query.page(), query.limit(), total),
    }))
}

/// Lists intents straight from Stripe; the store is not consulted.
pub async fn list_stripe_transactions(
    State(state): State<AppState>,
    query: Result<Query<StripeListQuery>, QueryRejection>,
) -> Result<Json<StripeListResponse>, AppError> {
    let Query(query) = query.map_err(bad_query)?;
    let page = state.gateway.list_intents(query.limit()).await?;

    let data = page
        .data
        .into_iter()
        .filter(|intent| query.matches(intent))
        .collect();

    Ok(Json(StripeListResponse {
        success: true,
        data,
        has_more: page.has_more,
    }))
}

pub async fn sync_transactions(
    State(state): State<AppState>,
    query: Result<Query<SyncQuery>, QueryRejection>,
) -> Result<Json<DataResponse<SyncReport>>, AppError> {
    let Query(query) = query.map_err(bad_query)?;
    let limit = query.limit.unwrap_or(state.config.sync.page_limit);
    tracing::info!(limit, "Syncing transactions from Stripe");

    let report = state.sync.run(limit).await?;
    Ok(Json(DataResponse::new(report)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(payment_reference): Path<String>,
) -> Result<Json<DataResponse<Transaction>>, AppError> {
    let transaction = state
        .store
        .get(&payment_reference)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

    Ok(Json(DataResponse::new(transaction)))
}
