//! Payment read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::PaymentId;
use domain::Payment;
use saga::PaymentGateway;

use super::parse_id;
use crate::error::ApiError;
use crate::{AppState, SagaLedger};

/// GET /payments
#[tracing::instrument(skip(state))]
pub async fn list<L: SagaLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<L, G>>>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    Ok(Json(state.payments.find_all_payments().await?))
}

/// GET /payments/{id}
#[tracing::instrument(skip(state))]
pub async fn get<L: SagaLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<L, G>>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id: PaymentId = parse_id("Payment", &id)?;
    Ok(Json(state.payments.find_by_id(id).await?))
}
