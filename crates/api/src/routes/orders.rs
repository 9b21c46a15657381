//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{CreateOrder, Order};
use saga::PaymentGateway;

use super::parse_id;
use crate::error::ApiError;
use crate::{AppState, SagaLedger};

/// POST /orders: validate, resolve the user, persist and publish `order.created`.
#[tracing::instrument(skip(state, body))]
pub async fn create<L: SagaLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<L, G>>>,
    body: Result<Json<CreateOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let order = state.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: every order, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list<L: SagaLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<L, G>>>,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders.find_all().await?))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<L: SagaLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<L, G>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id: OrderId = parse_id("Order", &id)?;
    Ok(Json(state.orders.find_one(id).await?))
}
