use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::auth::{authenticate, require_admin};
use crate::errors::AppError;
use crate::models::{BookingStatus, BookingSummary, PaymentStatus, RevenueSummary, Role};
use crate::services::booking;
use crate::services::reconciliation::PaymentState;
use crate::services::reporting::{self, RevenueFilter};
use crate::state::AppState;

// GET /api/admin/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<BookingSummary>>, AppError> {
    require_admin(&state, &headers).await?;
    Ok(Json(reporting::list_bookings_for_admin(&state).await?))
}

// POST /api/admin/bookings/:id/status
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub status: BookingStatus,
    pub payment_status: Option<PaymentStatus>,
}

pub async fn override_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<OverrideRequest>,
) -> Result<Json<PaymentState>, AppError> {
    let admin = require_admin(&state, &headers).await?;
    let booking =
        booking::admin_override(&state, &id, body.status, body.payment_status, &admin).await?;
    Ok(Json(PaymentState::from(&booking)))
}

// GET /api/admin/revenue
pub async fn revenue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(mut filter): Query<RevenueFilter>,
) -> Result<Json<RevenueSummary>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    match caller.role {
        Role::Admin => {}
        // partners only ever see their own listings
        Role::Partner => filter.partner_id = Some(caller.uid.clone()),
        Role::Customer => return Err(AppError::Forbidden),
    }

    Ok(Json(reporting::compute_revenue_summary(&state, &filter).await?))
}
