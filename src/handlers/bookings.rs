use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use super::auth::{authenticate, optional_identity, require_admin};
use crate::errors::AppError;
use crate::models::{Booking, BookingSummary};
use crate::services::booking::{self, CreatedBooking, NewBooking, VehicleBookingRequest};
use crate::services::reconciliation::PaymentState;
use crate::services::reporting;
use crate::state::AppState;

// POST /api/bookings/vehicle
pub async fn create_vehicle_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<VehicleBookingRequest>,
) -> Result<Json<CreatedBooking>, AppError> {
    let caller = optional_identity(&state, &headers).await?;
    let created = booking::create_booking_and_initiate_payment(
        &state,
        NewBooking::Vehicle(body),
        caller.as_ref(),
    )
    .await?;
    Ok(Json(created))
}

// GET /api/bookings?id=
#[derive(Deserialize)]
pub struct BookingLookup {
    pub id: String,
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingLookup>,
) -> Result<Json<BookingSummary>, AppError> {
    require_admin(&state, &headers).await?;
    let summary = reporting::get_booking_for_admin(&state, &query.id).await?;
    Ok(Json(summary))
}

// GET /api/bookings/mine
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<BookingSummary>>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    Ok(Json(booking::list_my_bookings(&state, &caller).await?))
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PaymentState>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    let booking = booking::cancel_booking(&state, &id, &caller).await?;
    Ok(Json(PaymentState::from(&booking)))
}

// POST /api/bookings/:id/support
#[derive(Deserialize)]
pub struct SupportRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

pub async fn add_support_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SupportRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    let booking =
        booking::add_support_ticket(&state, &id, &caller, &body.kind, &body.message).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "supportTickets": booking.support_tickets,
    })))
}

fn status_event(booking: &Booking) -> Event {
    let data = serde_json::to_string(&PaymentState::from(booking)).unwrap_or_default();
    Event::default().event("status").data(data)
}

// GET /api/bookings/:id/events
pub async fn booking_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Subscribe before reading so no change between the two is lost
    let rx = state.store.subscribe();
    let current = booking::load_booking(&state, &id).await?;

    let collection = current.kind().collection();
    let booking_id = current.id.clone();

    let mut last_version = current.version;

    let live = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(change)
            if change.collection == collection
                && change.id == booking_id
                && change.version > last_version =>
        {
            last_version = change.version;
            change
                .data
                .and_then(|data| serde_json::from_value::<Booking>(data).ok())
                .map(|b| Ok::<_, Infallible>(status_event(&b)))
        }
        // Lagged receivers, stale versions and other documents are skipped
        _ => None,
    });

    let stream = tokio_stream::once(Ok::<_, Infallible>(status_event(&current))).chain(live);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
