use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::db::{queries, StoreError};
use crate::errors::AppError;
use crate::models::booking::GUEST_USER_ID;
use crate::models::{
    Booking, BookingDetails, BookingStatus, BookingSummary, ClientSource, CustomerDetails,
    HotelStay, Identity, ListingSnapshot, PaymentMethod, PaymentStatus, VehicleRental,
};
use crate::services::gateway::{to_minor_units, CheckoutRequest};
use crate::state::AppState;

/// Attempts for read-modify-write updates that hit a version conflict.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotelBookingRequest {
    pub listing: ListingSnapshot,
    pub check_in: String,
    pub check_out: String,
    #[serde(default = "one")]
    pub guests: u32,
    #[serde(default = "one")]
    pub rooms: u32,
    pub guest_name: String,
    pub guest_email: String,
    #[serde(default)]
    pub guest_phone: Option<String>,
    pub total_amount: f64,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub source: ClientSource,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleBookingRequest {
    pub listing: ListingSnapshot,
    pub start_date: String,
    pub end_date: String,
    pub days: u32,
    pub customer: CustomerDetails,
    #[serde(default)]
    pub pickup_location: Option<String>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(alias = "totalPrice")]
    pub total_amount: f64,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub source: ClientSource,
}

#[derive(Debug, Clone)]
pub enum NewBooking {
    Hotel(HotelBookingRequest),
    Vehicle(VehicleBookingRequest),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBooking {
    pub booking_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
}

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn validate_amount(amount: f64) -> Result<(), AppError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::Validation(
            "totalAmount must be a positive number".to_string(),
        ));
    }
    Ok(())
}

impl NewBooking {
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            NewBooking::Hotel(h) => {
                require(&h.listing.id, "listing.id")?;
                require(&h.listing.name, "listing.name")?;
                require(&h.check_in, "checkIn")?;
                require(&h.check_out, "checkOut")?;
                require(&h.guest_name, "guestName")?;
                require(&h.guest_email, "guestEmail")?;
                validate_amount(h.total_amount)
            }
            NewBooking::Vehicle(v) => {
                require(&v.listing.id, "listing.id")?;
                require(&v.listing.name, "listing.name")?;
                require(&v.start_date, "startDate")?;
                require(&v.end_date, "endDate")?;
                require(&v.customer.name, "customer.name")?;
                require(&v.customer.email, "customer.email")?;
                if v.days == 0 {
                    return Err(AppError::Validation("days must be at least 1".to_string()));
                }
                validate_amount(v.total_amount)
            }
        }
    }

    /// Builds the pending booking; hotel bookings need a verified caller.
    fn into_booking(self, caller: Option<&Identity>) -> Result<Booking, AppError> {
        let id = queries::new_document_id();
        let booking = match self {
            NewBooking::Hotel(h) => {
                let caller = caller.ok_or(AppError::Unauthorized)?;
                let mut booking = Booking::new_pending(
                    id,
                    caller.uid.clone(),
                    h.listing,
                    BookingDetails::Hotel(HotelStay {
                        check_in: h.check_in,
                        check_out: h.check_out,
                        guests: h.guests,
                        rooms: h.rooms,
                        guest_name: h.guest_name,
                        guest_email: h.guest_email,
                        guest_phone: h.guest_phone,
                    }),
                    h.total_amount,
                );
                booking.mobile_number = h.mobile_number;
                booking.source = h.source;
                booking
            }
            NewBooking::Vehicle(v) => {
                let user_id = caller
                    .map(|c| c.uid.clone())
                    .unwrap_or_else(|| GUEST_USER_ID.to_string());
                let mut booking = Booking::new_pending(
                    id,
                    user_id,
                    v.listing,
                    BookingDetails::Vehicle(VehicleRental {
                        start_date: v.start_date,
                        end_date: v.end_date,
                        days: v.days,
                        customer: v.customer,
                        pickup_location: v.pickup_location,
                        payment_method: v.payment_method,
                    }),
                    v.total_amount,
                );
                booking.mobile_number = v.mobile_number;
                booking.source = v.source;
                booking
            }
        };
        Ok(booking)
    }
}

/// Where the gateway sends the browser once checkout finishes.
pub fn callback_url(config: &AppConfig, source: ClientSource, booking_id: &str) -> String {
    let path = match source {
        ClientSource::Web => "/api/payment/callback",
        ClientSource::Mobile => "/api/payment/callback-app",
    };
    format!("{}{}?id={}", config.public_base_url, path, booking_id)
}

pub async fn create_booking_and_initiate_payment(
    state: &AppState,
    input: NewBooking,
    caller: Option<&Identity>,
) -> Result<CreatedBooking, AppError> {
    input.validate()?;
    let mut booking = input.into_booking(caller)?;
    let store = state.store.as_ref();

    if booking.wants_pay_at_pickup() {
        booking.confirm_pay_at_pickup();
        queries::insert_booking(store, &mut booking).await?;
        tracing::info!(booking_id = %booking.id, "pay-at-pickup booking confirmed");
        return Ok(CreatedBooking {
            booking_id: booking.id,
            url: None,
            status: booking.status,
            payment_status: booking.payment_status,
        });
    }

    queries::insert_booking(store, &mut booking).await?;
    tracing::info!(
        booking_id = %booking.id,
        kind = booking.kind().as_str(),
        amount = booking.total_amount,
        "pending booking created"
    );

    let request = CheckoutRequest {
        merchant_order_id: booking.transaction_id.clone(),
        amount_minor: to_minor_units(booking.total_amount),
        redirect_url: callback_url(&state.config, booking.source, &booking.id),
    };

    let url = match state.gateway.create_checkout(&request).await {
        Ok(Some(url)) => url,
        Ok(None) => {
            tracing::warn!(booking_id = %booking.id, "gateway returned no checkout url");
            discard_booking(state, &booking).await;
            return Err(AppError::PaymentInitiationFailed);
        }
        Err(e) => {
            discard_booking(state, &booking).await;
            return Err(AppError::GatewayCommunication(format!("{e:#}")));
        }
    };

    Ok(CreatedBooking {
        booking_id: booking.id,
        url: Some(url),
        status: booking.status,
        payment_status: booking.payment_status,
    })
}

/// Compensating delete when checkout could not be started.
async fn discard_booking(state: &AppState, booking: &Booking) {
    match queries::delete_booking(state.store.as_ref(), booking).await {
        Ok(_) => tracing::info!(booking_id = %booking.id, "discarded abandoned booking"),
        Err(e) => {
            tracing::error!(booking_id = %booking.id, error = %e, "failed to discard abandoned booking")
        }
    }
}

pub async fn load_booking(state: &AppState, id: &str) -> Result<Booking, AppError> {
    queries::find_booking(state.store.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

fn ensure_owner(booking: &Booking, caller: &Identity) -> Result<(), AppError> {
    if caller.is_admin() || booking.is_owned_by(&caller.uid) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

pub async fn cancel_booking(
    state: &AppState,
    id: &str,
    caller: &Identity,
) -> Result<Booking, AppError> {
    let mut booking = load_booking(state, id).await?;
    ensure_owner(&booking, caller)?;
    booking.cancel()?;
    queries::save_booking(state.store.as_ref(), &mut booking).await?;

    tracing::info!(booking_id = %booking.id, by = %caller.uid, "booking cancelled");
    Ok(booking)
}

pub async fn add_support_ticket(
    state: &AppState,
    id: &str,
    caller: &Identity,
    kind: &str,
    message: &str,
) -> Result<Booking, AppError> {
    require(kind, "type")?;
    require(message, "message")?;

    let mut booking = load_booking(state, id).await?;
    ensure_owner(&booking, caller)?;

    for _ in 0..MAX_WRITE_ATTEMPTS {
        booking.add_support_ticket(kind, message);
        match queries::save_booking(state.store.as_ref(), &mut booking).await {
            Ok(()) => {
                tracing::info!(booking_id = %booking.id, kind, "support ticket added");
                return Ok(booking);
            }
            Err(StoreError::Conflict { .. }) => {
                booking = load_booking(state, id).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Conflict(format!("booking {id} kept changing")))
}

/// Manual edit outside the lifecycle rules.
pub async fn admin_override(
    state: &AppState,
    id: &str,
    status: BookingStatus,
    payment_status: Option<PaymentStatus>,
    admin: &Identity,
) -> Result<Booking, AppError> {
    let mut booking = load_booking(state, id).await?;
    let previous = booking.status;
    booking.override_state(status, payment_status);
    queries::save_booking(state.store.as_ref(), &mut booking).await?;

    tracing::warn!(
        booking_id = %booking.id,
        from = previous.as_str(),
        to = booking.status.as_str(),
        admin = %admin.uid,
        "booking status overridden"
    );
    Ok(booking)
}

pub async fn list_my_bookings(
    state: &AppState,
    caller: &Identity,
) -> Result<Vec<BookingSummary>, AppError> {
    let bookings = queries::list_bookings_for_user(state.store.as_ref(), &caller.uid).await?;
    let mut summaries: Vec<BookingSummary> = bookings.iter().map(|b| b.summary(None)).collect();
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(summaries)
}
