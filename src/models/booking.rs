use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::summary::BookingSummary;

/// Owner recorded for vehicle bookings made without a credential.
pub const GUEST_USER_ID: &str = "guest";

/// Merchant order ids longer than this are rejected by the gateway.
pub const MAX_TRANSACTION_ID_LEN: usize = 34;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Failed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Failed => "failed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "failed" => Some(BookingStatus::Failed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Payment has been resolved one way or the other.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Failed)
    }

    /// Reconciliation must leave the booking alone.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == BookingStatus::Cancelled
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Failed)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    PayAtPickup,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::PayAtPickup => "pay_at_pickup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "pay_at_pickup" => Some(PaymentStatus::PayAtPickup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    Hotel,
    Vehicle,
}

impl BookingKind {
    /// Lookup order when only an id is known.
    pub const ALL: [BookingKind; 2] = [BookingKind::Hotel, BookingKind::Vehicle];

    pub fn collection(&self) -> &'static str {
        match self {
            BookingKind::Hotel => "bookings",
            BookingKind::Vehicle => "vehicle_bookings",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Hotel => "hotel",
            BookingKind::Vehicle => "vehicle",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientSource {
    #[default]
    Web,
    Mobile,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Online,
    PayAtPickup,
}

/// Denormalized copy of the listing taken when the booking is made.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HotelStay {
    pub check_in: String,
    pub check_out: String,
    pub guests: u32,
    pub rooms: u32,
    pub guest_name: String,
    pub guest_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRental {
    pub start_date: String,
    pub end_date: String,
    pub days: u32,
    pub customer: CustomerDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_location: Option<String>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BookingDetails {
    Hotel(HotelStay),
    Vehicle(VehicleRental),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicket {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

/// Result of a payment as reported by the gateway or its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Failed,
    Pending,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot move booking from {from} to {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub listing: ListingSnapshot,
    pub details: BookingDetails,
    pub total_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub source: ClientSource,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub support_tickets: Vec<SupportTicket>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Store version this value was read at; not part of the stored body.
    #[serde(skip)]
    pub version: i64,
}

pub fn derive_transaction_id(booking_id: &str) -> String {
    booking_id.chars().take(MAX_TRANSACTION_ID_LEN).collect()
}

impl Booking {
    pub fn new_pending(
        id: String,
        user_id: String,
        listing: ListingSnapshot,
        details: BookingDetails,
        total_amount: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: derive_transaction_id(&id),
            id,
            user_id,
            listing,
            details,
            total_amount,
            mobile_number: None,
            source: ClientSource::Web,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            support_tickets: vec![],
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn kind(&self) -> BookingKind {
        match self.details {
            BookingDetails::Hotel(_) => BookingKind::Hotel,
            BookingDetails::Vehicle(_) => BookingKind::Vehicle,
        }
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.user_id != GUEST_USER_ID && self.user_id == uid
    }

    pub fn wants_pay_at_pickup(&self) -> bool {
        matches!(
            &self.details,
            BookingDetails::Vehicle(v) if v.payment_method == PaymentMethod::PayAtPickup
        )
    }

    /// Status and payment status only ever change together through here.
    fn set_state(&mut self, status: BookingStatus, payment_status: PaymentStatus) {
        self.status = status;
        self.payment_status = payment_status;
        self.updated_at = Utc::now();
    }

    pub fn confirm_pay_at_pickup(&mut self) {
        self.set_state(BookingStatus::Confirmed, PaymentStatus::PayAtPickup);
    }

    /// Returns whether anything changed. Settled bookings are never touched.
    pub fn apply_outcome(&mut self, outcome: PaymentOutcome) -> bool {
        if self.status.is_settled() {
            return false;
        }
        match outcome {
            PaymentOutcome::Paid => self.set_state(BookingStatus::Confirmed, PaymentStatus::Paid),
            PaymentOutcome::Failed => self.set_state(BookingStatus::Failed, PaymentStatus::Failed),
            PaymentOutcome::Pending => return false,
        }
        true
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(BookingStatus::Cancelled) {
            return Err(TransitionError {
                from: self.status.as_str(),
                to: BookingStatus::Cancelled.as_str(),
            });
        }
        let payment_status = self.payment_status;
        self.set_state(BookingStatus::Cancelled, payment_status);
        Ok(())
    }

    /// Manual admin edit: ignores the transition rules but keeps the pair consistent.
    pub fn override_state(&mut self, status: BookingStatus, payment_status: Option<PaymentStatus>) {
        let payment_status = payment_status.unwrap_or(match status {
            BookingStatus::Pending => PaymentStatus::Pending,
            BookingStatus::Failed => PaymentStatus::Failed,
            BookingStatus::Confirmed => match self.payment_status {
                PaymentStatus::PayAtPickup => PaymentStatus::PayAtPickup,
                _ => PaymentStatus::Paid,
            },
            BookingStatus::Cancelled => self.payment_status,
        });
        self.set_state(status, payment_status);
    }

    pub fn add_support_ticket(&mut self, kind: &str, message: &str) {
        let now = Utc::now();
        self.support_tickets.push(SupportTicket {
            kind: kind.to_string(),
            message: message.to_string(),
            created_at: now,
            status: "open".to_string(),
        });
        self.updated_at = now;
    }

    pub fn summary(&self, user_name: Option<String>) -> BookingSummary {
        let (start_date, end_date) = match &self.details {
            BookingDetails::Hotel(h) => (h.check_in.clone(), h.check_out.clone()),
            BookingDetails::Vehicle(v) => (v.start_date.clone(), v.end_date.clone()),
        };
        BookingSummary {
            id: self.id.clone(),
            kind: self.kind(),
            user_id: self.user_id.clone(),
            user_name,
            listing_id: self.listing.id.clone(),
            listing_name: self.listing.name.clone(),
            listing_image: self.listing.image.clone(),
            owner_id: self.listing.owner_id.clone(),
            start_date,
            end_date,
            amount: self.total_amount,
            status: self.status,
            payment_status: self.payment_status,
            transaction_id: self.transaction_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
