use chrono::{DateTime, Utc};
use serde::Serialize;

use super::booking::{BookingKind, BookingStatus, PaymentStatus};

/// Shape shared by hotel and vehicle bookings on dashboards and invoices.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSummary {
    pub id: String,
    pub kind: BookingKind,
    pub user_id: String,
    pub user_name: Option<String>,
    pub listing_id: String,
    pub listing_name: String,
    pub listing_image: Option<String>,
    pub owner_id: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub amount: f64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSummary {
    pub booking_count: usize,
    pub total_revenue: f64,
    pub partner_share: f64,
    pub platform_share: f64,
    pub hotel_revenue: f64,
    pub vehicle_revenue: f64,
}
