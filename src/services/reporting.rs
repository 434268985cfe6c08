use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use futures::future::join_all;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::booking::GUEST_USER_ID;
use crate::models::{Booking, BookingKind, BookingStatus, BookingSummary, RevenueSummary};
use crate::services::booking::load_booking;
use crate::state::AppState;

pub const PARTNER_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueFilter {
    pub partner_id: Option<String>,
    /// `today`, `7days`, `month` or `all`.
    pub range: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Half-open `[from, until)` window on `createdAt`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Window {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Window {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.until.map_or(true, |until| at < until)
    }
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Explicit dates win over the preset; `end` is inclusive.
pub fn resolve_window(filter: &RevenueFilter, now: DateTime<Utc>) -> Result<Window, AppError> {
    if filter.start.is_some() || filter.end.is_some() {
        if let (Some(start), Some(end)) = (filter.start, filter.end) {
            if end < start {
                return Err(AppError::Validation("end must not be before start".to_string()));
            }
        }
        return Ok(Window {
            from: filter.start.map(start_of),
            until: filter.end.map(|end| start_of(end) + Duration::days(1)),
        });
    }

    let today = now.date_naive();
    let from = match filter.range.as_deref().unwrap_or("all") {
        "all" => None,
        "today" => Some(start_of(today)),
        "7days" => Some(now - Duration::days(7)),
        "month" => Some(start_of(today.with_day(1).unwrap_or(today))),
        other => {
            return Err(AppError::Validation(format!("unknown range: {other}")));
        }
    };
    Ok(Window { from, until: None })
}

fn round_rupees(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Only confirmed bookings count as revenue.
pub fn summarize_revenue(bookings: &[Booking], partner_id: Option<&str>, window: Window) -> RevenueSummary {
    let mut summary = RevenueSummary::default();

    for booking in bookings {
        if booking.status != BookingStatus::Confirmed || !window.contains(booking.created_at) {
            continue;
        }
        if let Some(partner) = partner_id {
            if booking.listing.owner_id.as_deref() != Some(partner) {
                continue;
            }
        }

        summary.booking_count += 1;
        summary.total_revenue += booking.total_amount;
        match booking.kind() {
            BookingKind::Hotel => summary.hotel_revenue += booking.total_amount,
            BookingKind::Vehicle => summary.vehicle_revenue += booking.total_amount,
        }
    }

    summary.total_revenue = round_rupees(summary.total_revenue);
    summary.hotel_revenue = round_rupees(summary.hotel_revenue);
    summary.vehicle_revenue = round_rupees(summary.vehicle_revenue);
    summary.partner_share = round_rupees(summary.total_revenue * PARTNER_SHARE);
    summary.platform_share = round_rupees(summary.total_revenue - summary.partner_share);
    summary
}

/// One lookup per distinct owner, all in flight at once. Failed lookups
/// just leave the name empty.
async fn resolve_display_names(state: &AppState, bookings: &[Booking]) -> HashMap<String, String> {
    let uids: BTreeSet<&str> = bookings
        .iter()
        .map(|b| b.user_id.as_str())
        .filter(|uid| *uid != GUEST_USER_ID)
        .collect();

    let lookups = uids.into_iter().map(|uid| async move {
        match state.identity.display_name(uid).await {
            Ok(name) => name.map(|n| (uid.to_string(), n)),
            Err(e) => {
                tracing::warn!(uid, error = %e, "display name lookup failed");
                None
            }
        }
    });

    join_all(lookups).await.into_iter().flatten().collect()
}

pub async fn list_bookings_for_admin(state: &AppState) -> Result<Vec<BookingSummary>, AppError> {
    let bookings = queries::list_all_bookings(state.store.as_ref()).await?;
    let names = resolve_display_names(state, &bookings).await;

    let mut summaries: Vec<BookingSummary> = bookings
        .iter()
        .map(|b| b.summary(names.get(&b.user_id).cloned()))
        .collect();
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    tracing::debug!(count = summaries.len(), "listed bookings for admin");
    Ok(summaries)
}

pub async fn get_booking_for_admin(state: &AppState, id: &str) -> Result<BookingSummary, AppError> {
    let booking = load_booking(state, id).await?;
    let name = match state.identity.display_name(&booking.user_id).await {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(uid = %booking.user_id, error = %e, "display name lookup failed");
            None
        }
    };
    Ok(booking.summary(name))
}

pub async fn compute_revenue_summary(
    state: &AppState,
    filter: &RevenueFilter,
) -> Result<RevenueSummary, AppError> {
    let window = resolve_window(filter, Utc::now())?;
    let bookings = queries::list_all_bookings(state.store.as_ref()).await?;
    Ok(summarize_revenue(&bookings, filter.partner_id.as_deref(), window))
}
