pub mod admin;
pub mod auth;
pub mod bookings;
pub mod health;
pub mod payment;
pub mod users;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/payment/initiate", post(payment::initiate))
        .route("/api/payment/check/:id", get(payment::check))
        .route(
            "/api/payment/callback",
            get(payment::callback).post(payment::callback_post),
        )
        .route(
            "/api/payment/callback-app",
            get(payment::callback_app).post(payment::callback_app_post),
        )
        .route("/api/payment/webhook", post(webhook::payment_webhook))
        .route("/api/bookings", get(bookings::get_booking))
        .route("/api/bookings/vehicle", post(bookings::create_vehicle_booking))
        .route("/api/bookings/mine", get(bookings::my_bookings))
        .route("/api/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/api/bookings/:id/support", post(bookings::add_support_ticket))
        .route("/api/bookings/:id/events", get(bookings::booking_events))
        .route("/api/admin/bookings", get(admin::list_bookings))
        .route("/api/admin/bookings/:id/status", post(admin::override_status))
        .route("/api/admin/revenue", get(admin::revenue))
        .route("/api/users/me", put(users::update_profile))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
