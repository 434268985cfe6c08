use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::Deserialize;

use super::auth::authenticate;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus};
use crate::services::booking::{self, CreatedBooking, HotelBookingRequest, NewBooking};
use crate::services::reconciliation::{self, PaymentState};
use crate::state::AppState;

// POST /api/payment/initiate
pub async fn initiate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<HotelBookingRequest>,
) -> Result<Json<CreatedBooking>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    let created =
        booking::create_booking_and_initiate_payment(&state, NewBooking::Hotel(body), Some(&caller))
            .await?;
    Ok(Json(created))
}

// GET /api/payment/check/:id
pub async fn check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentState>, AppError> {
    let booking = reconciliation::check_payment_status(&state, &id).await?;
    Ok(Json(PaymentState::from(&booking)))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: Option<String>,
    pub code: Option<String>,
}

/// Fields the gateway may post back with the redirect. An empty or
/// non-form body falls back to the query string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackForm {
    pub code: Option<String>,
    pub merchant_transaction_id: Option<String>,
}

struct CallbackParams {
    id: Option<String>,
    code: Option<String>,
}

impl CallbackParams {
    fn merge(query: CallbackQuery, form: CallbackForm) -> Self {
        Self {
            id: query.id.or(form.merchant_transaction_id),
            code: form.code.or(query.code),
        }
    }
}

fn result_page(frontend_url: &str, booking: &Booking) -> String {
    let page = match booking.status {
        BookingStatus::Confirmed => "success",
        BookingStatus::Failed | BookingStatus::Cancelled => "failure",
        BookingStatus::Pending => "verify",
    };
    format!("{frontend_url}/book/{page}/{}", booking.id)
}

async fn web_callback(state: &AppState, params: CallbackParams) -> Response {
    let Some(id) = params.id else {
        return AppError::Validation("missing booking id".to_string()).into_response();
    };

    match reconciliation::reconcile_from_callback(state, &id, params.code.as_deref()).await {
        Ok(booking) => Redirect::to(&result_page(&state.config.frontend_url, &booking)).into_response(),
        Err(AppError::NotFound(_)) => {
            Redirect::to(&format!("{}/book/failure/{}", state.config.frontend_url, safe_id(&id)))
                .into_response()
        }
        Err(e) => {
            // let the verify page poll for the outcome
            tracing::error!(booking_id = %id, error = %e, "callback reconciliation failed");
            Redirect::to(&format!("{}/book/verify/{}", state.config.frontend_url, safe_id(&id)))
                .into_response()
        }
    }
}

// GET /api/payment/callback
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    web_callback(&state, CallbackParams::merge(query, CallbackForm::default())).await
}

// POST /api/payment/callback
pub async fn callback_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    form: Option<Form<CallbackForm>>,
) -> Response {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    web_callback(&state, CallbackParams::merge(query, form)).await
}

/// Keeps only characters that are safe inside a URL path and HTML attribute.
fn safe_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Mobile web views drop redirects that answer a POST, so the app flow gets a
/// page that navigates to the deep link itself.
pub fn deep_link_page(scheme: &str, booking_id: &str, status: BookingStatus) -> String {
    let link = format!(
        "{}://payment-result?bookingId={}&status={}",
        safe_id(scheme),
        safe_id(booking_id),
        status.as_str()
    );
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <meta http-equiv=\"refresh\" content=\"0;url={link}\">\n\
         <title>Returning to app</title>\n\
         </head>\n\
         <body>\n\
         <p>Payment {status}. Returning to the app&hellip;</p>\n\
         <p><a href=\"{link}\">Tap here if nothing happens</a></p>\n\
         <script>window.location.replace(\"{link}\");</script>\n\
         </body>\n\
         </html>\n",
        status = status.as_str(),
    )
}

async fn app_callback(state: &AppState, params: CallbackParams) -> Response {
    let Some(id) = params.id else {
        return AppError::Validation("missing booking id".to_string()).into_response();
    };
    let scheme = &state.config.app_deep_link_scheme;

    match reconciliation::reconcile_from_callback(state, &id, params.code.as_deref()).await {
        Ok(booking) => Html(deep_link_page(scheme, &booking.id, booking.status)).into_response(),
        Err(e) => {
            tracing::error!(booking_id = %id, error = %e, "app callback reconciliation failed");
            Html(deep_link_page(scheme, &id, BookingStatus::Pending)).into_response()
        }
    }
}

// GET /api/payment/callback-app
pub async fn callback_app(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    app_callback(&state, CallbackParams::merge(query, CallbackForm::default())).await
}

// POST /api/payment/callback-app
pub async fn callback_app_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    form: Option<Form<CallbackForm>>,
) -> Response {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    app_callback(&state, CallbackParams::merge(query, form)).await
}
