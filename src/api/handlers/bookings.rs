use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{Booking, CompletePaymentRequest, CreateBookingRequest, FailPaymentRequest},
    error::Result,
};

#[derive(Debug, Deserialize)]
pub struct DayParams {
    #[serde(default)]
    date: String,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>)> {
    let booking = state
        .service_context
        .booking_service
        .create_booking(&current_user.user, req)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Booking>> {
    let booking = state
        .service_context
        .booking_service
        .get_booking(&current_user.user, &id)
        .await?;
    Ok(Json(booking))
}

pub async fn list_for_day(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
    Path((club_id, court_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<DayParams>,
) -> Result<Json<Vec<Booking>>> {
    let bookings = state
        .service_context
        .booking_service
        .list_court_day(club_id, court_id, &params.date)
        .await?;
    Ok(Json(bookings))
}

pub async fn start_payment(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Booking>> {
    let booking = state
        .service_context
        .payment_service
        .begin_payment(&current_user.user, &id)
        .await?;
    Ok(Json(booking))
}

pub async fn complete_payment(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<CompletePaymentRequest>,
) -> Result<Json<Booking>> {
    let booking = state
        .service_context
        .payment_service
        .complete_payment(&current_user.user, &id, req)
        .await?;
    Ok(Json(booking))
}

pub async fn fail_payment(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<FailPaymentRequest>,
) -> Result<Json<Booking>> {
    let booking = state
        .service_context
        .payment_service
        .fail_payment(&current_user.user, &id, req)
        .await?;
    Ok(Json(booking))
}
