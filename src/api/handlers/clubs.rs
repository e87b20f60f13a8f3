use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{
        BalanceTransaction, CheckoutTarget, Club, Court, CreateClubRequest, CreateCourtRequest,
        CreatePlanRequest, MembershipPlan, TopUpRequest,
    },
    error::Result,
    payments::CheckoutSessionCreated,
    service::{BalanceSummary, OnboardingLink},
};

pub async fn create(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateClubRequest>,
) -> Result<(StatusCode, Json<Club>)> {
    let club = state
        .service_context
        .club_service
        .create_club(&current_user.user, req)
        .await?;
    Ok((StatusCode::CREATED, Json(club)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
) -> Result<Json<Club>> {
    let club = state.service_context.club_service.get_club(club_id).await?;
    Ok(Json(club))
}

pub async fn add_court(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
    Json(req): Json<CreateCourtRequest>,
) -> Result<(StatusCode, Json<Court>)> {
    let court = state
        .service_context
        .club_service
        .add_court(&current_user.user, club_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(court)))
}

pub async fn list_courts(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
) -> Result<Json<Vec<Court>>> {
    let courts = state.service_context.club_service.list_courts(club_id).await?;
    Ok(Json(courts))
}

pub async fn create_plan(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<MembershipPlan>)> {
    let plan = state
        .service_context
        .club_service
        .create_plan(&current_user.user, club_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_plans(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
) -> Result<Json<Vec<MembershipPlan>>> {
    let plans = state.service_context.club_service.list_plans(club_id).await?;
    Ok(Json(plans))
}

pub async fn onboard(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
) -> Result<Json<OnboardingLink>> {
    let link = state
        .service_context
        .payment_service
        .onboard_club(&current_user.user, club_id)
        .await?;
    Ok(Json(link))
}

pub async fn refresh_account(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
) -> Result<Json<Club>> {
    let club = state
        .service_context
        .payment_service
        .refresh_club_account(&current_user.user, club_id)
        .await?;
    Ok(Json(club))
}

pub async fn balance(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
) -> Result<Json<BalanceSummary>> {
    let summary = state
        .service_context
        .payment_service
        .balance(&current_user.user, club_id)
        .await?;
    Ok(Json(summary))
}

pub async fn top_up(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
    Json(req): Json<TopUpRequest>,
) -> Result<(StatusCode, Json<BalanceTransaction>)> {
    let transaction = state
        .service_context
        .payment_service
        .top_up(&current_user.user, club_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

pub async fn checkout(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(club_id): Path<Uuid>,
    Json(target): Json<CheckoutTarget>,
) -> Result<Json<CheckoutSessionCreated>> {
    let session = state
        .service_context
        .payment_service
        .create_checkout_session(&current_user.user, club_id, target)
        .await?;
    Ok(Json(session))
}
