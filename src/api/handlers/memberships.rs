use axum::{
    extract::{Extension, Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{MembershipSubscription, SavePaymentMethodRequest, User},
    error::Result,
};

pub async fn list(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<MembershipSubscription>>> {
    let memberships = state
        .service_context
        .club_service
        .list_memberships(&current_user.user)
        .await?;
    Ok(Json(memberships))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<MembershipSubscription>> {
    let subscription = state
        .service_context
        .payment_service
        .cancel_membership(&current_user.user, id)
        .await?;
    Ok(Json(subscription))
}

pub async fn save_payment_method(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<SavePaymentMethodRequest>,
) -> Result<Json<User>> {
    let user = state
        .service_context
        .payment_service
        .save_payment_method(&current_user.user, req)
        .await?;
    Ok(Json(user))
}
