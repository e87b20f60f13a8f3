use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::{
    api::state::AppState,
    domain::CreateUserRequest,
    error::Result,
    service::AuthenticatedUser,
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<AuthenticatedUser>)> {
    let registered = state.service_context.user_service.register(req).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthenticatedUser>> {
    let authenticated = state
        .service_context
        .user_service
        .login(&req.email, &req.password)
        .await?;
    Ok(Json(authenticated))
}
