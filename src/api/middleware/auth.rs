use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::{
    api::state::AppState,
    domain::User,
    error::{AppError, Result},
};

#[derive(Clone)]
pub struct CurrentUser {
    pub user: User,
}

pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AppError::Unauthorized)?;

    let user = state
        .service_context
        .user_service
        .authenticate(bearer.token())
        .await?;

    request.extensions_mut().insert(CurrentUser { user });

    Ok(next.run(request).await)
}
