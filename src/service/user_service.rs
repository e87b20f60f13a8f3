use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthService,
    domain::{CreateUserRequest, User},
    error::{AppError, Result},
    repository::UserRepository,
    service::validation_message,
};

#[derive(Debug, Serialize)]
pub struct AuthenticatedUser {
    pub token: String,
    pub user: User,
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    auth_service: Arc<AuthService>,
}

impl UserService {
    pub fn new(user_repo: Arc<dyn UserRepository>, auth_service: Arc<AuthService>) -> Self {
        Self {
            user_repo,
            auth_service,
        }
    }

    pub async fn register(&self, request: CreateUserRequest) -> Result<AuthenticatedUser> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;

        let password_hash = AuthService::hash_password(&request.password)?;
        let user = self.user_repo.create(request, password_hash).await?;
        let token = self.auth_service.issue_token(user.id)?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(AuthenticatedUser { token, user })
    }

    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthenticatedUser> {
        let (user_id, hash) = self
            .user_repo
            .get_password_hash(email)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if !AuthService::verify_password(password, &hash)? {
            tracing::info!(user_id = %user_id, "Rejected login with wrong password");
            return Err(AppError::Unauthorized);
        }

        let user = self
            .user_repo
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        let token = self.auth_service.issue_token(user.id)?;
        Ok(AuthenticatedUser { token, user })
    }

    /// Resolve a bearer token to the user it was issued for.
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        let user_id: Uuid = self.auth_service.verify_token(token)?;
        self.user_repo
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::fixture;

    fn registration(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            email: email.to_string(),
            display_name: "Rafa".to_string(),
            password: "topspin-forehand".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let f = fixture().await;
        let service = &f.ctx.user_service;

        let registered = service.register(registration("Rafa@Example.com")).await.unwrap();
        assert_eq!(registered.user.email, "rafa@example.com");

        let logged_in = service.login("rafa@example.com", "topspin-forehand").await.unwrap();
        assert_eq!(logged_in.user.id, registered.user.id);

        let user = service.authenticate(&logged_in.token).await.unwrap();
        assert_eq!(user.id, registered.user.id);
    }

    #[tokio::test]
    async fn test_bad_credentials_unauthorized() {
        let f = fixture().await;
        let service = &f.ctx.user_service;
        service.register(registration("rafa@example.com")).await.unwrap();

        assert!(matches!(
            service.login("rafa@example.com", "backhand").await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            service.login("nobody@example.com", "topspin-forehand").await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(service.authenticate("garbage").await, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let f = fixture().await;
        let service = &f.ctx.user_service;
        service.register(registration("rafa@example.com")).await.unwrap();
        assert!(matches!(
            service.register(registration("RAFA@example.com")).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_short_password_rejected() {
        let f = fixture().await;
        let mut request = registration("rafa@example.com");
        request.password = "short".to_string();
        assert!(matches!(
            f.ctx.user_service.register(request).await,
            Err(AppError::Validation(_))
        ));
    }
}
