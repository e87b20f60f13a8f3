use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::*,
    error::{AppError, Result},
    repository::{ClubRepository, MembershipRepository},
    service::validation_message,
};

pub struct ClubService {
    club_repo: Arc<dyn ClubRepository>,
    membership_repo: Arc<dyn MembershipRepository>,
}

impl ClubService {
    pub fn new(club_repo: Arc<dyn ClubRepository>, membership_repo: Arc<dyn MembershipRepository>) -> Self {
        Self {
            club_repo,
            membership_repo,
        }
    }

    pub async fn create_club(&self, user: &User, request: CreateClubRequest) -> Result<Club> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;

        let club = self.club_repo.create(request, user.id).await?;
        tracing::info!(club_id = %club.id, admin = %user.id, "Club created");
        Ok(club)
    }

    pub async fn get_club(&self, id: Uuid) -> Result<Club> {
        self.club_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Club not found".to_string()))
    }

    /// Load a club the user administers.
    pub async fn require_admin(&self, user: &User, club_id: Uuid) -> Result<Club> {
        let club = self.get_club(club_id).await?;
        if !self.club_repo.is_admin(club_id, user.id).await? {
            return Err(AppError::Forbidden);
        }
        Ok(club)
    }

    pub async fn add_court(&self, user: &User, club_id: Uuid, request: CreateCourtRequest) -> Result<Court> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;
        self.require_admin(user, club_id).await?;
        self.club_repo.create_court(club_id, request).await
    }

    pub async fn list_courts(&self, club_id: Uuid) -> Result<Vec<Court>> {
        self.get_club(club_id).await?;
        self.club_repo.list_courts(club_id).await
    }

    pub async fn create_plan(&self, user: &User, club_id: Uuid, request: CreatePlanRequest) -> Result<MembershipPlan> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;
        let interval = BillingInterval::from_str(&request.billing_interval).ok_or_else(|| {
            AppError::Validation("billing_interval must be one of month, year, one_time".to_string())
        })?;
        self.require_admin(user, club_id).await?;
        self.membership_repo.create_plan(club_id, request, interval).await
    }

    pub async fn list_plans(&self, club_id: Uuid) -> Result<Vec<MembershipPlan>> {
        self.get_club(club_id).await?;
        self.membership_repo.list_plans(club_id).await
    }

    pub async fn list_memberships(&self, user: &User) -> Result<Vec<MembershipSubscription>> {
        self.membership_repo.list_subscriptions_for_user(user.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::fixture;

    #[tokio::test]
    async fn test_creator_is_admin() {
        let f = fixture().await;
        let service = &f.ctx.club_service;

        assert!(service.require_admin(&f.admin, f.club.id).await.is_ok());
        assert!(matches!(
            service.require_admin(&f.member, f.club.id).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            service.require_admin(&f.admin, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_only_admins_add_courts() {
        let f = fixture().await;
        let service = &f.ctx.club_service;

        let err = service
            .add_court(&f.member, f.club.id, CreateCourtRequest { name: "Court 9".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        service
            .add_court(&f.admin, f.club.id, CreateCourtRequest { name: "Court 2".into() })
            .await
            .unwrap();
        let courts = service.list_courts(f.club.id).await.unwrap();
        assert_eq!(courts.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_interval_validated() {
        let f = fixture().await;
        let service = &f.ctx.club_service;

        let err = service
            .create_plan(
                &f.admin,
                f.club.id,
                CreatePlanRequest {
                    name: "Weekly".into(),
                    price_cents: 500,
                    billing_interval: "week".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let plan = service
            .create_plan(
                &f.admin,
                f.club.id,
                CreatePlanRequest {
                    name: "Annual".into(),
                    price_cents: 50000,
                    billing_interval: "year".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(plan.billing_interval, BillingInterval::Year);
        assert!(plan.is_active);
    }
}
