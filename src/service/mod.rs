pub mod booking_service;
pub mod club_service;
pub mod payment_service;
pub mod user_service;
pub mod webhook_service;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::Settings;
use crate::payments::PaymentGateway;
use crate::repository::*;
use booking_service::BookingService;
use club_service::ClubService;
use payment_service::{PaymentOptions, PaymentService};
use user_service::UserService;
use webhook_service::WebhookService;

pub use payment_service::{BalanceSummary, OnboardingLink};
pub use user_service::AuthenticatedUser;
pub use webhook_service::WebhookOutcome;

pub struct ServiceContext {
    pub user_repo: Arc<dyn UserRepository>,
    pub club_repo: Arc<dyn ClubRepository>,
    pub booking_repo: Arc<dyn BookingRepository>,
    pub membership_repo: Arc<dyn MembershipRepository>,
    pub balance_repo: Arc<dyn BalanceRepository>,
    pub auth_service: Arc<AuthService>,
    pub user_service: Arc<UserService>,
    pub club_service: Arc<ClubService>,
    pub booking_service: Arc<BookingService>,
    pub payment_service: Arc<PaymentService>,
    pub webhook_service: Arc<WebhookService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    /// Wire repositories and services over one pool. Without a gateway the
    /// payment operations that need the platform answer 503.
    pub fn new(
        db_pool: SqlitePool,
        settings: &Settings,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let retries = settings.database.transaction_retries;

        let user_repo: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(db_pool.clone()));
        let club_repo: Arc<dyn ClubRepository> = Arc::new(SqliteClubRepository::new(db_pool.clone()));
        let booking_repo: Arc<dyn BookingRepository> =
            Arc::new(SqliteBookingRepository::new(db_pool.clone()).with_retries(retries));
        let membership_repo: Arc<dyn MembershipRepository> =
            Arc::new(SqliteMembershipRepository::new(db_pool.clone()));
        let balance_repo: Arc<dyn BalanceRepository> =
            Arc::new(SqliteBalanceRepository::new(db_pool.clone()).with_retries(retries));

        let auth_service = Arc::new(AuthService::new(
            &settings.auth.jwt_secret,
            settings.auth.token_duration_hours,
        ));
        let user_service = Arc::new(UserService::new(user_repo.clone(), auth_service.clone()));
        let club_service = Arc::new(ClubService::new(club_repo.clone(), membership_repo.clone()));
        let booking_service = Arc::new(BookingService::new(booking_repo.clone(), club_repo.clone()));
        let payment_service = Arc::new(PaymentService::new(
            booking_repo.clone(),
            club_repo.clone(),
            user_repo.clone(),
            membership_repo.clone(),
            balance_repo.clone(),
            gateway.clone(),
            PaymentOptions::from_settings(settings),
        ));
        let webhook_service = Arc::new(WebhookService::new(db_pool.clone(), gateway, retries));

        Self {
            user_repo,
            club_repo,
            booking_repo,
            membership_repo,
            balance_repo,
            auth_service,
            user_service,
            club_service,
            booking_service,
            payment_service,
            webhook_service,
            db_pool,
        }
    }
}

/// Flatten validator errors into one message, fields in a stable order.
pub(crate) fn validation_message(errors: validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field))
            })
        })
        .collect();
    messages.sort();
    messages.join(", ")
}
