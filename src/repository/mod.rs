use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::*;
use crate::error::Result;

pub mod balance_repository;
pub mod booking_repository;
pub mod club_repository;
pub mod membership_repository;
pub mod user_repository;
pub mod webhook_ledger;

pub use balance_repository::SqliteBalanceRepository;
pub use booking_repository::SqliteBookingRepository;
pub use club_repository::SqliteClubRepository;
pub use membership_repository::SqliteMembershipRepository;
pub use user_repository::SqliteUserRepository;

/// Attempts made for a transaction when SQLite reports contention.
pub const DEFAULT_TRANSACTION_RETRIES: u32 = 5;

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `attempts` is exhausted. Each call of `op` must open its own transaction.
pub async fn with_retries<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(attempt, attempts, "Store busy, retrying transaction: {}", e);
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, request: CreateUserRequest, password_hash: String) -> Result<User>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_password_hash(&self, email: &str) -> Result<Option<(Uuid, String)>>;
    async fn set_payment_method(
        &self,
        id: Uuid,
        customer_id: Option<&str>,
        payment_method_id: Option<&str>,
    ) -> Result<User>;
}

#[async_trait]
pub trait ClubRepository: Send + Sync {
    async fn create(&self, request: CreateClubRequest, admin_id: Uuid) -> Result<Club>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Club>>;
    async fn find_by_stripe_account(&self, account_id: &str) -> Result<Option<Club>>;
    async fn is_admin(&self, club_id: Uuid, user_id: Uuid) -> Result<bool>;
    /// Store (or clear) the connected account. Clearing also resets the
    /// capability flags.
    async fn set_stripe_account(&self, id: Uuid, account_id: Option<&str>) -> Result<Club>;
    async fn update_account_status(&self, id: Uuid, status: ConnectedAccountStatus) -> Result<Club>;
    async fn create_court(&self, club_id: Uuid, request: CreateCourtRequest) -> Result<Court>;
    async fn find_court(&self, id: Uuid) -> Result<Option<Court>>;
    async fn list_courts(&self, club_id: Uuid) -> Result<Vec<Court>>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Insert a confirmed booking unless it overlaps one already confirmed
    /// for the same club, court and day. Check and insert share a transaction.
    async fn create_confirmed(&self, booking: NewBooking) -> Result<Booking>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Booking>>;
    async fn list_confirmed_for_day(
        &self,
        club_id: Uuid,
        court_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>>;
    async fn begin_payment(&self, id: &str) -> Result<Booking>;
    async fn complete_payment(
        &self,
        id: &str,
        method: &str,
        reference: Option<&str>,
    ) -> Result<Booking>;
    async fn fail_payment(&self, id: &str, reason: &str) -> Result<Booking>;
    /// Clear holds on unpaid bookings whose attempt started before `cutoff`.
    async fn release_stale_payments(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn create_plan(&self, club_id: Uuid, request: CreatePlanRequest, interval: BillingInterval) -> Result<MembershipPlan>;
    async fn find_plan(&self, id: Uuid) -> Result<Option<MembershipPlan>>;
    async fn list_plans(&self, club_id: Uuid) -> Result<Vec<MembershipPlan>>;
    async fn create_subscription(&self, subscription: MembershipSubscription) -> Result<MembershipSubscription>;
    async fn find_subscription(&self, id: Uuid) -> Result<Option<MembershipSubscription>>;
    async fn list_subscriptions_for_user(&self, user_id: Uuid) -> Result<Vec<MembershipSubscription>>;
    async fn mark_canceled(&self, id: Uuid) -> Result<MembershipSubscription>;
}

#[async_trait]
pub trait BalanceRepository: Send + Sync {
    /// Append a credit to the ledger and move the balance in one transaction.
    /// A payment reference already in the ledger is returned, not credited.
    async fn credit(
        &self,
        user_id: Uuid,
        club_id: Uuid,
        amount_cents: i64,
        payment_reference: Option<&str>,
        description: &str,
    ) -> Result<BalanceTransaction>;
    async fn get_balance(&self, user_id: Uuid, club_id: Uuid) -> Result<Option<AccountBalance>>;
    async fn list_transactions(&self, user_id: Uuid, club_id: Uuid, limit: i64) -> Result<Vec<BalanceTransaction>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retries_retries_busy_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retries(5, || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::Busy("database is locked".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_gives_up() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retries(3, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Busy("database is locked".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Busy(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_does_not_retry_conflicts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retries(5, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::SlotConflict)
        })
        .await;
        assert!(matches!(result, Err(AppError::SlotConflict)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
