use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{
        BillingInterval, CreatePlanRequest, MembershipPlan, MembershipSubscription,
        SubscriptionPaymentStatus, SubscriptionStatus,
    },
    error::{AppError, Result},
    repository::MembershipRepository,
};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, club_id, user_id, plan_id, status, payment_status, price_cents,
    billing_interval, checkout_session_id, stripe_subscription_id,
    stripe_customer_id, created_at, updated_at
"#;

#[derive(FromRow)]
struct PlanRow {
    id: String,
    club_id: String,
    name: String,
    price_cents: i64,
    billing_interval: String,
    is_active: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct SubscriptionRow {
    id: String,
    club_id: String,
    user_id: String,
    plan_id: String,
    status: String,
    payment_status: String,
    price_cents: i64,
    billing_interval: String,
    checkout_session_id: String,
    stripe_subscription_id: Option<String>,
    stripe_customer_id: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteMembershipRepository {
    pool: SqlitePool,
}

impl SqliteMembershipRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_plan(row: PlanRow) -> Result<MembershipPlan> {
        Ok(MembershipPlan {
            id: parse_uuid(&row.id)?,
            club_id: parse_uuid(&row.club_id)?,
            name: row.name,
            price_cents: row.price_cents,
            billing_interval: parse_interval(&row.billing_interval)?,
            is_active: row.is_active != 0,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::Database(e.to_string()))
}

fn parse_interval(value: &str) -> Result<BillingInterval> {
    BillingInterval::from_str(value)
        .ok_or_else(|| AppError::Database(format!("Invalid billing interval: {}", value)))
}

fn row_to_subscription(row: SubscriptionRow) -> Result<MembershipSubscription> {
    Ok(MembershipSubscription {
        id: parse_uuid(&row.id)?,
        club_id: parse_uuid(&row.club_id)?,
        user_id: parse_uuid(&row.user_id)?,
        plan_id: parse_uuid(&row.plan_id)?,
        status: SubscriptionStatus::from_str(&row.status)
            .ok_or_else(|| AppError::Database(format!("Invalid subscription status: {}", row.status)))?,
        payment_status: SubscriptionPaymentStatus::from_str(&row.payment_status).ok_or_else(|| {
            AppError::Database(format!("Invalid payment status: {}", row.payment_status))
        })?,
        price_cents: row.price_cents,
        billing_interval: parse_interval(&row.billing_interval)?,
        checkout_session_id: row.checkout_session_id,
        stripe_subscription_id: row.stripe_subscription_id,
        stripe_customer_id: row.stripe_customer_id,
        created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
    })
}

pub(crate) async fn load_subscription(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<MembershipSubscription>> {
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        "SELECT {} FROM membership_subscriptions WHERE id = ?",
        SUBSCRIPTION_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_subscription).transpose()
}

pub(crate) async fn subscription_by_stripe_id(
    conn: &mut SqliteConnection,
    stripe_subscription_id: &str,
) -> Result<Option<MembershipSubscription>> {
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        "SELECT {} FROM membership_subscriptions WHERE stripe_subscription_id = ?",
        SUBSCRIPTION_COLUMNS
    ))
    .bind(stripe_subscription_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_subscription).transpose()
}

/// Persist status, payment status and the platform ids of `subscription`.
pub(crate) async fn save_subscription_state(
    conn: &mut SqliteConnection,
    subscription: &MembershipSubscription,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE membership_subscriptions
        SET status = ?,
            payment_status = ?,
            stripe_subscription_id = ?,
            stripe_customer_id = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(subscription.status.as_str())
    .bind(subscription.payment_status.as_str())
    .bind(&subscription.stripe_subscription_id)
    .bind(&subscription.stripe_customer_id)
    .bind(subscription.updated_at.naive_utc())
    .bind(subscription.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl MembershipRepository for SqliteMembershipRepository {
    async fn create_plan(
        &self,
        club_id: Uuid,
        request: CreatePlanRequest,
        interval: BillingInterval,
    ) -> Result<MembershipPlan> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO membership_plans (
                id, club_id, name, price_cents, billing_interval, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(club_id.to_string())
        .bind(request.name.trim())
        .bind(request.price_cents)
        .bind(interval.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_plan(id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created plan".to_string()))
    }

    async fn find_plan(&self, id: Uuid) -> Result<Option<MembershipPlan>> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT id, club_id, name, price_cents, billing_interval, is_active, created_at, updated_at
            FROM membership_plans
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_plan).transpose()
    }

    async fn list_plans(&self, club_id: Uuid) -> Result<Vec<MembershipPlan>> {
        let rows = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT id, club_id, name, price_cents, billing_interval, is_active, created_at, updated_at
            FROM membership_plans
            WHERE club_id = ? AND is_active = 1
            ORDER BY price_cents ASC
            "#,
        )
        .bind(club_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_plan).collect()
    }

    async fn create_subscription(
        &self,
        subscription: MembershipSubscription,
    ) -> Result<MembershipSubscription> {
        sqlx::query(
            r#"
            INSERT INTO membership_subscriptions (
                id, club_id, user_id, plan_id, status, payment_status, price_cents,
                billing_interval, checkout_session_id, stripe_subscription_id,
                stripe_customer_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(subscription.id.to_string())
        .bind(subscription.club_id.to_string())
        .bind(subscription.user_id.to_string())
        .bind(subscription.plan_id.to_string())
        .bind(subscription.status.as_str())
        .bind(subscription.payment_status.as_str())
        .bind(subscription.price_cents)
        .bind(subscription.billing_interval.as_str())
        .bind(&subscription.checkout_session_id)
        .bind(&subscription.stripe_subscription_id)
        .bind(&subscription.stripe_customer_id)
        .bind(subscription.created_at.naive_utc())
        .bind(subscription.updated_at.naive_utc())
        .execute(&self.pool)
        .await?;

        self.find_subscription(subscription.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created subscription".to_string()))
    }

    async fn find_subscription(&self, id: Uuid) -> Result<Option<MembershipSubscription>> {
        let mut conn = self.pool.acquire().await?;
        load_subscription(&mut conn, id).await
    }

    async fn list_subscriptions_for_user(&self, user_id: Uuid) -> Result<Vec<MembershipSubscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {} FROM membership_subscriptions WHERE user_id = ? ORDER BY created_at DESC",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_subscription).collect()
    }

    async fn mark_canceled(&self, id: Uuid) -> Result<MembershipSubscription> {
        let mut tx = self.pool.begin().await?;
        let mut subscription = load_subscription(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

        if subscription.status != SubscriptionStatus::Canceled {
            subscription.status = SubscriptionStatus::Canceled;
            subscription.updated_at = Utc::now();
            save_subscription_state(&mut tx, &subscription).await?;
        }

        tx.commit().await?;
        Ok(subscription)
    }
}
