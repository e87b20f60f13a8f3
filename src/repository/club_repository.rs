use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Club, ConnectedAccountStatus, Court, CreateClubRequest, CreateCourtRequest},
    error::{AppError, Result},
    repository::ClubRepository,
};

#[derive(FromRow)]
struct ClubRow {
    id: String,
    name: String,
    stripe_account_id: Option<String>,
    charges_enabled: i64,
    payouts_enabled: i64,
    details_submitted: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct CourtRow {
    id: String,
    club_id: String,
    name: String,
    created_at: NaiveDateTime,
}

pub struct SqliteClubRepository {
    pool: SqlitePool,
}

impl SqliteClubRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_court(row: CourtRow) -> Result<Court> {
        Ok(Court {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            club_id: Uuid::parse_str(&row.club_id).map_err(|e| AppError::Database(e.to_string()))?,
            name: row.name,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }

    async fn require(&self, id: Uuid) -> Result<Club> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Club not found".to_string()))
    }
}

fn row_to_club(row: ClubRow) -> Result<Club> {
    Ok(Club {
        id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
        name: row.name,
        stripe_account_id: row.stripe_account_id,
        charges_enabled: row.charges_enabled != 0,
        payouts_enabled: row.payouts_enabled != 0,
        details_submitted: row.details_submitted != 0,
        created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
    })
}

pub(crate) async fn club_by_stripe_account(
    conn: &mut SqliteConnection,
    account_id: &str,
) -> Result<Option<Club>> {
    let row = sqlx::query_as::<_, ClubRow>(
        r#"
        SELECT id, name, stripe_account_id, charges_enabled, payouts_enabled,
               details_submitted, created_at, updated_at
        FROM clubs
        WHERE stripe_account_id = ?
        "#,
    )
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_club).transpose()
}

pub(crate) async fn store_account_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: ConnectedAccountStatus,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE clubs
        SET charges_enabled = ?, payouts_enabled = ?, details_submitted = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.charges_enabled)
    .bind(status.payouts_enabled)
    .bind(status.details_submitted)
    .bind(Utc::now().naive_utc())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl ClubRepository for SqliteClubRepository {
    async fn create(&self, request: CreateClubRequest, admin_id: Uuid) -> Result<Club> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO clubs (id, name, charges_enabled, payouts_enabled, details_submitted, created_at, updated_at)
            VALUES (?, ?, 0, 0, 0, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(request.name.trim())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO club_admins (club_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(admin_id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.require(id).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Club>> {
        let row = sqlx::query_as::<_, ClubRow>(
            r#"
            SELECT id, name, stripe_account_id, charges_enabled, payouts_enabled,
                   details_submitted, created_at, updated_at
            FROM clubs
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_club).transpose()
    }

    async fn find_by_stripe_account(&self, account_id: &str) -> Result<Option<Club>> {
        let mut conn = self.pool.acquire().await?;
        club_by_stripe_account(&mut conn, account_id).await
    }

    async fn is_admin(&self, club_id: Uuid, user_id: Uuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM club_admins WHERE club_id = ? AND user_id = ?",
        )
        .bind(club_id.to_string())
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn set_stripe_account(&self, id: Uuid, account_id: Option<&str>) -> Result<Club> {
        sqlx::query(
            r#"
            UPDATE clubs
            SET stripe_account_id = ?,
                charges_enabled = CASE WHEN ? IS NULL THEN 0 ELSE charges_enabled END,
                payouts_enabled = CASE WHEN ? IS NULL THEN 0 ELSE payouts_enabled END,
                details_submitted = CASE WHEN ? IS NULL THEN 0 ELSE details_submitted END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(account_id)
        .bind(account_id)
        .bind(account_id)
        .bind(account_id)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.require(id).await
    }

    async fn update_account_status(&self, id: Uuid, status: ConnectedAccountStatus) -> Result<Club> {
        let mut conn = self.pool.acquire().await?;
        store_account_status(&mut conn, id, status).await?;
        drop(conn);
        self.require(id).await
    }

    async fn create_court(&self, club_id: Uuid, request: CreateCourtRequest) -> Result<Court> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO courts (id, club_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(club_id.to_string())
            .bind(request.name.trim())
            .bind(Utc::now().naive_utc())
            .execute(&self.pool)
            .await?;

        self.find_court(id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created court".to_string()))
    }

    async fn find_court(&self, id: Uuid) -> Result<Option<Court>> {
        let row = sqlx::query_as::<_, CourtRow>(
            "SELECT id, club_id, name, created_at FROM courts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_court).transpose()
    }

    async fn list_courts(&self, club_id: Uuid) -> Result<Vec<Court>> {
        let rows = sqlx::query_as::<_, CourtRow>(
            "SELECT id, club_id, name, created_at FROM courts WHERE club_id = ? ORDER BY name ASC",
        )
        .bind(club_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_court).collect()
    }
}
