use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{CreateUserRequest, User},
    error::{AppError, Result},
    repository::UserRepository,
};

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    display_name: String,
    stripe_customer_id: Option<String>,
    default_payment_method_id: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: UserRow) -> Result<User> {
        Ok(User {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            email: row.email,
            display_name: row.display_name,
            stripe_customer_id: row.stripe_customer_id,
            default_payment_method_id: row.default_payment_method_id,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, request: CreateUserRequest, password_hash: String) -> Result<User> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        let email = request.email.trim().to_lowercase();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&email)
        .bind(request.display_name.trim())
        .bind(&password_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict("Email already registered".to_string())
            }
            other => AppError::from(other),
        })?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created user".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, display_name, stripe_customer_id, default_payment_method_id,
                   created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn get_password_hash(&self, email: &str) -> Result<Option<(Uuid, String)>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, password_hash FROM users WHERE email = ?")
                .bind(email.trim().to_lowercase())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((id, hash)) => Ok(Some((
                Uuid::parse_str(&id).map_err(|e| AppError::Database(e.to_string()))?,
                hash,
            ))),
            None => Ok(None),
        }
    }

    async fn set_payment_method(
        &self,
        id: Uuid,
        customer_id: Option<&str>,
        payment_method_id: Option<&str>,
    ) -> Result<User> {
        sqlx::query(
            r#"
            UPDATE users
            SET stripe_customer_id = ?, default_payment_method_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(customer_id)
        .bind(payment_method_id)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}
