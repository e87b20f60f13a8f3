use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{AccountBalance, BalanceTransaction},
    error::{AppError, Result},
    repository::{with_retries, BalanceRepository, DEFAULT_TRANSACTION_RETRIES},
};

#[derive(FromRow)]
struct BalanceRow {
    user_id: String,
    club_id: String,
    balance_cents: i64,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    club_id: String,
    amount_cents: i64,
    balance_before_cents: i64,
    balance_after_cents: i64,
    payment_reference: Option<String>,
    description: String,
    created_at: NaiveDateTime,
}

pub struct SqliteBalanceRepository {
    pool: SqlitePool,
    retries: u32,
}

impl SqliteBalanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            retries: DEFAULT_TRANSACTION_RETRIES,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    async fn try_credit(
        &self,
        user_id: Uuid,
        club_id: Uuid,
        amount_cents: i64,
        payment_reference: Option<&str>,
        description: &str,
    ) -> Result<BalanceTransaction> {
        let mut tx = self.pool.begin().await?;
        let (transaction, _) =
            apply_credit(&mut tx, user_id, club_id, amount_cents, payment_reference, description).await?;
        tx.commit().await?;
        Ok(transaction)
    }
}

fn row_to_transaction(row: TransactionRow) -> Result<BalanceTransaction> {
    Ok(BalanceTransaction {
        id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
        user_id: Uuid::parse_str(&row.user_id).map_err(|e| AppError::Database(e.to_string()))?,
        club_id: Uuid::parse_str(&row.club_id).map_err(|e| AppError::Database(e.to_string()))?,
        amount_cents: row.amount_cents,
        balance_before_cents: row.balance_before_cents,
        balance_after_cents: row.balance_after_cents,
        payment_reference: row.payment_reference,
        description: row.description,
        created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
    })
}

/// Credit a balance and append the ledger row on `conn`. A payment
/// reference that is already in the ledger is not credited again; the
/// existing row is returned with `false`.
pub(crate) async fn apply_credit(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    club_id: Uuid,
    amount_cents: i64,
    payment_reference: Option<&str>,
    description: &str,
) -> Result<(BalanceTransaction, bool)> {
    if let Some(reference) = payment_reference {
        let existing = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, user_id, club_id, amount_cents, balance_before_cents,
                   balance_after_cents, payment_reference, description, created_at
            FROM balance_transactions
            WHERE payment_reference = ?
            "#,
        )
        .bind(reference)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(row) = existing {
            return Ok((row_to_transaction(row)?, false));
        }
    }

    let now = Utc::now();
    let before: i64 = sqlx::query_scalar(
        "SELECT balance_cents FROM account_balances WHERE user_id = ? AND club_id = ?",
    )
    .bind(user_id.to_string())
    .bind(club_id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .unwrap_or(0);
    let after = before
        .checked_add(amount_cents)
        .ok_or_else(|| AppError::Validation("Balance would overflow".to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO account_balances (user_id, club_id, balance_cents, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (user_id, club_id)
        DO UPDATE SET balance_cents = excluded.balance_cents, updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id.to_string())
    .bind(club_id.to_string())
    .bind(after)
    .bind(now.naive_utc())
    .execute(&mut *conn)
    .await?;

    let transaction = BalanceTransaction {
        id: Uuid::new_v4(),
        user_id,
        club_id,
        amount_cents,
        balance_before_cents: before,
        balance_after_cents: after,
        payment_reference: payment_reference.map(str::to_string),
        description: description.to_string(),
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO balance_transactions (
            id, user_id, club_id, amount_cents, balance_before_cents,
            balance_after_cents, payment_reference, description, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(transaction.id.to_string())
    .bind(user_id.to_string())
    .bind(club_id.to_string())
    .bind(transaction.amount_cents)
    .bind(transaction.balance_before_cents)
    .bind(transaction.balance_after_cents)
    .bind(&transaction.payment_reference)
    .bind(&transaction.description)
    .bind(now.naive_utc())
    .execute(&mut *conn)
    .await?;

    Ok((transaction, true))
}

#[async_trait]
impl BalanceRepository for SqliteBalanceRepository {
    async fn credit(
        &self,
        user_id: Uuid,
        club_id: Uuid,
        amount_cents: i64,
        payment_reference: Option<&str>,
        description: &str,
    ) -> Result<BalanceTransaction> {
        with_retries(self.retries, || {
            self.try_credit(user_id, club_id, amount_cents, payment_reference, description)
        })
        .await
    }

    async fn get_balance(&self, user_id: Uuid, club_id: Uuid) -> Result<Option<AccountBalance>> {
        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT user_id, club_id, balance_cents, updated_at
            FROM account_balances
            WHERE user_id = ? AND club_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(club_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(AccountBalance {
                user_id: Uuid::parse_str(&r.user_id).map_err(|e| AppError::Database(e.to_string()))?,
                club_id: Uuid::parse_str(&r.club_id).map_err(|e| AppError::Database(e.to_string()))?,
                balance_cents: r.balance_cents,
                updated_at: DateTime::from_naive_utc_and_offset(r.updated_at, Utc),
            })),
            None => Ok(None),
        }
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        club_id: Uuid,
        limit: i64,
    ) -> Result<Vec<BalanceTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, user_id, club_id, amount_cents, balance_before_cents,
                   balance_after_cents, payment_reference, description, created_at
            FROM balance_transactions
            WHERE user_id = ? AND club_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(club_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_transaction).collect()
    }
}
