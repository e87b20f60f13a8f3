//! Write-once record of processed webhook deliveries.

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::error::Result;

/// Claim `event_id` for processing. Returns `false` if the event was already
/// recorded, in which case the caller must not apply its effects again.
pub(crate) async fn record_event(
    conn: &mut SqliteConnection,
    event_id: &str,
    event_type: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO webhook_events (event_id, event_type, processed_at)
        VALUES (?, ?, ?)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .bind(Utc::now().naive_utc())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
pub(crate) async fn is_processed(pool: &sqlx::SqlitePool, event_id: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_events WHERE event_id = ?")
        .bind(event_id)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}
