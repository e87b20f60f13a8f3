use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{time_from_minutes, Booking, BookingStatus, NewBooking},
    error::{AppError, Result},
    repository::{with_retries, BookingRepository, DEFAULT_TRANSACTION_RETRIES},
};

const BOOKING_COLUMNS: &str = r#"
    id, club_id, court_id, booking_date, start_minute, end_minute, user_id,
    display_name, notes, cost_cents, status, paid, payment_in_progress,
    payment_method, payment_reference, last_payment_error, created_at,
    payment_attempted_at, payment_completed_at, updated_at
"#;

#[derive(FromRow)]
struct BookingRow {
    id: String,
    club_id: String,
    court_id: String,
    booking_date: String,
    start_minute: i64,
    end_minute: i64,
    user_id: String,
    display_name: String,
    notes: Option<String>,
    cost_cents: i64,
    status: String,
    paid: i64,
    payment_in_progress: i64,
    payment_method: Option<String>,
    payment_reference: Option<String>,
    last_payment_error: Option<String>,
    created_at: NaiveDateTime,
    payment_attempted_at: Option<NaiveDateTime>,
    payment_completed_at: Option<NaiveDateTime>,
    updated_at: NaiveDateTime,
}

pub struct SqliteBookingRepository {
    pool: SqlitePool,
    retries: u32,
}

impl SqliteBookingRepository {
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

    async fn try_create(&self, new: &NewBooking) -> Result<Booking> {
        let mut tx = self.pool.begin().await?;

        let existing = confirmed_for_day(&mut tx, new.club_id, new.court_id, new.date).await?;
        if let Some(clash) = existing.iter().find(|b| b.slot().overlaps(&new.slot)) {
            tracing::info!(
                club_id = %new.club_id,
                court_id = %new.court_id,
                date = %new.date,
                existing = %clash.id,
                "Rejected overlapping booking"
            );
            return Err(AppError::SlotConflict);
        }

        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, club_id, court_id, booking_date, start_minute, end_minute,
                user_id, display_name, notes, cost_cents, status, paid,
                payment_in_progress, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(&new.id)
        .bind(new.club_id.to_string())
        .bind(new.court_id.to_string())
        .bind(new.date.to_string())
        .bind(new.slot.start_minute())
        .bind(new.slot.end_minute())
        .bind(new.user_id.to_string())
        .bind(&new.display_name)
        .bind(&new.notes)
        .bind(new.cost_cents)
        .bind(BookingStatus::Confirmed.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let booking = load_booking(&mut tx, &new.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created booking".to_string()))?;

        tx.commit().await?;
        Ok(booking)
    }

    /// Load, mutate and save a booking inside one transaction, retrying on
    /// contention. `transition` sees the current row, so its checks are
    /// evaluated against committed state.
    async fn transition<F>(&self, id: &str, transition: F) -> Result<Booking>
    where
        F: Fn(&mut Booking) -> Result<()> + Send + Sync,
    {
        let pool = &self.pool;
        let transition = &transition;
        with_retries(self.retries, || async move {
            let mut tx = pool.begin().await?;
            let mut booking = load_booking(&mut tx, id)
                .await?
                .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;
            transition(&mut booking)?;
            save_payment_state(&mut tx, &booking).await?;
            tx.commit().await?;
            Ok(booking)
        })
        .await
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::Database(e.to_string()))
}

fn row_to_booking(row: BookingRow) -> Result<Booking> {
    let to_utc = |dt: NaiveDateTime| DateTime::from_naive_utc_and_offset(dt, Utc);
    Ok(Booking {
        club_id: parse_uuid(&row.club_id)?,
        court_id: parse_uuid(&row.court_id)?,
        date: NaiveDate::parse_from_str(&row.booking_date, "%Y-%m-%d")
            .map_err(|e| AppError::Database(format!("Invalid booking date: {}", e)))?,
        start_time: time_from_minutes(row.start_minute)
            .ok_or_else(|| AppError::Database(format!("Invalid start minute: {}", row.start_minute)))?,
        end_time: time_from_minutes(row.end_minute)
            .ok_or_else(|| AppError::Database(format!("Invalid end minute: {}", row.end_minute)))?,
        user_id: parse_uuid(&row.user_id)?,
        status: BookingStatus::from_str(&row.status)
            .ok_or_else(|| AppError::Database(format!("Invalid booking status: {}", row.status)))?,
        id: row.id,
        display_name: row.display_name,
        notes: row.notes,
        cost_cents: row.cost_cents,
        paid: row.paid != 0,
        payment_in_progress: row.payment_in_progress != 0,
        payment_method: row.payment_method,
        payment_reference: row.payment_reference,
        last_payment_error: row.last_payment_error,
        created_at: to_utc(row.created_at),
        payment_attempted_at: row.payment_attempted_at.map(to_utc),
        payment_completed_at: row.payment_completed_at.map(to_utc),
        updated_at: to_utc(row.updated_at),
    })
}

pub(crate) async fn load_booking(conn: &mut SqliteConnection, id: &str) -> Result<Option<Booking>> {
    let row = sqlx::query_as::<_, BookingRow>(&format!(
        "SELECT {} FROM bookings WHERE id = ?",
        BOOKING_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_booking).transpose()
}

async fn confirmed_for_day(
    conn: &mut SqliteConnection,
    club_id: Uuid,
    court_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<Booking>> {
    let rows = sqlx::query_as::<_, BookingRow>(&format!(
        r#"
        SELECT {} FROM bookings
        WHERE club_id = ? AND court_id = ? AND booking_date = ? AND status = ?
        ORDER BY start_minute ASC
        "#,
        BOOKING_COLUMNS
    ))
    .bind(club_id.to_string())
    .bind(court_id.to_string())
    .bind(date.to_string())
    .bind(BookingStatus::Confirmed.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(row_to_booking).collect()
}

/// Whether `booking`'s slot is clear of every other confirmed booking on
/// its court and day.
pub(crate) async fn slot_is_free(conn: &mut SqliteConnection, booking: &Booking) -> Result<bool> {
    let existing = confirmed_for_day(conn, booking.club_id, booking.court_id, booking.date).await?;
    Ok(!existing
        .iter()
        .any(|other| other.id != booking.id && other.slot().overlaps(&booking.slot())))
}

/// Persist the status and payment fields of `booking`.
pub(crate) async fn save_payment_state(conn: &mut SqliteConnection, booking: &Booking) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE bookings
        SET status = ?,
            paid = ?,
            payment_in_progress = ?,
            payment_method = ?,
            payment_reference = ?,
            last_payment_error = ?,
            payment_attempted_at = ?,
            payment_completed_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(booking.status.as_str())
    .bind(booking.paid)
    .bind(booking.payment_in_progress)
    .bind(&booking.payment_method)
    .bind(&booking.payment_reference)
    .bind(&booking.last_payment_error)
    .bind(booking.payment_attempted_at.map(|dt| dt.naive_utc()))
    .bind(booking.payment_completed_at.map(|dt| dt.naive_utc()))
    .bind(booking.updated_at.naive_utc())
    .bind(&booking.id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl BookingRepository for SqliteBookingRepository {
    async fn create_confirmed(&self, booking: NewBooking) -> Result<Booking> {
        let booking = &booking;
        with_retries(self.retries, || self.try_create(booking)).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Booking>> {
        let mut conn = self.pool.acquire().await?;
        load_booking(&mut conn, id).await
    }

    async fn list_confirmed_for_day(
        &self,
        club_id: Uuid,
        court_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>> {
        let mut conn = self.pool.acquire().await?;
        confirmed_for_day(&mut conn, club_id, court_id, date).await
    }

    async fn begin_payment(&self, id: &str) -> Result<Booking> {
        self.transition(id, |booking| booking.begin_payment(Utc::now()))
            .await
    }

    async fn complete_payment(
        &self,
        id: &str,
        method: &str,
        reference: Option<&str>,
    ) -> Result<Booking> {
        self.transition(id, |booking| {
            booking.complete_payment(method, reference, Utc::now())
        })
        .await
    }

    async fn fail_payment(&self, id: &str, reason: &str) -> Result<Booking> {
        self.transition(id, |booking| booking.fail_payment(reason, Utc::now()))
            .await
    }

    async fn release_stale_payments(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET payment_in_progress = 0,
                last_payment_error = 'Payment attempt expired',
                updated_at = ?
            WHERE payment_in_progress = 1
              AND paid = 0
              AND payment_attempted_at < ?
            "#,
        )
        .bind(now)
        .bind(cutoff.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
