use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};

/// Largest amount accepted for a booking or a top-up.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000;

/// Recorded on a cancelled booking that was paid after its slot was rebooked.
pub const REFUND_DUE: &str = "Paid after the slot was rebooked; refund required";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub club_id: Uuid,
    pub court_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub user_id: Uuid,
    pub display_name: String,
    pub notes: Option<String>,
    pub cost_cents: i64,
    pub status: BookingStatus,
    pub paid: bool,
    pub payment_in_progress: bool,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub last_payment_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub payment_attempted_at: Option<DateTime<Utc>>,
    pub payment_completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn payment_state(&self) -> PaymentState {
        if self.paid {
            PaymentState::Paid
        } else if self.payment_in_progress {
            PaymentState::InProgress
        } else if self.last_payment_error.is_some() {
            PaymentState::Failed
        } else {
            PaymentState::Unpaid
        }
    }

    /// Admission gate for a charge attempt: only one attempt at a time, and
    /// never on a paid booking.
    pub fn begin_payment(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.paid {
            return Err(AppError::AlreadyPaid);
        }
        if self.payment_in_progress {
            return Err(AppError::PaymentInProgress);
        }
        if self.status == BookingStatus::Cancelled {
            return Err(AppError::Validation("Booking has been cancelled".to_string()));
        }
        self.payment_in_progress = true;
        self.last_payment_error = None;
        self.payment_attempted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn complete_payment(
        &mut self,
        method: &str,
        reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.paid {
            return Err(AppError::AlreadyPaid);
        }
        if self.status == BookingStatus::Cancelled {
            return Err(AppError::Validation("Booking has been cancelled".to_string()));
        }
        self.record_payment(method, reference, now);
        self.last_payment_error = None;
        Ok(())
    }

    /// Put a cancelled booking back on the court. The caller must have
    /// checked that the slot is still free.
    pub fn reinstate(&mut self, now: DateTime<Utc>) {
        self.status = BookingStatus::Confirmed;
        self.updated_at = now;
    }

    /// Money arrived for a cancelled booking whose slot has been taken since.
    /// The booking stays cancelled and is flagged for a refund.
    pub fn record_refund_due(&mut self, method: &str, reference: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        if self.paid {
            return Err(AppError::AlreadyPaid);
        }
        self.record_payment(method, reference, now);
        self.last_payment_error = Some(REFUND_DUE.to_string());
        Ok(())
    }

    fn record_payment(&mut self, method: &str, reference: Option<&str>, now: DateTime<Utc>) {
        self.paid = true;
        self.payment_in_progress = false;
        self.payment_method = Some(method.to_string());
        self.payment_reference = reference.map(str::to_string);
        self.payment_completed_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed attempt; the booking can be retried with
    /// [`Booking::begin_payment`].
    pub fn fail_payment(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if self.paid {
            return Err(AppError::AlreadyPaid);
        }
        self.payment_in_progress = false;
        self.last_payment_error = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// The platform gave up on the payment: release the slot.
    pub fn cancel_for_failed_payment(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.fail_payment(reason, now)?;
        self.status = BookingStatus::Cancelled;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Confirmed" => Some(BookingStatus::Confirmed),
            "Cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

/// Payment lifecycle of a booking, derived from its flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentState {
    Unpaid,
    InProgress,
    Paid,
    Failed,
}

/// Half-open `[start, end)` wall-clock interval on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    pub fn start_minute(&self) -> i64 {
        minutes_since_midnight(self.start)
    }

    pub fn end_minute(&self) -> i64 {
        minutes_since_midnight(self.end)
    }

    /// Adjacent slots (one ends exactly when the other starts) do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        let disjoint = self.end_minute() <= other.start_minute()
            || self.start_minute() >= other.end_minute();
        !disjoint
    }
}

pub fn minutes_since_midnight(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight() / 60)
}

pub fn time_from_minutes(minutes: i64) -> Option<NaiveTime> {
    let minutes = u32::try_from(minutes).ok()?;
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
}

/// Parse `H:MM` / `HH:MM` wall-clock times.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let (hours, minutes) = value.trim().split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Derive a booking id from who booked what, plus the submission instant so
/// two requests for the same slot never collide on the key.
pub fn generate_booking_id(
    user_id: Uuid,
    court_id: Uuid,
    date: NaiveDate,
    start: NaiveTime,
    submitted_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(court_id.as_bytes());
    hasher.update(b"|");
    hasher.update(date.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(start.format("%H:%M").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(submitted_at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "club_id is required"))]
    pub club_id: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "court_id is required"))]
    pub court_id: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "date is required"))]
    pub date: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "start_time is required"))]
    pub start_time: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "end_time is required"))]
    pub end_time: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 100_000_000, message = "cost_cents must be between 0 and 100000000"))]
    pub cost_cents: i64,
}

/// A validated booking ready to be written by the repository.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: String,
    pub club_id: Uuid,
    pub court_id: Uuid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub user_id: Uuid,
    pub display_name: String,
    pub notes: Option<String>,
    pub cost_cents: i64,
}
