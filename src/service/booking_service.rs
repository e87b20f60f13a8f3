use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::*,
    error::{AppError, Result},
    repository::{BookingRepository, ClubRepository},
    service::validation_message,
};

pub struct BookingService {
    booking_repo: Arc<dyn BookingRepository>,
    club_repo: Arc<dyn ClubRepository>,
}

fn parse_uuid_field(value: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| AppError::Validation(format!("{} is not a valid id", field)))
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation("date must be formatted as YYYY-MM-DD".to_string()))
}

fn parse_time_field(value: &str, field: &str) -> Result<chrono::NaiveTime> {
    parse_time_of_day(value)
        .ok_or_else(|| AppError::Validation(format!("{} must be formatted as HH:MM", field)))
}

impl BookingService {
    pub fn new(booking_repo: Arc<dyn BookingRepository>, club_repo: Arc<dyn ClubRepository>) -> Self {
        Self {
            booking_repo,
            club_repo,
        }
    }

    /// Reserve a slot for `user`. Fails with `SlotConflict` when the range
    /// overlaps a confirmed booking on the same court and day.
    pub async fn create_booking(&self, user: &User, request: CreateBookingRequest) -> Result<Booking> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;

        let club_id = parse_uuid_field(&request.club_id, "club_id")?;
        let court_id = parse_uuid_field(&request.court_id, "court_id")?;
        let date = parse_date(&request.date)?;
        let start = parse_time_field(&request.start_time, "start_time")?;
        let end = parse_time_field(&request.end_time, "end_time")?;
        let slot = TimeSlot::new(start, end)
            .ok_or_else(|| AppError::Validation("end_time must be after start_time".to_string()))?;

        let court = self
            .club_repo
            .find_court(court_id)
            .await?
            .filter(|c| c.club_id == club_id)
            .ok_or_else(|| AppError::NotFound("Court not found in this club".to_string()))?;

        let display_name = request
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&user.display_name)
            .to_string();

        let new_booking = NewBooking {
            id: generate_booking_id(user.id, court.id, date, start, Utc::now()),
            club_id,
            court_id: court.id,
            date,
            slot,
            user_id: user.id,
            display_name,
            notes: request.notes.filter(|n| !n.trim().is_empty()),
            cost_cents: request.cost_cents,
        };

        let booking = self.booking_repo.create_confirmed(new_booking).await?;
        tracing::info!(
            booking_id = %booking.id,
            court_id = %booking.court_id,
            date = %booking.date,
            start = %booking.start_time.format("%H:%M"),
            end = %booking.end_time.format("%H:%M"),
            "Booking confirmed"
        );
        Ok(booking)
    }

    /// Fetch a booking the caller may act on: their own, or any booking in a
    /// club they administer.
    pub async fn get_booking(&self, user: &User, id: &str) -> Result<Booking> {
        let booking = self
            .booking_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

        if booking.user_id != user.id && !self.club_repo.is_admin(booking.club_id, user.id).await? {
            return Err(AppError::Forbidden);
        }

        Ok(booking)
    }

    pub async fn list_court_day(&self, club_id: Uuid, court_id: Uuid, date: &str) -> Result<Vec<Booking>> {
        let date = parse_date(date)?;
        self.club_repo
            .find_court(court_id)
            .await?
            .filter(|c| c.club_id == club_id)
            .ok_or_else(|| AppError::NotFound("Court not found in this club".to_string()))?;

        self.booking_repo
            .list_confirmed_for_day(club_id, court_id, date)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{fixture, Fixture};

    fn request(f: &Fixture, start: &str, end: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            club_id: f.club.id.to_string(),
            court_id: f.court.id.to_string(),
            date: "2024-06-01".to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            display_name: None,
            notes: None,
            cost_cents: 2500,
        }
    }

    #[tokio::test]
    async fn test_adjacent_slots_both_confirm() {
        let f = fixture().await;
        let service = &f.ctx.booking_service;

        let first = service.create_booking(&f.member, request(&f, "10:00", "11:00")).await.unwrap();
        let second = service.create_booking(&f.member, request(&f, "11:00", "12:00")).await.unwrap();

        assert_eq!(first.status, BookingStatus::Confirmed);
        assert_eq!(second.status, BookingStatus::Confirmed);
        assert!(!first.paid);
        assert_ne!(first.id, second.id);
        assert_eq!(first.display_name, f.member.display_name);
    }

    #[tokio::test]
    async fn test_overlapping_slot_conflicts() {
        let f = fixture().await;
        let service = &f.ctx.booking_service;

        service.create_booking(&f.member, request(&f, "10:00", "11:00")).await.unwrap();
        let err = service
            .create_booking(&f.admin, request(&f, "10:30", "11:30"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotConflict));
    }

    #[tokio::test]
    async fn test_single_digit_hours_compare_numerically() {
        let f = fixture().await;
        let service = &f.ctx.booking_service;

        service.create_booking(&f.member, request(&f, "9:00", "10:00")).await.unwrap();
        service.create_booking(&f.member, request(&f, "10:00", "11:00")).await.unwrap();
        let err = service
            .create_booking(&f.member, request(&f, "9:30", "10:30"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotConflict));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = fixture().await;
        let service = &f.ctx.booking_service;

        let mut missing = request(&f, "10:00", "11:00");
        missing.court_id = String::new();
        assert!(matches!(
            service.create_booking(&f.member, missing).await,
            Err(AppError::Validation(_))
        ));

        let backwards = request(&f, "11:00", "10:00");
        assert!(matches!(
            service.create_booking(&f.member, backwards).await,
            Err(AppError::Validation(_))
        ));

        let malformed = request(&f, "ten", "11:00");
        assert!(matches!(
            service.create_booking(&f.member, malformed).await,
            Err(AppError::Validation(_))
        ));

        let mut negative = request(&f, "10:00", "11:00");
        negative.cost_cents = -1;
        assert!(matches!(
            service.create_booking(&f.member, negative).await,
            Err(AppError::Validation(_))
        ));

        let mut huge = request(&f, "10:00", "11:00");
        huge.cost_cents = 100_000_000_000_000_000;
        assert!(matches!(
            service.create_booking(&f.member, huge).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_court_must_belong_to_club() {
        let f = fixture().await;
        let mut req = request(&f, "10:00", "11:00");
        req.club_id = Uuid::new_v4().to_string();
        assert!(matches!(
            f.ctx.booking_service.create_booking(&f.member, req).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_booking_requires_owner_or_admin() {
        let f = fixture().await;
        let service = &f.ctx.booking_service;
        let booking = service.create_booking(&f.member, request(&f, "10:00", "11:00")).await.unwrap();

        assert!(service.get_booking(&f.member, &booking.id).await.is_ok());
        assert!(service.get_booking(&f.admin, &booking.id).await.is_ok());
        assert!(matches!(
            service.get_booking(&f.outsider, &booking.id).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            service.get_booking(&f.member, "missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_court_day_orders_by_start() {
        let f = fixture().await;
        let service = &f.ctx.booking_service;
        service.create_booking(&f.member, request(&f, "14:00", "15:00")).await.unwrap();
        service.create_booking(&f.member, request(&f, "9:00", "10:00")).await.unwrap();

        let day = service
            .list_court_day(f.club.id, f.court.id, "2024-06-01")
            .await
            .unwrap();
        let starts: Vec<String> = day.iter().map(|b| b.start_time.format("%H:%M").to_string()).collect();
        assert_eq!(starts, vec!["09:00", "14:00"]);

        let other_day = service
            .list_court_day(f.club.id, f.court.id, "2024-06-02")
            .await
            .unwrap();
        assert!(other_day.is_empty());
    }
}
