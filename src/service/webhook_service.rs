//! Exactly-once application of payments platform webhooks.
//!
//! The platform delivers at least once. Each event id is claimed in the
//! `webhook_events` ledger inside the same transaction that applies the
//! event's effects, so a redelivery either finds the claim and does nothing
//! or finds neither claim nor effects (after a rollback) and applies both.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    domain::*,
    error::{AppError, Result},
    payments::PaymentGateway,
    repository::{
        balance_repository::apply_credit,
        booking_repository::{load_booking, save_payment_state, slot_is_free},
        club_repository::{club_by_stripe_account, store_account_status},
        membership_repository::{load_subscription, save_subscription_state, subscription_by_stripe_id},
        webhook_ledger, with_retries,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
}

pub struct WebhookService {
    pool: SqlitePool,
    gateway: Option<Arc<dyn PaymentGateway>>,
    retries: u32,
}

impl WebhookService {
    pub fn new(pool: SqlitePool, gateway: Option<Arc<dyn PaymentGateway>>, retries: u32) -> Self {
        Self {
            pool,
            gateway,
            retries,
        }
    }

    /// Verify, deduplicate and apply one delivery. Store failures are
    /// returned so the platform redelivers; everything else is acknowledged.
    pub async fn handle_webhook(&self, payload: &str, signature: &str) -> Result<WebhookOutcome> {
        let gateway = self
            .gateway
            .as_deref()
            .ok_or_else(|| AppError::ServiceUnavailable("Payments are not configured".to_string()))?;

        let event = gateway.construct_event(payload, signature).map_err(AppError::from)?;
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Webhook verified");

        let event = &event;
        with_retries(self.retries, || self.process(event)).await
    }

    async fn process(&self, event: &PlatformEvent) -> Result<WebhookOutcome> {
        let mut tx = self.pool.begin().await?;

        if !webhook_ledger::record_event(&mut tx, &event.id, &event.event_type).await? {
            tx.rollback().await?;
            tracing::info!(event_id = %event.id, "Duplicate webhook delivery ignored");
            return Ok(WebhookOutcome::Duplicate);
        }

        apply_event(&mut tx, event).await?;
        tx.commit().await?;

        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Webhook processed");
        Ok(WebhookOutcome::Processed)
    }
}

async fn apply_event(conn: &mut SqliteConnection, event: &PlatformEvent) -> Result<()> {
    match &event.payload {
        EventPayload::CheckoutCompleted {
            session_id,
            payment_intent_id,
            subscription_id,
            customer_id,
            metadata,
        } => {
            checkout_completed(
                conn,
                &event.id,
                session_id,
                payment_intent_id.as_deref(),
                subscription_id.as_deref(),
                customer_id.as_deref(),
                metadata,
            )
            .await
        }
        EventPayload::PaymentFailed {
            payment_intent_id,
            failure_message,
            metadata,
        } => {
            payment_failed(
                conn,
                &event.id,
                payment_intent_id,
                failure_message.as_deref(),
                metadata,
            )
            .await
        }
        EventPayload::PaymentSucceeded {
            payment_intent_id,
            amount_cents,
            description,
            metadata,
        } => {
            payment_succeeded(
                conn,
                &event.id,
                payment_intent_id,
                *amount_cents,
                description.as_deref(),
                metadata,
            )
            .await
        }
        EventPayload::AccountUpdated {
            account_id,
            charges_enabled,
            payouts_enabled,
            details_submitted,
        } => {
            let status = ConnectedAccountStatus {
                charges_enabled: *charges_enabled,
                payouts_enabled: *payouts_enabled,
                details_submitted: *details_submitted,
            };
            account_updated(conn, account_id, status).await
        }
        EventPayload::InvoicePaid { subscription_id, .. } => {
            subscription_signal(conn, &event.id, subscription_id.as_deref(), SubscriptionSignal::InvoicePaid)
                .await
        }
        EventPayload::InvoicePaymentFailed { subscription_id, .. } => {
            subscription_signal(
                conn,
                &event.id,
                subscription_id.as_deref(),
                SubscriptionSignal::InvoicePaymentFailed,
            )
            .await
        }
        EventPayload::SubscriptionDeleted { subscription_id } => {
            subscription_signal(conn, &event.id, Some(subscription_id.as_str()), SubscriptionSignal::Deleted).await
        }
        EventPayload::Unhandled => {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring unhandled webhook event");
            Ok(())
        }
    }
}

fn purpose_of(event_id: &str, metadata: &HashMap<String, String>) -> Option<PaymentPurpose> {
    match PaymentPurpose::from_metadata(metadata) {
        Ok(purpose) => Some(purpose),
        Err(e) => {
            tracing::warn!(event_id = %event_id, "Webhook metadata unusable, skipping: {}", e);
            None
        }
    }
}

async fn checkout_completed(
    conn: &mut SqliteConnection,
    event_id: &str,
    session_id: &str,
    payment_intent_id: Option<&str>,
    platform_subscription_id: Option<&str>,
    customer_id: Option<&str>,
    metadata: &HashMap<String, String>,
) -> Result<()> {
    let Some(purpose) = purpose_of(event_id, metadata) else {
        return Ok(());
    };

    match purpose {
        PaymentPurpose::Booking {
            club_id, booking_id, ..
        } => {
            let Some(mut booking) = load_booking(conn, &booking_id).await? else {
                tracing::warn!(event_id = %event_id, booking_id = %booking_id, "Checkout completed for unknown booking");
                return Ok(());
            };
            if booking.club_id != club_id {
                tracing::warn!(event_id = %event_id, booking_id = %booking_id, "Checkout club does not match booking");
                return Ok(());
            }
            if booking.paid {
                tracing::info!(booking_id = %booking_id, "Booking already paid, checkout completion is a no-op");
                return Ok(());
            }

            let reference = payment_intent_id.unwrap_or(session_id);
            let now = Utc::now();
            if booking.status == BookingStatus::Cancelled {
                if !slot_is_free(conn, &booking).await? {
                    booking.record_refund_due("checkout", Some(reference), now)?;
                    save_payment_state(conn, &booking).await?;
                    tracing::error!(
                        booking_id = %booking_id,
                        reference = %reference,
                        amount_cents = booking.cost_cents,
                        "Payment received for a cancelled booking whose slot was rebooked; refund required"
                    );
                    return Ok(());
                }
                booking.reinstate(now);
                tracing::info!(booking_id = %booking_id, "Cancelled booking reinstated by late payment");
            }

            booking.complete_payment("checkout", Some(reference), now)?;
            save_payment_state(conn, &booking).await?;
            tracing::info!(booking_id = %booking_id, reference = %reference, "Booking paid via checkout");
        }
        PaymentPurpose::Membership { subscription_id, .. } => {
            let Some(mut subscription) = load_subscription(conn, subscription_id).await? else {
                tracing::warn!(event_id = %event_id, subscription_id = %subscription_id, "Checkout completed for unknown subscription");
                return Ok(());
            };
            if subscription.checkout_session_id != session_id {
                tracing::warn!(
                    event_id = %event_id,
                    subscription_id = %subscription_id,
                    expected = %subscription.checkout_session_id,
                    received = %session_id,
                    "Checkout session does not match subscription record"
                );
                return Ok(());
            }

            if subscription.stripe_subscription_id.is_none() {
                subscription.stripe_subscription_id = platform_subscription_id.map(str::to_string);
            }
            if let Some(customer) = customer_id {
                subscription.stripe_customer_id = Some(customer.to_string());
            }
            if let Some((status, payment_status)) = subscription.status.apply(SubscriptionSignal::CheckoutCompleted) {
                subscription.status = status;
                subscription.payment_status = payment_status;
            }
            subscription.updated_at = Utc::now();
            save_subscription_state(conn, &subscription).await?;
            tracing::info!(
                subscription_id = %subscription_id,
                status = subscription.status.as_str(),
                "Membership checkout completed"
            );
        }
        PaymentPurpose::TopUp { .. } => {
            tracing::debug!(event_id = %event_id, "Top-up checkout completion needs no action");
        }
    }

    Ok(())
}

/// Off-session top-ups are credited when charged; this catches the ones
/// whose credit did not land. The ledger's payment reference keeps it to one
/// credit per payment intent.
async fn payment_succeeded(
    conn: &mut SqliteConnection,
    event_id: &str,
    payment_intent_id: &str,
    amount_cents: i64,
    description: Option<&str>,
    metadata: &HashMap<String, String>,
) -> Result<()> {
    let Ok(PaymentPurpose::TopUp { club_id, user_id }) = PaymentPurpose::from_metadata(metadata) else {
        tracing::debug!(event_id = %event_id, payment_intent = %payment_intent_id, "Succeeded payment is not a top-up");
        return Ok(());
    };
    if amount_cents <= 0 {
        tracing::warn!(event_id = %event_id, payment_intent = %payment_intent_id, "Top-up succeeded with no amount");
        return Ok(());
    }

    let description = description.unwrap_or("Account top-up");
    let (transaction, credited) =
        apply_credit(conn, user_id, club_id, amount_cents, Some(payment_intent_id), description).await?;
    if credited {
        tracing::warn!(
            user_id = %user_id,
            club_id = %club_id,
            payment_intent = %payment_intent_id,
            amount_cents,
            "Top-up credited from webhook after the direct credit was missed"
        );
    } else {
        tracing::debug!(transaction_id = %transaction.id, "Top-up already credited");
    }
    Ok(())
}

async fn payment_failed(
    conn: &mut SqliteConnection,
    event_id: &str,
    payment_intent_id: &str,
    failure_message: Option<&str>,
    metadata: &HashMap<String, String>,
) -> Result<()> {
    let Some(purpose) = purpose_of(event_id, metadata) else {
        return Ok(());
    };

    let booking_id = match purpose {
        PaymentPurpose::Booking { booking_id, .. } => booking_id,
        other => {
            tracing::info!(
                event_id = %event_id,
                payment_intent = %payment_intent_id,
                kind = other.kind(),
                "Payment failed for non-booking purpose"
            );
            return Ok(());
        }
    };

    let Some(mut booking) = load_booking(conn, &booking_id).await? else {
        tracing::warn!(event_id = %event_id, booking_id = %booking_id, "Payment failed for unknown booking");
        return Ok(());
    };
    if booking.paid {
        tracing::info!(booking_id = %booking_id, "Ignoring payment failure for paid booking");
        return Ok(());
    }
    if booking.status == BookingStatus::Cancelled {
        return Ok(());
    }

    let reason = failure_message.unwrap_or("Payment failed");
    booking.cancel_for_failed_payment(reason, Utc::now())?;
    save_payment_state(conn, &booking).await?;
    tracing::info!(booking_id = %booking_id, reason = %reason, "Booking cancelled after failed payment");
    Ok(())
}

async fn account_updated(
    conn: &mut SqliteConnection,
    account_id: &str,
    status: ConnectedAccountStatus,
) -> Result<()> {
    let Some(club) = club_by_stripe_account(conn, account_id).await? else {
        tracing::info!(account_id = %account_id, "Account update for an account no club uses");
        return Ok(());
    };

    store_account_status(conn, club.id, status).await?;
    tracing::info!(
        club_id = %club.id,
        charges_enabled = status.charges_enabled,
        payouts_enabled = status.payouts_enabled,
        "Connected account status updated"
    );
    Ok(())
}

async fn subscription_signal(
    conn: &mut SqliteConnection,
    event_id: &str,
    platform_subscription_id: Option<&str>,
    signal: SubscriptionSignal,
) -> Result<()> {
    let Some(platform_id) = platform_subscription_id else {
        tracing::debug!(event_id = %event_id, "Invoice without subscription");
        return Ok(());
    };
    let Some(mut subscription) = subscription_by_stripe_id(conn, platform_id).await? else {
        tracing::info!(event_id = %event_id, subscription = %platform_id, ?signal, "No membership for platform subscription");
        return Ok(());
    };

    match subscription.status.apply(signal) {
        Some((status, payment_status)) => {
            let previous = subscription.status;
            subscription.status = status;
            subscription.payment_status = payment_status;
            subscription.updated_at = Utc::now();
            save_subscription_state(conn, &subscription).await?;
            tracing::info!(
                subscription_id = %subscription.id,
                from = previous.as_str(),
                to = status.as_str(),
                "Membership status changed"
            );
        }
        None => {
            tracing::debug!(
                subscription_id = %subscription.id,
                status = subscription.status.as_str(),
                ?signal,
                "Signal does not apply in current state"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::fake::FakePaymentGateway;
    use crate::repository::webhook_ledger::is_processed;
    use crate::service::testing::{book, fixture, Fixture};

    fn event(id: &str, event_type: &str, payload: EventPayload) -> (String, String) {
        FakePaymentGateway::sign(&PlatformEvent {
            id: id.to_string(),
            event_type: event_type.to_string(),
            payload,
        })
    }

    fn booking_checkout(f: &Fixture, booking: &Booking, session_id: &str) -> EventPayload {
        EventPayload::CheckoutCompleted {
            session_id: session_id.to_string(),
            payment_intent_id: Some(format!("pi_{}", session_id)),
            subscription_id: None,
            customer_id: None,
            metadata: PaymentPurpose::Booking {
                club_id: f.club.id,
                booking_id: booking.id.clone(),
                user_id: booking.user_id,
            }
            .to_metadata(),
        }
    }

    async fn deliver(f: &Fixture, (payload, signature): (String, String)) -> Result<WebhookOutcome> {
        f.ctx.webhook_service.handle_webhook(&payload, &signature).await
    }

    /// A membership checkout opened through the service, with its session id.
    async fn open_membership(f: &Fixture) -> (MembershipSubscription, String) {
        let plan = f
            .ctx
            .club_service
            .create_plan(
                &f.admin,
                f.club.id,
                CreatePlanRequest {
                    name: "Monthly".into(),
                    price_cents: 4_000,
                    billing_interval: "month".into(),
                },
            )
            .await
            .unwrap();
        let session = f
            .ctx
            .payment_service
            .create_checkout_session(&f.member, f.club.id, CheckoutTarget::Membership { plan_id: plan.id })
            .await
            .unwrap();
        let subscription = f.ctx.club_service.list_memberships(&f.member).await.unwrap().remove(0);
        (subscription, session.session_id)
    }

    fn membership_checkout(f: &Fixture, subscription: &MembershipSubscription, session_id: &str) -> EventPayload {
        EventPayload::CheckoutCompleted {
            session_id: session_id.to_string(),
            payment_intent_id: None,
            subscription_id: Some("sub_123".to_string()),
            customer_id: Some("cus_123".to_string()),
            metadata: PaymentPurpose::Membership {
                club_id: f.club.id,
                plan_id: subscription.plan_id,
                user_id: subscription.user_id,
                subscription_id: subscription.id,
            }
            .to_metadata(),
        }
    }

    fn invoice_paid() -> EventPayload {
        EventPayload::InvoicePaid {
            invoice_id: "in_1".to_string(),
            subscription_id: Some("sub_123".to_string()),
        }
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_before_ledger() {
        let f = fixture().await;
        let booking = book(&f, "10:00", "11:00").await;
        let (payload, _) = event("evt_forged", "checkout.session.completed", booking_checkout(&f, &booking, "cs_1"));

        let err = f
            .ctx
            .webhook_service
            .handle_webhook(&payload, "t=0,v1=forged")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidSignature));
        assert!(!is_processed(&f.pool, "evt_forged").await.unwrap());

        let stored = f.ctx.booking_repo.find_by_id(&booking.id).await.unwrap().unwrap();
        assert!(!stored.paid);
    }

    #[tokio::test]
    async fn test_checkout_completion_pays_booking_once() {
        let f = fixture().await;
        let booking = book(&f, "10:00", "11:00").await;
        let delivery = event("evt_1", "checkout.session.completed", booking_checkout(&f, &booking, "cs_1"));

        assert_eq!(deliver(&f, delivery.clone()).await.unwrap(), WebhookOutcome::Processed);
        let paid = f.ctx.booking_repo.find_by_id(&booking.id).await.unwrap().unwrap();
        assert!(paid.paid);
        assert_eq!(paid.payment_method.as_deref(), Some("checkout"));
        assert_eq!(paid.payment_reference.as_deref(), Some("pi_cs_1"));

        assert_eq!(deliver(&f, delivery).await.unwrap(), WebhookOutcome::Duplicate);
        let again = f.ctx.booking_repo.find_by_id(&booking.id).await.unwrap().unwrap();
        assert_eq!(again.payment_completed_at, paid.payment_completed_at);
        assert!(is_processed(&f.pool, "evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_second_checkout_event_for_paid_booking_is_noop() {
        let f = fixture().await;
        let booking = book(&f, "10:00", "11:00").await;
        deliver(&f, event("evt_1", "checkout.session.completed", booking_checkout(&f, &booking, "cs_1")))
            .await
            .unwrap();

        let outcome = deliver(&f, event("evt_2", "checkout.session.completed", booking_checkout(&f, &booking, "cs_2")))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let stored = f.ctx.booking_repo.find_by_id(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_reference.as_deref(), Some("pi_cs_1"));
    }

    #[tokio::test]
    async fn test_payment_failure_releases_slot() {
        let f = fixture().await;
        let booking = book(&f, "10:00", "11:00").await;
        f.ctx.payment_service.begin_payment(&f.member, &booking.id).await.unwrap();

        let failed = EventPayload::PaymentFailed {
            payment_intent_id: "pi_1".to_string(),
            failure_message: Some("Your card has insufficient funds.".to_string()),
            metadata: PaymentPurpose::Booking {
                club_id: f.club.id,
                booking_id: booking.id.clone(),
                user_id: f.member.id,
            }
            .to_metadata(),
        };
        deliver(&f, event("evt_fail", "payment_intent.payment_failed", failed)).await.unwrap();

        let stored = f.ctx.booking_repo.find_by_id(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert!(!stored.payment_in_progress);
        assert_eq!(stored.last_payment_error.as_deref(), Some("Your card has insufficient funds."));

        // The cancelled booking no longer blocks its slot.
        book(&f, "10:00", "11:00").await;
    }

    fn booking_failed(f: &Fixture, booking: &Booking) -> EventPayload {
        EventPayload::PaymentFailed {
            payment_intent_id: "pi_cs_1".to_string(),
            failure_message: Some("Your card was declined.".to_string()),
            metadata: PaymentPurpose::Booking {
                club_id: f.club.id,
                booking_id: booking.id.clone(),
                user_id: booking.user_id,
            }
            .to_metadata(),
        }
    }

    async fn confirmed_on_court(f: &Fixture) -> Vec<Booking> {
        f.ctx
            .booking_repo
            .list_confirmed_for_day(f.club.id, f.court.id, chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_late_checkout_after_rebooking_leaves_booking_cancelled() {
        let f = fixture().await;
        let first = book(&f, "10:00", "11:00").await;
        deliver(&f, event("evt_fail", "payment_intent.payment_failed", booking_failed(&f, &first)))
            .await
            .unwrap();
        let second = book(&f, "10:00", "11:00").await;

        let outcome = deliver(&f, event("evt_paid", "checkout.session.completed", booking_checkout(&f, &first, "cs_1")))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let confirmed = confirmed_on_court(&f).await;
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, second.id);

        let stored = f.ctx.booking_repo.find_by_id(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert!(stored.paid);
        assert_eq!(stored.payment_reference.as_deref(), Some("pi_cs_1"));
        assert_eq!(stored.last_payment_error.as_deref(), Some(REFUND_DUE));
    }

    #[tokio::test]
    async fn test_late_checkout_reinstates_booking_when_slot_is_free() {
        let f = fixture().await;
        let booking = book(&f, "10:00", "11:00").await;
        deliver(&f, event("evt_fail", "payment_intent.payment_failed", booking_failed(&f, &booking)))
            .await
            .unwrap();
        // Touching slot only, no overlap.
        book(&f, "11:00", "12:00").await;

        deliver(&f, event("evt_paid", "checkout.session.completed", booking_checkout(&f, &booking, "cs_1")))
            .await
            .unwrap();

        let stored = f.ctx.booking_repo.find_by_id(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert!(stored.paid);
        assert!(stored.last_payment_error.is_none());
        assert_eq!(confirmed_on_court(&f).await.len(), 2);
    }

    #[tokio::test]
    async fn test_payment_failure_after_payment_is_ignored() {
        let f = fixture().await;
        let booking = book(&f, "10:00", "11:00").await;
        deliver(&f, event("evt_1", "checkout.session.completed", booking_checkout(&f, &booking, "cs_1")))
            .await
            .unwrap();

        let failed = EventPayload::PaymentFailed {
            payment_intent_id: "pi_late".to_string(),
            failure_message: None,
            metadata: PaymentPurpose::Booking {
                club_id: f.club.id,
                booking_id: booking.id.clone(),
                user_id: f.member.id,
            }
            .to_metadata(),
        };
        deliver(&f, event("evt_2", "payment_intent.payment_failed", failed)).await.unwrap();

        let stored = f.ctx.booking_repo.find_by_id(&booking.id).await.unwrap().unwrap();
        assert!(stored.paid);
        assert_eq!(stored.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_missing_metadata_is_acknowledged() {
        let f = fixture().await;
        let payload = EventPayload::CheckoutCompleted {
            session_id: "cs_x".to_string(),
            payment_intent_id: None,
            subscription_id: None,
            customer_id: None,
            metadata: HashMap::new(),
        };
        let outcome = deliver(&f, event("evt_meta", "checkout.session.completed", payload)).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);
        assert!(is_processed(&f.pool, "evt_meta").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_event_type_acknowledged_without_mutation() {
        let f = fixture().await;
        let booking = book(&f, "10:00", "11:00").await;
        let outcome = deliver(&f, event("evt_other", "charge.dispute.created", EventPayload::Unhandled))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let stored = f.ctx.booking_repo.find_by_id(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, booking.updated_at);
        assert!(!stored.paid);
    }

    #[tokio::test]
    async fn test_account_updated_refreshes_club() {
        let f = fixture().await;
        let update = EventPayload::AccountUpdated {
            account_id: f.club.stripe_account_id.clone().unwrap(),
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: true,
        };
        deliver(&f, event("evt_acct", "account.updated", update)).await.unwrap();

        let club = f.ctx.club_service.get_club(f.club.id).await.unwrap();
        assert!(!club.charges_enabled);
        assert!(club.details_submitted);
        assert!(club.payable_account().is_none());
    }

    #[tokio::test]
    async fn test_membership_checkout_activates_subscription() {
        let f = fixture().await;
        let (subscription, session_id) = open_membership(&f).await;

        deliver(&f, event("evt_1", "checkout.session.completed", membership_checkout(&f, &subscription, &session_id)))
            .await
            .unwrap();

        let stored = f.ctx.membership_repo.find_subscription(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.payment_status, SubscriptionPaymentStatus::Paid);
        assert_eq!(stored.stripe_subscription_id.as_deref(), Some("sub_123"));
        assert_eq!(stored.stripe_customer_id.as_deref(), Some("cus_123"));
    }

    #[tokio::test]
    async fn test_mismatched_session_does_not_mutate_subscription() {
        let f = fixture().await;
        let (subscription, _) = open_membership(&f).await;

        deliver(&f, event("evt_1", "checkout.session.completed", membership_checkout(&f, &subscription, "cs_other")))
            .await
            .unwrap();

        let stored = f.ctx.membership_repo.find_subscription(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Incomplete);
        assert!(stored.stripe_subscription_id.is_none());
    }

    #[tokio::test]
    async fn test_invoice_order_does_not_change_outcome() {
        // Checkout first, then invoice.
        let f = fixture().await;
        let (subscription, session_id) = open_membership(&f).await;
        deliver(&f, event("evt_1", "checkout.session.completed", membership_checkout(&f, &subscription, &session_id)))
            .await
            .unwrap();
        deliver(&f, event("evt_2", "invoice.paid", invoice_paid())).await.unwrap();
        let first = f.ctx.membership_repo.find_subscription(subscription.id).await.unwrap().unwrap();

        // Invoice first, then checkout.
        let g = fixture().await;
        let (subscription, session_id) = open_membership(&g).await;
        deliver(&g, event("evt_2", "invoice.paid", invoice_paid())).await.unwrap();
        deliver(&g, event("evt_1", "checkout.session.completed", membership_checkout(&g, &subscription, &session_id)))
            .await
            .unwrap();
        let second = g.ctx.membership_repo.find_subscription(subscription.id).await.unwrap().unwrap();

        assert_eq!(first.status, SubscriptionStatus::Active);
        assert_eq!(first.status, second.status);
        assert_eq!(first.payment_status, second.payment_status);
    }

    #[tokio::test]
    async fn test_invoice_failure_then_recovery() {
        let f = fixture().await;
        let (subscription, session_id) = open_membership(&f).await;
        deliver(&f, event("evt_1", "checkout.session.completed", membership_checkout(&f, &subscription, &session_id)))
            .await
            .unwrap();

        let failed = EventPayload::InvoicePaymentFailed {
            invoice_id: "in_2".to_string(),
            subscription_id: Some("sub_123".to_string()),
        };
        deliver(&f, event("evt_2", "invoice.payment_failed", failed)).await.unwrap();
        let past_due = f.ctx.membership_repo.find_subscription(subscription.id).await.unwrap().unwrap();
        assert_eq!(past_due.status, SubscriptionStatus::PastDue);
        assert_eq!(past_due.payment_status, SubscriptionPaymentStatus::Failed);

        deliver(&f, event("evt_3", "invoice.paid", invoice_paid())).await.unwrap();
        let recovered = f.ctx.membership_repo.find_subscription(subscription.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_deleted_subscription_is_terminal() {
        let f = fixture().await;
        let (subscription, session_id) = open_membership(&f).await;
        deliver(&f, event("evt_1", "checkout.session.completed", membership_checkout(&f, &subscription, &session_id)))
            .await
            .unwrap();

        let deleted = EventPayload::SubscriptionDeleted {
            subscription_id: "sub_123".to_string(),
        };
        deliver(&f, event("evt_2", "customer.subscription.deleted", deleted)).await.unwrap();
        deliver(&f, event("evt_3", "invoice.paid", invoice_paid())).await.unwrap();

        let stored = f.ctx.membership_repo.find_subscription(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_is_unavailable() {
        let f = fixture().await;
        let service = WebhookService::new(f.pool.clone(), None, 1);
        assert!(matches!(
            service.handle_webhook("{}", "sig").await,
            Err(AppError::ServiceUnavailable(_))
        ));
    }
}
