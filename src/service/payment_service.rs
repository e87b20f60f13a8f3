use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::Settings,
    domain::*,
    error::{AppError, Result},
    payments::{
        CheckoutMode, CheckoutRequest, CheckoutSessionCreated, GatewayError, OffSessionCharge,
        PaymentGateway,
    },
    repository::{
        BalanceRepository, BookingRepository, ClubRepository, MembershipRepository, UserRepository,
    },
    service::validation_message,
};

const LEDGER_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone)]
pub struct PaymentOptions {
    pub platform_fee_bps: u32,
    pub currency: String,
    pub payment_hold_minutes: i64,
    pub base_url: String,
}

impl PaymentOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            platform_fee_bps: settings.stripe.platform_fee_bps,
            currency: settings.stripe.currency.clone(),
            payment_hold_minutes: settings.payments.payment_hold_minutes,
            base_url: settings.server.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OnboardingLink {
    pub account_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummary {
    pub club_id: Uuid,
    pub balance_cents: i64,
    pub transactions: Vec<BalanceTransaction>,
}

pub struct PaymentService {
    booking_repo: Arc<dyn BookingRepository>,
    club_repo: Arc<dyn ClubRepository>,
    user_repo: Arc<dyn UserRepository>,
    membership_repo: Arc<dyn MembershipRepository>,
    balance_repo: Arc<dyn BalanceRepository>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    options: PaymentOptions,
}

impl PaymentService {
    pub fn new(
        booking_repo: Arc<dyn BookingRepository>,
        club_repo: Arc<dyn ClubRepository>,
        user_repo: Arc<dyn UserRepository>,
        membership_repo: Arc<dyn MembershipRepository>,
        balance_repo: Arc<dyn BalanceRepository>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        options: PaymentOptions,
    ) -> Self {
        Self {
            booking_repo,
            club_repo,
            user_repo,
            membership_repo,
            balance_repo,
            gateway,
            options,
        }
    }

    fn gateway(&self) -> Result<&dyn PaymentGateway> {
        self.gateway
            .as_deref()
            .ok_or_else(|| AppError::ServiceUnavailable("Payments are not configured".to_string()))
    }

    async fn find_club(&self, club_id: Uuid) -> Result<Club> {
        self.club_repo
            .find_by_id(club_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Club not found".to_string()))
    }

    async fn require_admin(&self, user: &User, club_id: Uuid) -> Result<Club> {
        let club = self.find_club(club_id).await?;
        if !self.club_repo.is_admin(club_id, user.id).await? {
            return Err(AppError::Forbidden);
        }
        Ok(club)
    }

    fn payable_account(club: &Club) -> Result<String> {
        club.payable_account().map(str::to_string).ok_or_else(|| {
            AppError::Validation("This club cannot accept payments until it completes onboarding".to_string())
        })
    }

    async fn authorized_booking(&self, user: &User, id: &str) -> Result<Booking> {
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

    /// Clear stored references the platform reported as unusable, then
    /// convert the error for the caller.
    async fn handle_gateway_error(&self, club_id: Uuid, user: &User, err: GatewayError) -> AppError {
        match &err {
            GatewayError::AccountInvalid(msg) => {
                tracing::warn!(club_id = %club_id, "Connected account rejected by platform, clearing it: {}", msg);
                if let Err(e) = self.club_repo.set_stripe_account(club_id, None).await {
                    tracing::error!(club_id = %club_id, "Failed to clear connected account: {}", e);
                }
            }
            GatewayError::PaymentMethodInvalid(msg) => {
                tracing::warn!(user_id = %user.id, "Saved payment method rejected by platform, clearing it: {}", msg);
                if let Err(e) = self.user_repo.set_payment_method(user.id, None, None).await {
                    tracing::error!(user_id = %user.id, "Failed to clear saved payment method: {}", e);
                }
            }
            GatewayError::CardDeclined(msg) => {
                tracing::info!(user_id = %user.id, club_id = %club_id, "Card declined: {}", msg);
            }
            _ => {}
        }
        err.into()
    }

    pub async fn begin_payment(&self, user: &User, booking_id: &str) -> Result<Booking> {
        self.authorized_booking(user, booking_id).await?;
        let booking = self.booking_repo.begin_payment(booking_id).await?;
        tracing::info!(booking_id = %booking.id, "Payment attempt started");
        Ok(booking)
    }

    pub async fn complete_payment(
        &self,
        user: &User,
        booking_id: &str,
        request: CompletePaymentRequest,
    ) -> Result<Booking> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;
        self.authorized_booking(user, booking_id).await?;

        let reference = request.reference.as_deref().filter(|r| !r.trim().is_empty());
        let booking = self
            .booking_repo
            .complete_payment(booking_id, request.method.trim(), reference)
            .await?;
        tracing::info!(booking_id = %booking.id, method = %request.method, "Booking paid");
        Ok(booking)
    }

    pub async fn fail_payment(
        &self,
        user: &User,
        booking_id: &str,
        request: FailPaymentRequest,
    ) -> Result<Booking> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;
        self.authorized_booking(user, booking_id).await?;

        let booking = self.booking_repo.fail_payment(booking_id, &request.reason).await?;
        tracing::info!(booking_id = %booking.id, reason = %request.reason, "Payment attempt failed");
        Ok(booking)
    }

    /// Release payment holds older than the configured hold time.
    pub async fn release_stale_payments(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::minutes(self.options.payment_hold_minutes);
        let released = self.booking_repo.release_stale_payments(cutoff).await?;
        if released > 0 {
            tracing::info!(released, "Released stale payment holds");
        }
        Ok(released)
    }

    /// Charge the user's saved payment method and credit their balance with
    /// the club. The club receives the amount minus the platform fee.
    pub async fn charge_saved_method(
        &self,
        user: &User,
        club_id: Uuid,
        amount_cents: i64,
        description: &str,
    ) -> Result<BalanceTransaction> {
        if amount_cents <= 0 || amount_cents > MAX_AMOUNT_CENTS {
            return Err(AppError::Validation(format!(
                "amount_cents must be between 1 and {}",
                MAX_AMOUNT_CENTS
            )));
        }
        let gateway = self.gateway()?;

        let (customer_id, payment_method_id) = user
            .saved_payment_method()
            .ok_or_else(|| AppError::Validation("No saved payment method on file".to_string()))?;

        let club = self.find_club(club_id).await?;
        let destination = Self::payable_account(&club)?;
        let fee = platform_fee(amount_cents, self.options.platform_fee_bps)?;

        let charge = OffSessionCharge {
            amount_cents,
            currency: self.options.currency.clone(),
            customer_id: customer_id.to_string(),
            payment_method_id: payment_method_id.to_string(),
            destination_account: destination,
            application_fee_cents: fee,
            description: description.to_string(),
            metadata: PaymentPurpose::TopUp {
                club_id,
                user_id: user.id,
            }
            .to_metadata(),
        };

        let receipt = match gateway.charge_off_session(charge).await {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.handle_gateway_error(club_id, user, err).await),
        };

        // The payment_intent.succeeded webhook credits the same reference if
        // this write is lost.
        let transaction = self
            .balance_repo
            .credit(
                user.id,
                club_id,
                amount_cents,
                Some(&receipt.payment_intent_id),
                description,
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    user_id = %user.id,
                    club_id = %club_id,
                    payment_intent = %receipt.payment_intent_id,
                    amount_cents,
                    "Charge succeeded but balance credit failed, awaiting webhook: {}",
                    e
                );
                e
            })?;

        tracing::info!(
            user_id = %user.id,
            club_id = %club_id,
            amount_cents,
            fee_cents = fee,
            payment_intent = %receipt.payment_intent_id,
            "Balance topped up"
        );
        Ok(transaction)
    }

    pub async fn top_up(&self, user: &User, club_id: Uuid, request: TopUpRequest) -> Result<BalanceTransaction> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;
        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or("Account top-up")
            .to_string();
        self.charge_saved_method(user, club_id, request.amount_cents, &description)
            .await
    }

    pub async fn balance(&self, user: &User, club_id: Uuid) -> Result<BalanceSummary> {
        self.find_club(club_id).await?;
        let balance_cents = self
            .balance_repo
            .get_balance(user.id, club_id)
            .await?
            .map(|b| b.balance_cents)
            .unwrap_or(0);
        let transactions = self
            .balance_repo
            .list_transactions(user.id, club_id, LEDGER_PAGE_SIZE)
            .await?;

        Ok(BalanceSummary {
            club_id,
            balance_cents,
            transactions,
        })
    }

    pub async fn create_checkout_session(
        &self,
        user: &User,
        club_id: Uuid,
        target: CheckoutTarget,
    ) -> Result<CheckoutSessionCreated> {
        let gateway = self.gateway()?;
        let club = self.find_club(club_id).await?;
        let destination = Self::payable_account(&club)?;

        match target {
            CheckoutTarget::Booking { booking_id } => {
                self.booking_checkout(gateway, user, &club, destination, &booking_id)
                    .await
            }
            CheckoutTarget::Membership { plan_id } => {
                self.membership_checkout(gateway, user, &club, destination, plan_id)
                    .await
            }
        }
    }

    async fn booking_checkout(
        &self,
        gateway: &dyn PaymentGateway,
        user: &User,
        club: &Club,
        destination: String,
        booking_id: &str,
    ) -> Result<CheckoutSessionCreated> {
        let booking = self
            .booking_repo
            .find_by_id(booking_id)
            .await?
            .filter(|b| b.club_id == club.id)
            .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;
        if booking.user_id != user.id {
            return Err(AppError::Forbidden);
        }
        if booking.cost_cents <= 0 {
            return Err(AppError::Validation("Booking has no amount due".to_string()));
        }
        let application_fee_cents = platform_fee(booking.cost_cents, self.options.platform_fee_bps)?;

        // Admission control: a second concurrent checkout is refused here.
        self.booking_repo.begin_payment(booking_id).await?;

        let request = CheckoutRequest {
            mode: CheckoutMode::Payment,
            product_name: format!(
                "{} court booking {} {}-{}",
                club.name,
                booking.date,
                booking.start_time.format("%H:%M"),
                booking.end_time.format("%H:%M")
            ),
            amount_cents: booking.cost_cents,
            currency: self.options.currency.clone(),
            destination_account: destination,
            application_fee_cents,
            application_fee_bps: self.options.platform_fee_bps,
            customer_id: user.stripe_customer_id.clone(),
            customer_email: Some(user.email.clone()),
            metadata: PaymentPurpose::Booking {
                club_id: club.id,
                booking_id: booking.id.clone(),
                user_id: user.id,
            }
            .to_metadata(),
            success_url: format!("{}/bookings/{}?checkout=success", self.options.base_url, booking.id),
            cancel_url: format!("{}/bookings/{}?checkout=cancelled", self.options.base_url, booking.id),
        };

        match gateway.create_checkout_session(request).await {
            Ok(session) => {
                tracing::info!(
                    booking_id = %booking.id,
                    session_id = %session.session_id,
                    "Checkout session created for booking"
                );
                Ok(session)
            }
            Err(err) => {
                if let Err(e) = self.booking_repo.fail_payment(booking_id, &err.to_string()).await {
                    tracing::error!(booking_id = %booking_id, "Failed to release payment hold: {}", e);
                }
                Err(self.handle_gateway_error(club.id, user, err).await)
            }
        }
    }

    async fn membership_checkout(
        &self,
        gateway: &dyn PaymentGateway,
        user: &User,
        club: &Club,
        destination: String,
        plan_id: Uuid,
    ) -> Result<CheckoutSessionCreated> {
        let plan = self
            .membership_repo
            .find_plan(plan_id)
            .await?
            .filter(|p| p.club_id == club.id && p.is_active)
            .ok_or_else(|| AppError::NotFound("Membership plan not found".to_string()))?;

        let application_fee_cents = platform_fee(plan.price_cents, self.options.platform_fee_bps)?;
        let subscription_id = Uuid::new_v4();
        let mode = if plan.billing_interval.is_recurring() {
            CheckoutMode::Subscription(plan.billing_interval)
        } else {
            CheckoutMode::Payment
        };

        let request = CheckoutRequest {
            mode,
            product_name: format!("{} membership: {}", club.name, plan.name),
            amount_cents: plan.price_cents,
            currency: self.options.currency.clone(),
            destination_account: destination,
            application_fee_cents,
            application_fee_bps: self.options.platform_fee_bps,
            customer_id: user.stripe_customer_id.clone(),
            customer_email: Some(user.email.clone()),
            metadata: PaymentPurpose::Membership {
                club_id: club.id,
                plan_id: plan.id,
                user_id: user.id,
                subscription_id,
            }
            .to_metadata(),
            success_url: format!("{}/memberships/{}?checkout=success", self.options.base_url, subscription_id),
            cancel_url: format!("{}/clubs/{}/plans?checkout=cancelled", self.options.base_url, club.id),
        };

        let session = match gateway.create_checkout_session(request).await {
            Ok(session) => session,
            Err(err) => return Err(self.handle_gateway_error(club.id, user, err).await),
        };

        let now = Utc::now();
        self.membership_repo
            .create_subscription(MembershipSubscription {
                id: subscription_id,
                club_id: club.id,
                user_id: user.id,
                plan_id: plan.id,
                status: SubscriptionStatus::Incomplete,
                payment_status: SubscriptionPaymentStatus::RequiresPayment,
                price_cents: plan.price_cents,
                billing_interval: plan.billing_interval,
                checkout_session_id: session.session_id.clone(),
                stripe_subscription_id: None,
                stripe_customer_id: user.stripe_customer_id.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(
            subscription_id = %subscription_id,
            plan_id = %plan.id,
            session_id = %session.session_id,
            "Checkout session created for membership"
        );
        Ok(session)
    }

    /// Create the club's connected account on first use and return a link
    /// to the platform's hosted onboarding.
    pub async fn onboard_club(&self, user: &User, club_id: Uuid) -> Result<OnboardingLink> {
        let club = self.require_admin(user, club_id).await?;
        let gateway = self.gateway()?;

        let account_id = match club.stripe_account_id {
            Some(account_id) => account_id,
            None => {
                let account_id = gateway
                    .create_connected_account(Some(&user.email))
                    .await
                    .map_err(AppError::from)?;
                self.club_repo
                    .set_stripe_account(club_id, Some(&account_id))
                    .await?;
                account_id
            }
        };

        let refresh_url = format!("{}/clubs/{}/connect/refresh", self.options.base_url, club_id);
        let return_url = format!("{}/clubs/{}/connect/return", self.options.base_url, club_id);
        let url = match gateway
            .create_onboarding_link(&account_id, &refresh_url, &return_url)
            .await
        {
            Ok(url) => url,
            Err(err) => return Err(self.handle_gateway_error(club_id, user, err).await),
        };

        Ok(OnboardingLink { account_id, url })
    }

    /// Pull the connected account's capability flags from the platform.
    pub async fn refresh_club_account(&self, user: &User, club_id: Uuid) -> Result<Club> {
        let club = self.require_admin(user, club_id).await?;
        let gateway = self.gateway()?;
        let account_id = club
            .stripe_account_id
            .ok_or_else(|| AppError::Validation("Club has not started onboarding".to_string()))?;

        let status = match gateway.retrieve_account_status(&account_id).await {
            Ok(status) => status,
            Err(err) => return Err(self.handle_gateway_error(club_id, user, err).await),
        };

        let club = self.club_repo.update_account_status(club_id, status).await?;
        tracing::info!(
            club_id = %club_id,
            charges_enabled = status.charges_enabled,
            payouts_enabled = status.payouts_enabled,
            "Connected account status refreshed"
        );
        Ok(club)
    }

    pub async fn cancel_membership(&self, user: &User, subscription_id: Uuid) -> Result<MembershipSubscription> {
        let subscription = self
            .membership_repo
            .find_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;
        if subscription.user_id != user.id {
            return Err(AppError::Forbidden);
        }
        if subscription.status == SubscriptionStatus::Canceled {
            return Ok(subscription);
        }

        if let Some(platform_id) = subscription.stripe_subscription_id.as_deref() {
            self.gateway()?
                .cancel_subscription(platform_id)
                .await
                .map_err(AppError::from)?;
        }

        let subscription = self.membership_repo.mark_canceled(subscription_id).await?;
        tracing::info!(subscription_id = %subscription_id, "Membership canceled by member");
        Ok(subscription)
    }

    pub async fn save_payment_method(&self, user: &User, request: SavePaymentMethodRequest) -> Result<User> {
        request
            .validate()
            .map_err(|e| AppError::Validation(validation_message(e)))?;
        self.user_repo
            .set_payment_method(
                user.id,
                Some(request.customer_id.trim()),
                Some(request.payment_method_id.trim()),
            )
            .await
    }
}
