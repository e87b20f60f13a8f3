//! Payments platform boundary.
//!
//! Services talk to the platform only through [`PaymentGateway`], so the
//! Stripe client can be swapped for [`fake::FakePaymentGateway`] in tests.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::{BillingInterval, ConnectedAccountStatus, PlatformEvent};
use crate::error::AppError;

pub mod stripe_gateway;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use stripe_gateway::StripeGateway;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("card declined: {0}")]
    CardDeclined(String),

    /// The connected account is missing, deauthorized or cannot take charges.
    #[error("connected account invalid: {0}")]
    AccountInvalid(String),

    /// The saved customer or payment method no longer exists.
    #[error("payment method invalid: {0}")]
    PaymentMethodInvalid(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("{0}")]
    Other(String),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::CardDeclined(msg) => AppError::Payment(msg),
            GatewayError::AccountInvalid(msg) => AppError::Validation(format!(
                "The club's payment account is not usable ({}). The club must complete onboarding again.",
                msg
            )),
            GatewayError::PaymentMethodInvalid(msg) => AppError::Validation(format!(
                "Saved payment method is no longer valid ({}). Please add a new one.",
                msg
            )),
            GatewayError::InvalidSignature => AppError::InvalidSignature,
            GatewayError::Other(msg) => AppError::External(format!("Payments platform error: {}", msg)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// Single charge with a fixed application fee.
    Payment,
    /// Recurring charge with a percentage application fee.
    Subscription(BillingInterval),
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub mode: CheckoutMode,
    pub product_name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub destination_account: String,
    pub application_fee_cents: i64,
    pub application_fee_bps: u32,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub metadata: HashMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSessionCreated {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct OffSessionCharge {
    pub amount_cents: i64,
    pub currency: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub destination_account: String,
    pub application_fee_cents: i64,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub payment_intent_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionCreated, GatewayError>;

    /// Create an Express connected account and return its id.
    async fn create_connected_account(&self, email: Option<&str>) -> Result<String, GatewayError>;

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, GatewayError>;

    async fn retrieve_account_status(
        &self,
        account_id: &str,
    ) -> Result<ConnectedAccountStatus, GatewayError>;

    /// Charge a saved payment method without the customer present. Only a
    /// succeeded payment yields a receipt.
    async fn charge_off_session(&self, charge: OffSessionCharge) -> Result<ChargeReceipt, GatewayError>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), GatewayError>;

    /// Verify the signature over the raw payload and parse the event.
    fn construct_event(&self, payload: &str, signature: &str) -> Result<PlatformEvent, GatewayError>;
}
