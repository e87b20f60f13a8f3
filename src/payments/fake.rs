//! In-memory gateway for tests and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{ConnectedAccountStatus, PlatformEvent};
use crate::payments::{
    ChargeReceipt, CheckoutRequest, CheckoutSessionCreated, GatewayError, OffSessionCharge,
    PaymentGateway,
};

/// The only signature [`FakePaymentGateway::construct_event`] accepts.
pub const VALID_SIGNATURE: &str = "t=0,v1=fake-valid-signature";

#[derive(Default)]
struct FakeState {
    checkout_requests: Vec<CheckoutRequest>,
    charges: Vec<OffSessionCharge>,
    payment_intents: Vec<String>,
    canceled_subscriptions: Vec<String>,
    accounts: HashMap<String, ConnectedAccountStatus>,
    next_checkout_error: Option<GatewayError>,
    next_charge_error: Option<GatewayError>,
}

#[derive(Default)]
pub struct FakePaymentGateway {
    state: Mutex<FakeState>,
}

impl FakePaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize an event the way a signed delivery would arrive.
    pub fn sign(event: &PlatformEvent) -> (String, String) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        (payload, VALID_SIGNATURE.to_string())
    }

    pub fn fail_next_checkout(&self, error: GatewayError) {
        self.lock().next_checkout_error = Some(error);
    }

    pub fn fail_next_charge(&self, error: GatewayError) {
        self.lock().next_charge_error = Some(error);
    }

    pub fn set_account_status(&self, account_id: &str, status: ConnectedAccountStatus) {
        self.lock().accounts.insert(account_id.to_string(), status);
    }

    pub fn checkout_requests(&self) -> Vec<CheckoutRequest> {
        self.lock().checkout_requests.clone()
    }

    pub fn charges(&self) -> Vec<OffSessionCharge> {
        self.lock().charges.clone()
    }

    /// Ids handed out for successful off-session charges, in order.
    pub fn payment_intents(&self) -> Vec<String> {
        self.lock().payment_intents.clone()
    }

    pub fn canceled_subscriptions(&self) -> Vec<String> {
        self.lock().canceled_subscriptions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn fake_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionCreated, GatewayError> {
        let mut state = self.lock();
        if let Some(err) = state.next_checkout_error.take() {
            return Err(err);
        }
        state.checkout_requests.push(request);
        let session_id = fake_id("cs_test");
        Ok(CheckoutSessionCreated {
            url: format!("https://checkout.example.test/pay/{}", session_id),
            session_id,
        })
    }

    async fn create_connected_account(&self, _email: Option<&str>) -> Result<String, GatewayError> {
        let account_id = fake_id("acct");
        self.lock()
            .accounts
            .insert(account_id.clone(), ConnectedAccountStatus::default());
        Ok(account_id)
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        _refresh_url: &str,
        _return_url: &str,
    ) -> Result<String, GatewayError> {
        Ok(format!("https://connect.example.test/setup/{}", account_id))
    }

    async fn retrieve_account_status(
        &self,
        account_id: &str,
    ) -> Result<ConnectedAccountStatus, GatewayError> {
        self.lock()
            .accounts
            .get(account_id)
            .copied()
            .ok_or_else(|| GatewayError::AccountInvalid(format!("No such account: '{}'", account_id)))
    }

    async fn charge_off_session(&self, charge: OffSessionCharge) -> Result<ChargeReceipt, GatewayError> {
        let mut state = self.lock();
        if let Some(err) = state.next_charge_error.take() {
            return Err(err);
        }
        state.charges.push(charge);
        let payment_intent_id = fake_id("pi");
        state.payment_intents.push(payment_intent_id.clone());
        Ok(ChargeReceipt { payment_intent_id })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), GatewayError> {
        self.lock()
            .canceled_subscriptions
            .push(subscription_id.to_string());
        Ok(())
    }

    fn construct_event(&self, payload: &str, signature: &str) -> Result<PlatformEvent, GatewayError> {
        if signature != VALID_SIGNATURE {
            return Err(GatewayError::InvalidSignature);
        }
        serde_json::from_str(payload).map_err(|_| GatewayError::InvalidSignature)
    }
}
