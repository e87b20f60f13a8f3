use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use stripe::{
    Account, AccountId, AccountLink, AccountLinkType, AccountType, CancelSubscription,
    CheckoutSession, CheckoutSessionMode, Client, CreateAccount, CreateAccountCapabilities,
    CreateAccountCapabilitiesCardPayments, CreateAccountCapabilitiesTransfers, CreateAccountLink,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval, CreateCheckoutSessionPaymentIntentData,
    CreateCheckoutSessionPaymentIntentDataTransferData, CreateCheckoutSessionSubscriptionData,
    CreateCheckoutSessionSubscriptionDataTransferData, CreatePaymentIntent,
    CreatePaymentIntentTransferData, Currency, CustomerId, ErrorType, Event, EventObject,
    EventType, PaymentIntent, PaymentIntentOffSession, PaymentIntentStatus, PaymentMethodId,
    StripeError, Subscription, SubscriptionId, Webhook, WebhookError,
};

use crate::domain::{BillingInterval, ConnectedAccountStatus, EventPayload, PlatformEvent};
use crate::payments::{
    ChargeReceipt, CheckoutMode, CheckoutRequest, CheckoutSessionCreated, GatewayError,
    OffSessionCharge, PaymentGateway,
};

pub struct StripeGateway {
    client: Client,
    webhook_secret: String,
}

impl StripeGateway {
    pub fn new(secret_key: String, webhook_secret: String) -> Self {
        Self {
            client: Client::new(secret_key),
            webhook_secret,
        }
    }
}

fn parse_id<T: FromStr>(value: &str, what: &str) -> Result<T, GatewayError> {
    value
        .parse::<T>()
        .map_err(|_| GatewayError::Other(format!("Malformed {} id: {}", what, value)))
}

fn parse_currency(value: &str) -> Result<Currency, GatewayError> {
    Currency::from_str(&value.to_lowercase())
        .map_err(|_| GatewayError::Other(format!("Unsupported currency: {}", value)))
}

/// Sort a platform error into the categories services react to.
pub(crate) fn classify_error(is_card_error: bool, code: Option<&str>, message: &str) -> GatewayError {
    let lowered = message.to_lowercase();
    if is_card_error {
        return GatewayError::CardDeclined(message.to_string());
    }

    let account_problem = matches!(code, Some("account_invalid" | "platform_account_required"))
        || lowered.contains("no such destination")
        || lowered.contains("no such account")
        || lowered.contains("connected account");
    if account_problem {
        return GatewayError::AccountInvalid(message.to_string());
    }

    let method_problem = code.is_some_and(|c| c.starts_with("payment_method_"))
        || (code == Some("resource_missing")
            && (lowered.contains("customer") || lowered.contains("paymentmethod")
                || lowered.contains("payment_method")));
    if method_problem {
        return GatewayError::PaymentMethodInvalid(message.to_string());
    }

    GatewayError::Other(message.to_string())
}

fn map_stripe_error(err: StripeError) -> GatewayError {
    match err {
        StripeError::Stripe(request) => {
            let code = request
                .code
                .as_ref()
                .and_then(|c| serde_json::to_value(c).ok())
                .and_then(|v| v.as_str().map(str::to_string));
            let message = request
                .message
                .clone()
                .unwrap_or_else(|| format!("request failed with status {}", request.http_status));
            classify_error(
                matches!(request.error_type, ErrorType::Card),
                code.as_deref(),
                &message,
            )
        }
        other => GatewayError::Other(other.to_string()),
    }
}

/// Metadata fields are optional on some objects and required on others.
fn metadata_of<T: Serialize>(metadata: &T) -> HashMap<String, String> {
    serde_json::to_value(metadata)
        .ok()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn recurring_interval(interval: BillingInterval) -> Option<CreateCheckoutSessionLineItemsPriceDataRecurringInterval> {
    match interval {
        BillingInterval::Month => Some(CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month),
        BillingInterval::Year => Some(CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Year),
        BillingInterval::OneTime => None,
    }
}

fn to_platform_event(event: Event) -> PlatformEvent {
    let id = event.id.to_string();
    let event_type = event.type_.to_string();

    let payload = match (event.type_, event.data.object) {
        (EventType::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
            EventPayload::CheckoutCompleted {
                session_id: session.id.to_string(),
                payment_intent_id: session.payment_intent.as_ref().map(|p| p.id().to_string()),
                subscription_id: session.subscription.as_ref().map(|s| s.id().to_string()),
                customer_id: session.customer.as_ref().map(|c| c.id().to_string()),
                metadata: metadata_of(&session.metadata),
            }
        }
        (EventType::PaymentIntentPaymentFailed, EventObject::PaymentIntent(intent)) => {
            EventPayload::PaymentFailed {
                payment_intent_id: intent.id.to_string(),
                failure_message: intent
                    .last_payment_error
                    .as_ref()
                    .and_then(|e| e.message.clone()),
                metadata: metadata_of(&intent.metadata),
            }
        }
        (EventType::PaymentIntentSucceeded, EventObject::PaymentIntent(intent)) => {
            EventPayload::PaymentSucceeded {
                payment_intent_id: intent.id.to_string(),
                amount_cents: intent.amount,
                description: intent.description.clone(),
                metadata: metadata_of(&intent.metadata),
            }
        }
        (EventType::AccountUpdated, EventObject::Account(account)) => EventPayload::AccountUpdated {
            account_id: account.id.to_string(),
            charges_enabled: account.charges_enabled.unwrap_or(false),
            payouts_enabled: account.payouts_enabled.unwrap_or(false),
            details_submitted: account.details_submitted.unwrap_or(false),
        },
        (EventType::InvoicePaid, EventObject::Invoice(invoice)) => EventPayload::InvoicePaid {
            invoice_id: invoice.id.to_string(),
            subscription_id: invoice.subscription.as_ref().map(|s| s.id().to_string()),
        },
        (EventType::InvoicePaymentFailed, EventObject::Invoice(invoice)) => {
            EventPayload::InvoicePaymentFailed {
                invoice_id: invoice.id.to_string(),
                subscription_id: invoice.subscription.as_ref().map(|s| s.id().to_string()),
            }
        }
        (EventType::CustomerSubscriptionDeleted, EventObject::Subscription(subscription)) => {
            EventPayload::SubscriptionDeleted {
                subscription_id: subscription.id.to_string(),
            }
        }
        _ => EventPayload::Unhandled,
    };

    PlatformEvent {
        id,
        event_type,
        payload,
    }
}

/// Envelope of a correctly signed event whose object the client library
/// cannot model. Only the id and type are needed to acknowledge it.
fn unmodelled_event(payload: &str) -> Result<PlatformEvent, GatewayError> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| GatewayError::Other(format!("Unparseable webhook payload: {}", e)))?;
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::Other("Webhook payload has no event id".to_string()))?;
    let event_type = value
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    Ok(PlatformEvent {
        id: id.to_string(),
        event_type: event_type.to_string(),
        payload: EventPayload::Unhandled,
    })
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionCreated, GatewayError> {
        let currency = parse_currency(&request.currency)?;
        let customer_id = request
            .customer_id
            .as_deref()
            .map(|id| parse_id::<CustomerId>(id, "customer"))
            .transpose()?;

        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.metadata = Some(request.metadata.clone());
        params.customer = customer_id;
        if params.customer.is_none() {
            params.customer_email = request.customer_email.as_deref();
        }

        let recurring = match request.mode {
            CheckoutMode::Subscription(interval) => recurring_interval(interval),
            CheckoutMode::Payment => None,
        };

        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(request.amount_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.product_name.clone(),
                    ..Default::default()
                }),
                recurring: recurring.map(|interval| CreateCheckoutSessionLineItemsPriceDataRecurring {
                    interval,
                    interval_count: None,
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }]);

        if recurring.is_some() {
            params.mode = Some(CheckoutSessionMode::Subscription);
            params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
                application_fee_percent: Some(f64::from(request.application_fee_bps) / 100.0),
                transfer_data: Some(CreateCheckoutSessionSubscriptionDataTransferData {
                    amount_percent: None,
                    destination: request.destination_account.clone(),
                }),
                metadata: Some(request.metadata.clone()),
                ..Default::default()
            });
        } else {
            params.mode = Some(CheckoutSessionMode::Payment);
            params.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
                application_fee_amount: Some(request.application_fee_cents),
                transfer_data: Some(CreateCheckoutSessionPaymentIntentDataTransferData {
                    amount: None,
                    destination: request.destination_account.clone(),
                }),
                metadata: Some(request.metadata.clone()),
                ..Default::default()
            });
        }

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(map_stripe_error)?;

        let url = session
            .url
            .ok_or_else(|| GatewayError::Other("No checkout URL returned".to_string()))?;

        Ok(CheckoutSessionCreated {
            session_id: session.id.to_string(),
            url,
        })
    }

    async fn create_connected_account(&self, email: Option<&str>) -> Result<String, GatewayError> {
        let mut params = CreateAccount::new();
        params.type_ = Some(AccountType::Express);
        params.email = email;
        params.capabilities = Some(CreateAccountCapabilities {
            card_payments: Some(CreateAccountCapabilitiesCardPayments { requested: Some(true) }),
            transfers: Some(CreateAccountCapabilitiesTransfers { requested: Some(true) }),
            ..Default::default()
        });

        let account = Account::create(&self.client, params)
            .await
            .map_err(map_stripe_error)?;

        tracing::info!(account_id = %account.id, "Created connected account");
        Ok(account.id.to_string())
    }

    async fn create_onboarding_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, GatewayError> {
        let account = parse_id::<AccountId>(account_id, "account")?;
        let mut params = CreateAccountLink::new(account, AccountLinkType::AccountOnboarding);
        params.refresh_url = Some(refresh_url);
        params.return_url = Some(return_url);

        let link = AccountLink::create(&self.client, params)
            .await
            .map_err(map_stripe_error)?;

        Ok(link.url)
    }

    async fn retrieve_account_status(
        &self,
        account_id: &str,
    ) -> Result<ConnectedAccountStatus, GatewayError> {
        let id = parse_id::<AccountId>(account_id, "account")?;
        let account = Account::retrieve(&self.client, &id, &[])
            .await
            .map_err(map_stripe_error)?;

        Ok(ConnectedAccountStatus {
            charges_enabled: account.charges_enabled.unwrap_or(false),
            payouts_enabled: account.payouts_enabled.unwrap_or(false),
            details_submitted: account.details_submitted.unwrap_or(false),
        })
    }

    async fn charge_off_session(&self, charge: OffSessionCharge) -> Result<ChargeReceipt, GatewayError> {
        let currency = parse_currency(&charge.currency)?;
        let mut params = CreatePaymentIntent::new(charge.amount_cents, currency);
        params.customer = Some(parse_id::<CustomerId>(&charge.customer_id, "customer")?);
        params.payment_method = Some(parse_id::<PaymentMethodId>(&charge.payment_method_id, "payment method")?);
        params.off_session = Some(PaymentIntentOffSession::Exists(true));
        params.confirm = Some(true);
        params.description = Some(&charge.description);
        params.application_fee_amount = Some(charge.application_fee_cents);
        params.transfer_data = Some(CreatePaymentIntentTransferData {
            amount: None,
            destination: charge.destination_account.clone(),
        });
        params.metadata = Some(charge.metadata.clone());

        let intent = PaymentIntent::create(&self.client, params)
            .await
            .map_err(map_stripe_error)?;

        if intent.status != PaymentIntentStatus::Succeeded {
            tracing::warn!(
                payment_intent = %intent.id,
                status = ?intent.status,
                "Off-session charge did not succeed"
            );
            return Err(GatewayError::CardDeclined(
                "The payment requires customer action and could not be completed".to_string(),
            ));
        }

        Ok(ChargeReceipt {
            payment_intent_id: intent.id.to_string(),
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), GatewayError> {
        let id = parse_id::<SubscriptionId>(subscription_id, "subscription")?;
        Subscription::cancel(&self.client, &id, CancelSubscription::new())
            .await
            .map_err(map_stripe_error)?;
        Ok(())
    }

    fn construct_event(&self, payload: &str, signature: &str) -> Result<PlatformEvent, GatewayError> {
        match Webhook::construct_event(payload, signature, &self.webhook_secret) {
            Ok(event) => Ok(to_platform_event(event)),
            // The signature is checked before parsing, so this event is authentic.
            Err(WebhookError::BadParse(e)) => {
                tracing::debug!("Signed webhook not modelled by client library: {}", e);
                unmodelled_event(payload)
            }
            Err(e) => {
                tracing::debug!("Webhook verification failed: {}", e);
                Err(GatewayError::InvalidSignature)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_errors_are_declines() {
        let err = classify_error(true, Some("card_declined"), "Your card was declined.");
        assert_eq!(err, GatewayError::CardDeclined("Your card was declined.".to_string()));
    }

    #[test]
    fn test_missing_destination_is_account_problem() {
        let err = classify_error(false, Some("resource_missing"), "No such destination: 'acct_123'");
        assert!(matches!(err, GatewayError::AccountInvalid(_)));

        let err = classify_error(false, Some("account_invalid"), "The account is invalid");
        assert!(matches!(err, GatewayError::AccountInvalid(_)));
    }

    #[test]
    fn test_missing_customer_is_payment_method_problem() {
        let err = classify_error(false, Some("resource_missing"), "No such customer: 'cus_123'");
        assert!(matches!(err, GatewayError::PaymentMethodInvalid(_)));

        let err = classify_error(false, Some("resource_missing"), "No such PaymentMethod: 'pm_1'");
        assert!(matches!(err, GatewayError::PaymentMethodInvalid(_)));

        let err = classify_error(false, Some("payment_method_unactivated"), "Not activated");
        assert!(matches!(err, GatewayError::PaymentMethodInvalid(_)));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = classify_error(false, Some("rate_limit"), "Too many requests");
        assert_eq!(err, GatewayError::Other("Too many requests".to_string()));
    }

    #[test]
    fn test_unmodelled_event_keeps_id_and_type() {
        let event = unmodelled_event(r#"{"id":"evt_1","type":"radar.early_fraud_warning.created"}"#)
            .unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "radar.early_fraud_warning.created");
        assert!(matches!(event.payload, EventPayload::Unhandled));

        assert!(unmodelled_event("{}").is_err());
    }

    #[test]
    fn test_bad_signature_rejected() {
        let gateway = StripeGateway::new("sk_test_x".to_string(), "whsec_test".to_string());
        let result = gateway.construct_event(r#"{"id":"evt_1"}"#, "t=1,v1=deadbeef");
        assert_eq!(result.unwrap_err(), GatewayError::InvalidSignature);
    }
}
