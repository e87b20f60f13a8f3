use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// Platform fee for `amount_cents` at `fee_bps` basis points, rounded down.
pub fn platform_fee(amount_cents: i64, fee_bps: u32) -> Result<i64, AppError> {
    let fee = i128::from(amount_cents.max(0)) * i128::from(fee_bps) / 10_000;
    i64::try_from(fee).map_err(|_| AppError::Validation("Amount is too large".to_string()))
}

/// What a checkout session or payment intent pays for. Serialized into the
/// platform's metadata and parsed back when webhooks arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentPurpose {
    Booking {
        club_id: Uuid,
        booking_id: String,
        user_id: Uuid,
    },
    Membership {
        club_id: Uuid,
        plan_id: Uuid,
        user_id: Uuid,
        subscription_id: Uuid,
    },
    TopUp {
        club_id: Uuid,
        user_id: Uuid,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata has no `{0}` entry")]
    Missing(&'static str),
    #[error("metadata entry `{0}` is malformed")]
    Malformed(&'static str),
    #[error("unknown payment kind `{0}`")]
    UnknownKind(String),
}

impl PaymentPurpose {
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentPurpose::Booking { .. } => "booking",
            PaymentPurpose::Membership { .. } => "membership",
            PaymentPurpose::TopUp { .. } => "top_up",
        }
    }

    pub fn club_id(&self) -> Uuid {
        match self {
            PaymentPurpose::Booking { club_id, .. }
            | PaymentPurpose::Membership { club_id, .. }
            | PaymentPurpose::TopUp { club_id, .. } => *club_id,
        }
    }

    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("kind".to_string(), self.kind().to_string());
        metadata.insert("club_id".to_string(), self.club_id().to_string());
        match self {
            PaymentPurpose::Booking { booking_id, user_id, .. } => {
                metadata.insert("booking_id".to_string(), booking_id.clone());
                metadata.insert("user_id".to_string(), user_id.to_string());
            }
            PaymentPurpose::Membership {
                plan_id,
                user_id,
                subscription_id,
                ..
            } => {
                metadata.insert("plan_id".to_string(), plan_id.to_string());
                metadata.insert("user_id".to_string(), user_id.to_string());
                metadata.insert("subscription_id".to_string(), subscription_id.to_string());
            }
            PaymentPurpose::TopUp { user_id, .. } => {
                metadata.insert("user_id".to_string(), user_id.to_string());
            }
        }
        metadata
    }

    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self, MetadataError> {
        let kind = metadata
            .get("kind")
            .ok_or(MetadataError::Missing("kind"))?;
        let club_id = uuid_entry(metadata, "club_id")?;
        match kind.as_str() {
            "booking" => {
                let booking_id = metadata
                    .get("booking_id")
                    .filter(|id| !id.trim().is_empty())
                    .ok_or(MetadataError::Missing("booking_id"))?
                    .clone();
                Ok(PaymentPurpose::Booking {
                    club_id,
                    booking_id,
                    user_id: uuid_entry(metadata, "user_id")?,
                })
            }
            "membership" => Ok(PaymentPurpose::Membership {
                club_id,
                plan_id: uuid_entry(metadata, "plan_id")?,
                user_id: uuid_entry(metadata, "user_id")?,
                subscription_id: uuid_entry(metadata, "subscription_id")?,
            }),
            "top_up" => Ok(PaymentPurpose::TopUp {
                club_id,
                user_id: uuid_entry(metadata, "user_id")?,
            }),
            other => Err(MetadataError::UnknownKind(other.to_string())),
        }
    }
}

fn uuid_entry(
    metadata: &HashMap<String, String>,
    key: &'static str,
) -> Result<Uuid, MetadataError> {
    let value = metadata.get(key).ok_or(MetadataError::Missing(key))?;
    Uuid::parse_str(value).map_err(|_| MetadataError::Malformed(key))
}

/// A verified webhook delivery from the payments platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEvent {
    pub id: String,
    pub event_type: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum EventPayload {
    CheckoutCompleted {
        session_id: String,
        payment_intent_id: Option<String>,
        subscription_id: Option<String>,
        customer_id: Option<String>,
        metadata: HashMap<String, String>,
    },
    PaymentFailed {
        payment_intent_id: String,
        failure_message: Option<String>,
        metadata: HashMap<String, String>,
    },
    PaymentSucceeded {
        payment_intent_id: String,
        amount_cents: i64,
        description: Option<String>,
        metadata: HashMap<String, String>,
    },
    AccountUpdated {
        account_id: String,
        charges_enabled: bool,
        payouts_enabled: bool,
        details_submitted: bool,
    },
    InvoicePaid {
        invoice_id: String,
        subscription_id: Option<String>,
    },
    InvoicePaymentFailed {
        invoice_id: String,
        subscription_id: Option<String>,
    },
    SubscriptionDeleted {
        subscription_id: String,
    },
    Unhandled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub user_id: Uuid,
    pub club_id: Uuid,
    pub balance_cents: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub club_id: Uuid,
    pub amount_cents: i64,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub payment_reference: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// What a checkout session is opened for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckoutTarget {
    Booking { booking_id: String },
    Membership { plan_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompletePaymentRequest {
    #[validate(length(min = 1, max = 40, message = "method is required"))]
    pub method: String,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FailPaymentRequest {
    #[validate(length(min = 1, max = 500, message = "reason is required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TopUpRequest {
    #[validate(range(min = 1, max = 100_000_000, message = "amount_cents must be between 1 and 100000000"))]
    pub amount_cents: i64,
    #[serde(default)]
    pub description: Option<String>,
}
