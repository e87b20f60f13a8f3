use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPlan {
    pub id: Uuid,
    pub club_id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub billing_interval: BillingInterval,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
    OneTime,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
            BillingInterval::OneTime => "one_time",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "month" | "monthly" => Some(BillingInterval::Month),
            "year" | "yearly" | "annual" => Some(BillingInterval::Year),
            "one_time" | "once" | "lifetime" => Some(BillingInterval::OneTime),
            _ => None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, BillingInterval::OneTime)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub name: String,
    #[validate(range(min = 0, max = 100_000_000, message = "price_cents must be between 0 and 100000000"))]
    pub price_cents: i64,
    pub billing_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipSubscription {
    pub id: Uuid,
    pub club_id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub payment_status: SubscriptionPaymentStatus,
    pub price_cents: i64,
    pub billing_interval: BillingInterval,
    pub checkout_session_id: String,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Incomplete,
    Active,
    PastDue,
    Canceled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionPaymentStatus {
    RequiresPayment,
    Paid,
    Failed,
}

/// What happened to a subscription according to the payments platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionSignal {
    CheckoutCompleted,
    InvoicePaid,
    InvoicePaymentFailed,
    Deleted,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "Incomplete",
            SubscriptionStatus::Active => "Active",
            SubscriptionStatus::PastDue => "PastDue",
            SubscriptionStatus::Canceled => "Canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Incomplete" => Some(SubscriptionStatus::Incomplete),
            "Active" => Some(SubscriptionStatus::Active),
            "PastDue" => Some(SubscriptionStatus::PastDue),
            "Canceled" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }

    /// The state a signal moves this subscription to, or `None` when the
    /// signal does not apply from here. Decisions depend only on the current
    /// state so events may arrive in any order.
    pub fn apply(
        self,
        signal: SubscriptionSignal,
    ) -> Option<(SubscriptionStatus, SubscriptionPaymentStatus)> {
        use SubscriptionPaymentStatus as Pay;
        use SubscriptionSignal as Sig;
        use SubscriptionStatus::*;

        match (self, signal) {
            (Canceled, _) => None,
            (_, Sig::Deleted) => Some((Canceled, Pay::RequiresPayment)),
            (Incomplete, Sig::CheckoutCompleted) => Some((Active, Pay::Paid)),
            (Incomplete | PastDue, Sig::InvoicePaid) => Some((Active, Pay::Paid)),
            (Incomplete | Active, Sig::InvoicePaymentFailed) => Some((PastDue, Pay::Failed)),
            _ => None,
        }
    }
}

impl SubscriptionPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPaymentStatus::RequiresPayment => "RequiresPayment",
            SubscriptionPaymentStatus::Paid => "Paid",
            SubscriptionPaymentStatus::Failed => "Failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RequiresPayment" => Some(SubscriptionPaymentStatus::RequiresPayment),
            "Paid" => Some(SubscriptionPaymentStatus::Paid),
            "Failed" => Some(SubscriptionPaymentStatus::Failed),
            _ => None,
        }
    }
}
