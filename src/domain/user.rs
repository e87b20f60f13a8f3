use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub stripe_customer_id: Option<String>,
    pub default_payment_method_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Customer and payment method to charge off-session, when both are on file.
    pub fn saved_payment_method(&self) -> Option<(&str, &str)> {
        match (
            self.stripe_customer_id.as_deref(),
            self.default_payment_method_id.as_deref(),
        ) {
            (Some(customer), Some(method)) if !customer.is_empty() && !method.is_empty() => {
                Some((customer, method))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, max = 120, message = "display_name is required"))]
    pub display_name: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SavePaymentMethodRequest {
    #[validate(length(min = 1, message = "customer_id is required"))]
    pub customer_id: String,
    #[validate(length(min = 1, message = "payment_method_id is required"))]
    pub payment_method_id: String,
}
