use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Club {
    pub id: Uuid,
    pub name: String,
    pub stripe_account_id: Option<String>,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Club {
    /// The connected account funds are transferred to, if the club can take
    /// payments right now.
    pub fn payable_account(&self) -> Option<&str> {
        match self.stripe_account_id.as_deref() {
            Some(account) if self.charges_enabled && !account.is_empty() => Some(account),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConnectedAccountStatus {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Court {
    pub id: Uuid,
    pub club_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateClubRequest {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCourtRequest {
    #[validate(length(min = 1, max = 80, message = "name is required"))]
    pub name: String,
}
