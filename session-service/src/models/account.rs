//! Account model - the locally persisted user record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Account roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
    Creator,
    Merchant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::Creator => "CREATOR",
            Role::Merchant => "MERCHANT",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            "CREATOR" => Ok(Role::Creator),
            "MERCHANT" => Ok(Role::Merchant),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Account status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    Deactivated,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Suspended => "SUSPENDED",
            AccountStatus::Deactivated => "DEACTIVATED",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AccountStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_uppercase().as_str() {
            "ACTIVE" => Ok(AccountStatus::Active),
            "SUSPENDED" => Ok(AccountStatus::Suspended),
            "DEACTIVATED" => Ok(AccountStatus::Deactivated),
            _ => Err(format!("Invalid account status: {}", value)),
        }
    }
}

/// Account entity.
///
/// `subject_id` is unset for accounts created before they were linked to a
/// provider identity; the first verified login with a matching email links it.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, ToSchema)]
pub struct Account {
    pub account_id: Uuid,
    pub subject_id: Option<String>,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_approved: bool,
    #[sqlx(try_from = "String")]
    pub status: AccountStatus,
    pub email_verified: bool,
    pub email_verified_utc: Option<DateTime<Utc>>,
    pub primary_provider: String,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    /// Create a new active account.
    pub fn new(
        subject_id: impl Into<String>,
        email: impl Into<String>,
        provider: impl Into<String>,
        role: Role,
        is_approved: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            account_id: Uuid::new_v4(),
            subject_id: Some(subject_id.into()),
            email: email.into(),
            display_name: None,
            avatar_url: None,
            role,
            is_approved,
            status: AccountStatus::Active,
            email_verified: false,
            email_verified_utc: None,
            primary_provider: provider.into(),
            last_login_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Record a verified sign-in: marks the email verified (first time only) and stamps the login.
    pub fn record_verified_login(&mut self, at: DateTime<Utc>) {
        if !self.email_verified {
            self.email_verified = true;
            self.email_verified_utc = Some(at);
        }
        self.last_login_utc = Some(at);
        self.updated_utc = at;
    }
}
