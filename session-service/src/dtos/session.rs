use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::middleware::AuthenticatedUser;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TokenExchangeRequest {
    /// Identity token issued by the provider's client SDK.
    #[serde(alias = "idToken")]
    #[validate(length(min = 1, max = 8192, message = "id_token is required"))]
    #[schema(example = "eyJhbGciOiJSUzI1NiIsImtpZCI6...")]
    pub id_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    #[schema(example = "authenticated")]
    pub status: String,
    pub user: AuthenticatedUser,
    pub expires_at: DateTime<Utc>,
    /// True when this exchange created the account.
    pub created: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingVerificationResponse {
    #[schema(example = "pending_verification")]
    pub status: String,
    #[schema(example = "user@example.com")]
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    #[schema(example = "logged_out")]
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    pub service: String,
    pub version: String,
}
