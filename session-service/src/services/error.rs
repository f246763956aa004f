use service_core::axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use service_core::error::{error_response, AppError};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AccountStatus, Role};

/// Failures from the identity provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has been revoked")]
    Revoked,

    #[error("Required claim missing: {0}")]
    MissingClaim(&'static str),

    #[error("Failed to seal session credential: {0}")]
    Seal(String),

    #[error("Identity provider unavailable: {0}")]
    Unavailable(anyhow::Error),
}

/// Outcomes of the authentication pipeline that end a request.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("No session")]
    NoSession,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Missing claim: {0}")]
    MissingClaim(&'static str),

    #[error("Account not found")]
    AccountNotFound { session_check: bool },

    #[error("Account is {status}")]
    AccountInactive { account_id: Uuid, status: AccountStatus },

    #[error("Account already exists")]
    AccountExists,

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("Role {actual} may not access a {expected} route")]
    RoleForbidden { expected: Role, actual: Role },

    #[error("Too many requests")]
    RateLimited { retry_after: u64 },

    #[error("Origin not allowed: {0}")]
    OriginBlocked(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable code returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Malformed(_) => "MALFORMED_REQUEST",
            AuthError::NoSession => "NO_SESSION",
            AuthError::InvalidCredential(_) | AuthError::MissingClaim(_) => "INVALID_SESSION",
            AuthError::AccountNotFound { .. } => "USER_NOT_FOUND",
            AuthError::AccountInactive { .. } => "ACCOUNT_INACTIVE",
            AuthError::AccountExists => "ACCOUNT_EXISTS",
            AuthError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            AuthError::RoleForbidden { .. } => "ROLE_FORBIDDEN",
            AuthError::RateLimited { .. } => "RATE_LIMITED",
            AuthError::OriginBlocked(_) => "ORIGIN_BLOCKED",
            AuthError::DependencyUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Malformed(_) => StatusCode::BAD_REQUEST,
            AuthError::NoSession
            | AuthError::InvalidCredential(_)
            | AuthError::MissingClaim(_) => StatusCode::UNAUTHORIZED,
            AuthError::AccountNotFound {
                session_check: true,
            } => StatusCode::FORBIDDEN,
            AuthError::AccountNotFound {
                session_check: false,
            } => StatusCode::NOT_FOUND,
            AuthError::AccountInactive { .. }
            | AuthError::EmailNotVerified
            | AuthError::RoleForbidden { .. }
            | AuthError::OriginBlocked(_) => StatusCode::FORBIDDEN,
            AuthError::AccountExists => StatusCode::CONFLICT,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short reason recorded in audit metadata. Never contains provider error text.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Malformed(_) => "malformed_request",
            AuthError::NoSession => "no_session",
            AuthError::InvalidCredential(_) => "invalid_credential",
            AuthError::MissingClaim(_) => "missing_claim",
            AuthError::AccountNotFound { .. } => "account_not_found",
            AuthError::AccountInactive { .. } => "account_inactive",
            AuthError::AccountExists => "account_exists",
            AuthError::EmailNotVerified => "email_not_verified",
            AuthError::RoleForbidden { .. } => "role_forbidden",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::OriginBlocked(_) => "origin_blocked",
            AuthError::DependencyUnavailable(_) => "dependency_unavailable",
            AuthError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            AuthError::Malformed(msg) => msg.clone(),
            AuthError::NoSession => "Authentication required".to_string(),
            AuthError::InvalidCredential(_) | AuthError::MissingClaim(_) => {
                "Invalid or expired session".to_string()
            }
            AuthError::AccountNotFound { .. } => "Account not found".to_string(),
            AuthError::AccountInactive { .. } => "Account is not active".to_string(),
            AuthError::AccountExists => "An account with this identity already exists".to_string(),
            AuthError::EmailNotVerified => "Email address has not been verified".to_string(),
            AuthError::RoleForbidden { .. } => "Insufficient role for this resource".to_string(),
            AuthError::RateLimited { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            AuthError::OriginBlocked(_) => "Origin not allowed".to_string(),
            AuthError::DependencyUnavailable(_) => "Service temporarily unavailable".to_string(),
            AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidToken(msg) => AuthError::InvalidCredential(msg),
            ProviderError::Revoked => AuthError::InvalidCredential("revoked".to_string()),
            ProviderError::MissingClaim(claim) => AuthError::MissingClaim(claim),
            ProviderError::Seal(msg) => AuthError::InvalidCredential(msg),
            ProviderError::Unavailable(e) => AuthError::DependencyUnavailable(e),
        }
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Conflict(_) => AuthError::AccountExists,
            AppError::DatabaseError(e) | AppError::ServiceUnavailable(e) => {
                AuthError::DependencyUnavailable(e)
            }
            AppError::BadRequest(e) => AuthError::Malformed(e.to_string()),
            AppError::ValidationError(e) => AuthError::Malformed(e.to_string()),
            other => AuthError::Internal(anyhow::anyhow!(other.to_string())),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.public_message();
        let retry_after = match &self {
            AuthError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        }

        error_response(status, message, Some(code), Some(self.to_string()), retry_after)
    }
}
