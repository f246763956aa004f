//! Audit log model - append-only security event trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Closed taxonomy of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    UserLogin,
    UserLoginFailed,
    UserSignup,
    UserSignupFailed,
    UserLogout,
    UserLogoutFailed,
    AccountCreated,
    SessionCreate,
    SessionCreateFailed,
    SessionRefresh,
    SessionRevoke,
    SessionMissing,
    SessionInvalid,
    UserNotFound,
    UserSuspend,
    RoleForbidden,
    RateLimitHit,
    AccessBlocked,
}

impl AuditAction {
    pub const ALL: [AuditAction; 18] = [
        AuditAction::UserLogin,
        AuditAction::UserLoginFailed,
        AuditAction::UserSignup,
        AuditAction::UserSignupFailed,
        AuditAction::UserLogout,
        AuditAction::UserLogoutFailed,
        AuditAction::AccountCreated,
        AuditAction::SessionCreate,
        AuditAction::SessionCreateFailed,
        AuditAction::SessionRefresh,
        AuditAction::SessionRevoke,
        AuditAction::SessionMissing,
        AuditAction::SessionInvalid,
        AuditAction::UserNotFound,
        AuditAction::UserSuspend,
        AuditAction::RoleForbidden,
        AuditAction::RateLimitHit,
        AuditAction::AccessBlocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserLogin => "USER_LOGIN",
            AuditAction::UserLoginFailed => "USER_LOGIN_FAILED",
            AuditAction::UserSignup => "USER_SIGNUP",
            AuditAction::UserSignupFailed => "USER_SIGNUP_FAILED",
            AuditAction::UserLogout => "USER_LOGOUT",
            AuditAction::UserLogoutFailed => "USER_LOGOUT_FAILED",
            AuditAction::AccountCreated => "ACCOUNT_CREATED",
            AuditAction::SessionCreate => "SESSION_CREATE",
            AuditAction::SessionCreateFailed => "SESSION_CREATE_FAILED",
            AuditAction::SessionRefresh => "SESSION_REFRESH",
            AuditAction::SessionRevoke => "SESSION_REVOKE",
            AuditAction::SessionMissing => "SESSION_MISSING",
            AuditAction::SessionInvalid => "SESSION_INVALID",
            AuditAction::UserNotFound => "USER_NOT_FOUND",
            AuditAction::UserSuspend => "USER_SUSPEND",
            AuditAction::RoleForbidden => "ROLE_FORBIDDEN",
            AuditAction::RateLimitHit => "RATE_LIMIT_HIT",
            AuditAction::AccessBlocked => "ACCESS_BLOCKED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown audit action: {}", s))
    }
}

/// Audit severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Info,
    Warn,
    Error,
    Security,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Security => "SECURITY",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "SECURITY" | "CRITICAL" => Ok(Severity::Security),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Persisted audit row. `metadata` has already been redacted.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AuditLogEntry {
    pub audit_id: Uuid,
    pub action: String,
    pub account_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub message: Option<String>,
    pub metadata: serde_json::Value,
    pub severity: String,
    pub request_id: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_round_trips_through_its_code() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>(), Ok(action));
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!("USER_TELEPORT".parse::<AuditAction>().is_err());
    }
}
