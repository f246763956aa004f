//! Request authenticator for protected routes.

use axum_extra::extract::cookie::{CookieJar, SignedCookieJar};
use serde::Serialize;
use service_core::axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{AccountStatus, AuditAction, Role, Severity};
use crate::services::{AuditEvent, AuthError, RequestMeta, ResolveMode, ResolvedIdentity};
use crate::AppState;

/// Identity attached to a request that passed the guard.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AuthenticatedUser {
    pub account_id: Uuid,
    pub subject_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub is_approved: bool,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub provider: String,
}

impl From<&ResolvedIdentity> for AuthenticatedUser {
    fn from(identity: &ResolvedIdentity) -> Self {
        Self {
            account_id: identity.account.account_id,
            subject_id: identity.claims.subject_id.clone(),
            email: identity.account.email.clone(),
            display_name: identity.display_name().map(str::to_string),
            avatar_url: identity.avatar_url().map(str::to_string),
            role: identity.account.role,
            is_approved: identity.account.is_approved,
            status: identity.account.status,
            email_verified: identity.account.email_verified,
            provider: identity.claims.sign_in_provider.clone(),
        }
    }
}

/// Find the session credential: signed cookie, plain cookie, then bearer header.
pub fn extract_session_credential(state: &AppState, headers: &HeaderMap) -> Option<String> {
    let name = state.credentials.cookie_name();

    if let Some(key) = &state.cookie_key {
        let signed = SignedCookieJar::from_headers(headers, key.clone());
        if let Some(cookie) = signed.get(name).filter(|c| !c.value().is_empty()) {
            return Some(cookie.value().to_string());
        }
    }

    if let Some(cookie) = CookieJar::from_headers(headers)
        .get(name)
        .filter(|c| !c.value().is_empty())
    {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Authenticate any active account.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    guard(state, None, req, next).await
}

/// Authenticate and additionally require `role`.
pub async fn require_role(
    State(state): State<AppState>,
    role: Role,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    guard(state, Some(role), req, next).await
}

async fn guard(
    state: AppState,
    required_role: Option<Role>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let meta = RequestMeta::from_http(
        req.method(),
        req.uri(),
        req.headers(),
        req.extensions(),
        state.config.rate_limit.trust_forwarded_for,
    );

    let Some(credential) = extract_session_credential(&state, req.headers()) else {
        state.audit.record(
            AuditEvent::new(AuditAction::SessionMissing)
                .request(&meta)
                .reason(AuthError::NoSession.reason())
                .meta("route", meta.path.as_str()),
        );
        return Err(AuthError::NoSession);
    };

    let identity = match state
        .resolver
        .resolve(&credential, ResolveMode::SessionCheck, &meta)
        .await
    {
        Ok(identity) => identity,
        Err(err) => return Err(reject(&state, &meta, err)),
    };

    let user = AuthenticatedUser::from(&identity);

    if let Some(expected) = required_role {
        if user.role != expected {
            tracing::warn!(
                account_id = %user.account_id,
                expected = %expected,
                actual = %user.role,
                "Role check failed"
            );
            state.audit.record(
                AuditEvent::new(AuditAction::RoleForbidden)
                    .account(user.account_id)
                    .request(&meta)
                    .severity(Severity::Warn)
                    .meta("expected_role", expected.as_str())
                    .meta("actual_role", user.role.as_str())
                    .meta("route", meta.path.as_str()),
            );
            return Err(AuthError::RoleForbidden {
                expected,
                actual: user.role,
            });
        }
    }

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Audit a failed session check and choose the response.
fn reject(state: &AppState, meta: &RequestMeta, err: AuthError) -> AuthError {
    let event = match &err {
        AuthError::AccountNotFound { .. } => AuditEvent::new(AuditAction::UserNotFound),
        AuthError::AccountInactive { account_id, status } => {
            AuditEvent::new(AuditAction::UserSuspend)
                .account(*account_id)
                .meta("status", status.as_str())
        }
        _ => AuditEvent::new(AuditAction::SessionInvalid),
    };
    state.audit.record(
        event
            .request(meta)
            .severity(Severity::Warn)
            .reason(err.reason())
            .meta("route", meta.path.as_str()),
    );

    match err {
        AuthError::AccountNotFound { .. } => AuthError::AccountNotFound {
            session_check: true,
        },
        err @ AuthError::AccountInactive { .. } => err,
        other => {
            // Outages during a session check still answer 401; the reason is in the audit entry.
            if matches!(other, AuthError::DependencyUnavailable(_)) {
                tracing::error!(error = %other, "Session check dependency failure");
            }
            AuthError::InvalidCredential(other.reason().to_string())
        }
    }
}

/// Extractor for the identity the guard attached.
pub struct AuthUser(pub AuthenticatedUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(AuthUser)
            .ok_or(AuthError::NoSession)
    }
}
