//! Token exchange and logout.
//!
//! The work for each request runs in its own task which the handler awaits, so
//! a client hanging up mid-request does not leave a sealed credential without
//! its session row or audit entry.

use axum_extra::extract::cookie::CookieJar;
use service_core::axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::dtos::session::{
    LogoutResponse, PendingVerificationResponse, SessionResponse, TokenExchangeRequest,
};
use crate::middleware::{auth::extract_session_credential, AuthenticatedUser};
use crate::models::{AuditAction, Severity};
use crate::services::{AuditEvent, AuthError, RequestMeta, ResolveMode};
use crate::utils::ValidatedJson;
use crate::AppState;

/// Exchange an identity token for a session cookie, creating the account if needed.
#[utoipa::path(
    post,
    path = "/session",
    request_body = TokenExchangeRequest,
    responses(
        (status = 200, description = "Session established", body = SessionResponse),
        (status = 202, description = "Account created, email verification pending", body = PendingVerificationResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Invalid identity token", body = ErrorResponse),
        (status = 403, description = "Account inactive or email not verified", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "Identity provider unavailable", body = ErrorResponse)
    ),
    tag = "Session"
)]
pub async fn create_session(
    State(state): State<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<TokenExchangeRequest>,
) -> Result<Response, AuthError> {
    spawn_exchange(state, ResolveMode::Exchange, meta, &headers, req.id_token).await
}

/// Exchange an identity token for a session cookie. The account must exist.
#[utoipa::path(
    post,
    path = "/login",
    request_body = TokenExchangeRequest,
    responses(
        (status = 200, description = "Login successful", body = SessionResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Invalid identity token", body = ErrorResponse),
        (status = 403, description = "Account inactive or email not verified", body = ErrorResponse),
        (status = 404, description = "No account for this identity", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "Identity provider unavailable", body = ErrorResponse)
    ),
    tag = "Session"
)]
pub async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<TokenExchangeRequest>,
) -> Result<Response, AuthError> {
    spawn_exchange(state, ResolveMode::Login, meta, &headers, req.id_token).await
}

/// Create an account from an identity token and start a session.
#[utoipa::path(
    post,
    path = "/signup",
    request_body = TokenExchangeRequest,
    responses(
        (status = 200, description = "Account created and session established", body = SessionResponse),
        (status = 202, description = "Account created, email verification pending", body = PendingVerificationResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Invalid identity token", body = ErrorResponse),
        (status = 409, description = "Account already exists", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "Identity provider unavailable", body = ErrorResponse)
    ),
    tag = "Session"
)]
pub async fn signup(
    State(state): State<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<TokenExchangeRequest>,
) -> Result<Response, AuthError> {
    spawn_exchange(state, ResolveMode::Signup, meta, &headers, req.id_token).await
}

/// Revoke the current session and clear the cookie. Always succeeds.
#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Logged out; session cookie cleared", body = LogoutResponse)
    ),
    tag = "Session"
)]
pub async fn logout(
    State(state): State<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
) -> Response {
    let credential = extract_session_credential(&state, &headers);
    let clear = state.credentials.clear_cookie();

    let task = tokio::spawn(revoke_session(state, meta, credential));
    if let Err(e) = task.await {
        tracing::error!(error = %e, "Logout task failed");
    }

    (
        CookieJar::new().add(clear),
        Json(LogoutResponse {
            status: "logged_out".to_string(),
        }),
    )
        .into_response()
}

async fn spawn_exchange(
    state: AppState,
    mode: ResolveMode,
    meta: RequestMeta,
    headers: &HeaderMap,
    token: String,
) -> Result<Response, AuthError> {
    let previous = extract_session_credential(&state, headers);
    tokio::spawn(exchange(state, mode, meta, previous, token))
        .await
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("exchange task failed: {}", e)))?
}

async fn exchange(
    state: AppState,
    mode: ResolveMode,
    meta: RequestMeta,
    previous: Option<String>,
    token: String,
) -> Result<Response, AuthError> {
    let identity = state.resolver.resolve(&token, mode, &meta).await?;
    let account_id = identity.account.account_id;

    if identity.pending_verification {
        tracing::info!(account_id = %account_id, "Signup pending email verification");
        state
            .audit
            .record(identity.success_event(mode).request(&meta));
        return Ok((
            StatusCode::ACCEPTED,
            Json(PendingVerificationResponse {
                status: "pending_verification".to_string(),
                email: identity.account.email.clone(),
            }),
        )
            .into_response());
    }

    let minted = async {
        let credential = state.credentials.mint(&token).await?;
        let session = state
            .credentials
            .persist(account_id, &credential, &meta)
            .await?;
        Ok::<_, AuthError>((credential, session))
    }
    .await;

    let (credential, session) = match minted {
        Ok(minted) => minted,
        Err(e) => {
            tracing::warn!(account_id = %account_id, error = %e, "Session creation failed");
            state.audit.record(
                AuditEvent::new(AuditAction::SessionCreateFailed)
                    .account(account_id)
                    .request(&meta)
                    .severity(Severity::Error)
                    .reason(e.reason()),
            );
            return Err(e);
        }
    };

    state.audit.record(
        identity
            .success_event(mode)
            .request(&meta)
            .meta("session_id", session.session_id.to_string()),
    );

    // Rotation: the replaced session's row goes away, its provider grant expires on its own.
    let replaced = match previous {
        Some(old) => state.credentials.forget(&old).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to drop replaced session row");
            0
        }),
        None => 0,
    };
    let action = if replaced > 0 {
        AuditAction::SessionRefresh
    } else {
        AuditAction::SessionCreate
    };
    state.audit.record(
        AuditEvent::new(action)
            .account(account_id)
            .request(&meta)
            .meta("session_id", session.session_id.to_string())
            .meta("expires_at", credential.expires_at.to_rfc3339())
            .meta("mode", mode.as_str()),
    );

    let cookie = state.credentials.to_cookie(&credential);
    Ok((
        CookieJar::new().add(cookie),
        Json(SessionResponse {
            status: "authenticated".to_string(),
            user: AuthenticatedUser::from(&identity),
            expires_at: credential.expires_at,
            created: identity.created,
        }),
    )
        .into_response())
}

async fn revoke_session(state: AppState, meta: RequestMeta, credential: Option<String>) {
    let Some(credential) = credential else {
        state.audit.record(
            AuditEvent::new(AuditAction::UserLogout)
                .request(&meta)
                .meta("had_session", false),
        );
        return;
    };

    let outcome = state.credentials.revoke(&credential).await;
    let account_id = match &outcome.subject_id {
        Some(subject) => state
            .accounts
            .find_by_subject(subject)
            .await
            .ok()
            .flatten()
            .map(|a| a.account_id),
        None => None,
    };

    let event = match (&outcome.subject_id, outcome.provider_revoked) {
        (Some(_), true) => AuditEvent::new(AuditAction::UserLogout),
        (Some(_), false) => AuditEvent::new(AuditAction::UserLogoutFailed)
            .severity(Severity::Warn)
            .reason("provider_revoke_failed"),
        (None, _) => AuditEvent::new(AuditAction::UserLogoutFailed)
            .severity(Severity::Warn)
            .reason("invalid_credential"),
    };
    state.audit.record(
        event
            .maybe_account(account_id)
            .request(&meta)
            .meta("had_session", true)
            .meta("sessions_deleted", outcome.sessions_deleted),
    );
}
