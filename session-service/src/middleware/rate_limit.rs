//! Per-IP rate limiting for the token-exchange routes.

use service_core::axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use service_core::middleware::rate_limit::client_ip;

use crate::models::{AuditAction, Severity};
use crate::services::{AuditEvent, AuthError, RequestMeta};
use crate::AppState;

/// Reject a client once it exceeds the configured attempts per window.
///
/// Every rejection is audited as `RATE_LIMIT_HIT`. The audit write is queued,
/// so a failing audit store cannot keep the 429 from going out.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let trust_forwarded_for = state.config.rate_limit.trust_forwarded_for;
    let ip = match client_ip(req.headers(), req.extensions(), trust_forwarded_for) {
        Some(ip) => ip,
        None => {
            tracing::warn!(path = %req.uri().path(), "Rate limit skipped: client IP unknown");
            return next.run(req).await;
        }
    };

    if let Err(retry_after) = state.rate_limiter.check(ip) {
        let meta = RequestMeta::from_http(
            req.method(),
            req.uri(),
            req.headers(),
            req.extensions(),
            trust_forwarded_for,
        );
        tracing::warn!(ip = %ip, path = %meta.path, "Rate limit exceeded");

        state.audit.record(
            AuditEvent::new(AuditAction::RateLimitHit)
                .request(&meta)
                .severity(Severity::Security)
                .meta("route", meta.path.as_str())
                .meta("method", meta.method.as_str())
                .meta("limit", state.rate_limiter.attempts())
                .meta("window_seconds", state.rate_limiter.window_seconds()),
        );

        return AuthError::RateLimited { retry_after }.into_response();
    }

    next.run(req).await
}
