//! Cross-origin policy: exact origins plus trusted host suffixes.

use service_core::axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::models::{AuditAction, Severity};
use crate::services::{AuditEvent, AuthError, RequestMeta};
use crate::AppState;

#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    exact: Arc<HashSet<String>>,
    suffixes: Arc<Vec<String>>,
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Host part of `scheme://host[:port]`, or `None` for anything else.
fn origin_host(origin: &str) -> Option<&str> {
    let (scheme, rest) = origin.split_once("://")?;
    if scheme != "https" && scheme != "http" {
        return None;
    }
    if rest.is_empty() || rest.contains('/') || rest.contains('@') {
        return None;
    }
    // Bracketed IPv6 literals never match a suffix rule.
    if rest.starts_with('[') {
        return None;
    }
    Some(rest.split(':').next().unwrap_or(rest))
}

impl OriginPolicy {
    pub fn new(origins: &[String], suffixes: &[String]) -> Self {
        Self {
            exact: Arc::new(origins.iter().map(|o| normalize_origin(o)).collect()),
            suffixes: Arc::new(
                suffixes
                    .iter()
                    .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        let origin = normalize_origin(origin);
        if self.exact.contains("*") || self.exact.contains(&origin) {
            return true;
        }

        let Some(host) = origin_host(&origin) else {
            return false;
        };
        self.suffixes.iter().any(|suffix| {
            host == suffix
                || host
                    .strip_suffix(suffix.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// CORS headers for permitted origins. Credentials are allowed so the session
/// cookie travels on cross-site requests.
pub fn cors_layer(policy: OriginPolicy) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts| {
                origin.to_str().map(|o| policy.allows(o)).unwrap_or(false)
            },
        ))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .max_age(Duration::from_secs(600))
}

/// Reject requests from origins outside the policy before CORS handling.
/// Requests without an `Origin` header pass.
pub async fn origin_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = match req.headers().get(header::ORIGIN) {
        None => return next.run(req).await,
        Some(value) => value.to_str().unwrap_or("<non-ascii>").to_string(),
    };

    if state.origins.allows(&origin) {
        return next.run(req).await;
    }

    let meta = RequestMeta::from_http(
        req.method(),
        req.uri(),
        req.headers(),
        req.extensions(),
        state.config.rate_limit.trust_forwarded_for,
    );
    tracing::warn!(origin = %origin, path = %meta.path, "Blocked cross-origin request");
    state.audit.record(
        AuditEvent::new(AuditAction::AccessBlocked)
            .request(&meta)
            .severity(Severity::Security)
            .reason("cors_origin")
            .meta("origin", origin.as_str())
            .meta("route", meta.path.as_str()),
    );

    AuthError::OriginBlocked(origin).into_response()
}
