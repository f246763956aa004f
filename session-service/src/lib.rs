pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum_extra::extract::cookie::Key;
use service_core::axum::{
    extract::{Request, State},
    middleware::{from_fn, from_fn_with_state, Next},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    error_details::error_details_middleware, rate_limit::IpRateLimiter,
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::SessionServiceConfig;
use crate::middleware::OriginPolicy;
use crate::models::Role;
use crate::services::{
    AccountStore, AuditRecorder, AuditStore, IdentityProvider, IdentityResolver, ResolverPolicy,
    SessionCredentialManager, SessionStore,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::session::create_session,
        handlers::session::login,
        handlers::session::signup,
        handlers::session::logout,
        handlers::user::get_me,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::session::TokenExchangeRequest,
            dtos::session::SessionResponse,
            dtos::session::PendingVerificationResponse,
            dtos::session::LogoutResponse,
            dtos::session::HealthResponse,
            middleware::AuthenticatedUser,
            models::Role,
            models::AccountStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Session", description = "Identity token exchange and logout"),
        (name = "User", description = "Authenticated user"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("session"))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SessionServiceConfig>,
    pub accounts: Arc<dyn AccountStore>,
    pub audit: AuditRecorder,
    pub resolver: IdentityResolver,
    pub credentials: SessionCredentialManager,
    pub rate_limiter: IpRateLimiter,
    pub origins: OriginPolicy,
    /// Present when signed session cookies are accepted.
    pub cookie_key: Option<Key>,
}

impl AppState {
    /// Wire the pipeline components from their collaborators.
    pub fn build(
        config: SessionServiceConfig,
        provider: Arc<dyn IdentityProvider>,
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        let provider_timeout = Duration::from_millis(config.provider.timeout_ms);
        let audit = AuditRecorder::new(audit_store);
        let resolver = IdentityResolver::new(
            provider.clone(),
            accounts.clone(),
            audit.clone(),
            ResolverPolicy::new(&config.accounts, provider_timeout),
        );
        let credentials = SessionCredentialManager::new(
            provider,
            sessions,
            config.cookie.clone(),
            provider_timeout,
        );
        let rate_limiter = IpRateLimiter::new(
            config.rate_limit.max_attempts,
            config.rate_limit.window_seconds,
        );
        let origins = OriginPolicy::new(
            &config.security.allowed_origins,
            &config.security.allowed_origin_suffixes,
        );
        let cookie_key = config
            .cookie
            .signing_secret
            .as_deref()
            .map(|secret| Key::derive_from(secret.as_bytes()));

        Self {
            config: Arc::new(config),
            accounts,
            audit,
            resolver,
            credentials,
            rate_limiter,
            origins,
            cookie_key,
        }
    }
}

async fn require_admin(
    state: State<AppState>,
    req: Request,
    next: Next,
) -> Result<service_core::axum::response::Response, services::AuthError> {
    middleware::require_role(state, Role::Admin, req, next).await
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let expose_error_details = state.config.is_dev();

    // Token exchange routes share one per-IP budget.
    let exchange_routes = Router::new()
        .route("/session", post(handlers::create_session))
        .route("/login", post(handlers::login))
        .route("/signup", post(handlers::signup))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    let protected_routes = Router::new()
        .route("/me", get(handlers::get_me))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/admin/me", get(handlers::get_me))
        .route_layer(from_fn_with_state(state.clone(), require_admin));

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/logout", post(handlers::logout))
        .merge(exchange_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(middleware::cors_layer(state.origins.clone()))
        // Disallowed origins are refused before CORS handling.
        .layer(from_fn_with_state(state, middleware::origin_guard))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn_with_state(
            expose_error_details,
            error_details_middleware,
        ))
        .layer(from_fn(request_id_middleware));

    Ok(app)
}
