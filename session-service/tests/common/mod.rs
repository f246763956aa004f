//! Shared setup for session-service integration tests.
//!
//! Everything runs in-process: an `InMemoryStore` backs all three stores and a
//! `MockIdentityProvider` stands in for the identity provider.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use session_service::{
    build_router,
    config::{
        AccountPolicyConfig, CookieConfig, DatabaseConfig, Environment, ProviderConfig,
        RateLimitConfig, SecurityConfig, SessionServiceConfig,
    },
    models::AuditLogEntry,
    services::{InMemoryStore, MockIdentityProvider},
    AppState,
};
use std::sync::Arc;
use tower::util::ServiceExt;

pub const COOKIE_NAME: &str = "__Secure-test_session";
pub const ALLOWED_ORIGIN: &str = "https://app.example";

pub fn test_config() -> SessionServiceConfig {
    SessionServiceConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "session-service-test".to_string(),
        service_version: "0.0.0-test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        provider: ProviderConfig {
            project_id: "test-project".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            service_token: "unused".to_string(),
            id_token_issuer: "https://issuer.test/test-project".to_string(),
            id_token_jwks_url: "http://127.0.0.1:9/jwks".to_string(),
            session_issuer: "https://session.test/test-project".to_string(),
            session_jwks_url: "http://127.0.0.1:9/session-jwks".to_string(),
            timeout_ms: 1_000,
        },
        cookie: CookieConfig {
            name: COOKIE_NAME.to_string(),
            domain: ".app.example".to_string(),
            ttl_days: 5,
            signing_secret: None,
        },
        rate_limit: RateLimitConfig {
            max_attempts: 10,
            window_seconds: 60,
            trust_forwarded_for: true,
        },
        security: SecurityConfig {
            allowed_origins: vec![ALLOWED_ORIGIN.to_string()],
            allowed_origin_suffixes: vec!["trusted.example".to_string()],
        },
        accounts: AccountPolicyConfig {
            auto_provision_providers: vec!["google.com".to_string()],
            default_approved: false,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<MockIdentityProvider>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SessionServiceConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(MockIdentityProvider::new());
        let state = AppState::build(
            config,
            provider.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        );
        let router = build_router(state.clone()).expect("Failed to build router");
        Self {
            router,
            state,
            store,
            provider,
        }
    }

    /// Issue an identity token for a sign-in.
    pub fn token(&self, subject: &str, email: &str, provider: &str, verified: bool) -> String {
        self.provider
            .issue_token(MockIdentityProvider::claims(subject, email, provider, verified))
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed to respond")
    }

    /// POST an identity token to one of the exchange routes.
    pub async fn exchange(&self, path: &str, token: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.10");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, format!("{}={}", COOKIE_NAME, cookie));
        }
        let body = serde_json::json!({ "idToken": token }).to_string();
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Sign in through `/session` and return the session credential from the cookie.
    pub async fn sign_in(&self, subject: &str, email: &str, provider: &str) -> String {
        let token = self.token(subject, email, provider, true);
        let response = self.exchange("/session", &token, None).await;
        assert_eq!(response.status(), StatusCode::OK, "sign-in failed");
        session_cookie(&response).expect("sign-in did not set a session cookie")
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method("GET")
            .uri(path)
            .header("x-forwarded-for", "203.0.113.10");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, format!("{}={}", COOKIE_NAME, cookie));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn logout(&self, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/logout")
            .header("x-forwarded-for", "203.0.113.10");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, format!("{}={}", COOKIE_NAME, cookie));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Wait for queued audit writes, then return the rows for `action`.
    pub async fn audit(&self, action: &str) -> Vec<AuditLogEntry> {
        self.state.audit.flush().await;
        self.store.audit_entries_for(action)
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

/// `Set-Cookie` headers for the session cookie.
pub fn session_set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with(&format!("{}=", COOKIE_NAME)))
        .map(str::to_string)
        .collect()
}

/// The session credential set by the response, if any.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    session_set_cookies(response).into_iter().find_map(|raw| {
        let value = raw.split(';').next()?.split_once('=')?.1.to_string();
        (!value.is_empty()).then_some(value)
    })
}
