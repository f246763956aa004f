//! Token exchange, signup, login and logout over HTTP.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{body_json, session_cookie, session_set_cookies, TestApp, COOKIE_NAME};
use session_service::models::Role;
use session_service::services::hash_credential;

#[tokio::test]
async fn first_account_is_bootstrap_admin() {
    let app = TestApp::new();

    let first = app.token("sub-1", "one@example.com", "password", true);
    let response = app.exchange("/signup", &first, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("session cookie");
    let body = body_json(response).await;
    assert_eq!(body["status"], "authenticated");
    assert_eq!(body["created"], true);
    assert_eq!(body["user"]["role"], "ADMIN");
    assert_eq!(body["user"]["is_approved"], true);

    let second = app.token("sub-2", "two@example.com", "password", true);
    let response = app.exchange("/signup", &second, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user"]["role"], "USER");
    assert_eq!(body["user"]["is_approved"], false);

    let admins = app
        .store
        .accounts()
        .into_iter()
        .filter(|a| a.role == Role::Admin)
        .count();
    assert_eq!(admins, 1);

    let sessions = app.store.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions
        .iter()
        .any(|s| s.credential_hash == hash_credential(&cookie)));
    assert_eq!(app.audit("USER_SIGNUP").await.len(), 2);
    assert_eq!(app.audit("SESSION_CREATE").await.len(), 2);
}

#[tokio::test]
async fn session_cookie_has_cross_site_attributes() {
    let app = TestApp::new();
    let token = app.token("sub-cookie", "c@example.com", "google.com", true);

    let response = app.exchange("/session", &token, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = session_set_cookies(&response).pop().expect("Set-Cookie");
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("SameSite=None"));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("Domain=app.example"));
    assert!(set_cookie.contains("Max-Age="));
}

#[tokio::test]
async fn duplicate_signup_is_409_without_new_account() {
    let app = TestApp::new();
    let token = app.token("sub-dup", "dup@example.com", "google.com", true);
    assert_eq!(
        app.exchange("/signup", &token, None).await.status(),
        StatusCode::OK
    );

    let again = app.token("sub-dup", "dup@example.com", "google.com", true);
    let response = app.exchange("/signup", &again, None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(session_set_cookies(&response).is_empty());
    assert_eq!(body_json(response).await["code"], "ACCOUNT_EXISTS");

    assert_eq!(app.store.accounts().len(), 1);
    assert_eq!(app.store.sessions().len(), 1);
    let failed = app.audit("USER_SIGNUP_FAILED").await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].metadata["reason"], "account_exists");
}

#[tokio::test]
async fn unverified_password_signup_is_pending_and_login_is_refused() {
    let app = TestApp::new();
    let token = app.token("sub-pending", "p@example.com", "password", false);

    let response = app.exchange("/signup", &token, None).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(session_set_cookies(&response).is_empty());
    let body = body_json(response).await;
    assert_eq!(body["status"], "pending_verification");
    assert_eq!(body["email"], "p@example.com");
    assert_eq!(app.store.accounts().len(), 1);

    let again = app.token("sub-pending", "p@example.com", "password", false);
    let response = app.exchange("/login", &again, None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "EMAIL_NOT_VERIFIED");

    assert!(app.store.sessions().is_empty());
    assert!(app.audit("SESSION_CREATE").await.is_empty());

    let signups = app.audit("USER_SIGNUP").await;
    assert_eq!(signups.len(), 1);
    assert_eq!(signups[0].metadata["pending_verification"], true);
}

#[tokio::test]
async fn verified_password_login_marks_email_verified() {
    let app = TestApp::new();
    let unverified = app.token("sub-verify", "v@example.com", "password", false);
    assert_eq!(
        app.exchange("/signup", &unverified, None).await.status(),
        StatusCode::ACCEPTED
    );

    let verified = app.token("sub-verify", "v@example.com", "password", true);
    let response = app.exchange("/login", &verified, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let account = app.store.accounts().pop().unwrap();
    assert!(account.email_verified);
    assert!(account.email_verified_utc.is_some());
    assert!(account.last_login_utc.is_some());
}

#[tokio::test]
async fn login_without_account_depends_on_provider() {
    let app = TestApp::new();

    let password = app.token("sub-none", "none@example.com", "password", true);
    let response = app.exchange("/login", &password, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(app.store.accounts().is_empty());

    let google = app.token("sub-google", "g@example.com", "google.com", true);
    let response = app.exchange("/login", &google, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.store.accounts().len(), 1);
}

#[tokio::test]
async fn invalid_token_is_401_and_audited_without_the_token() {
    let app = TestApp::new();

    let response = app.exchange("/login", "forged-token", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let failed = app.audit("USER_LOGIN_FAILED").await;
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].metadata.to_string().contains("forged-token"));
}

#[tokio::test]
async fn malformed_body_is_400() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/session")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "203.0.113.10")
        .body(Body::from(r#"{"id_token": ""}"#))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "MALFORMED_REQUEST");
}

#[tokio::test]
async fn provider_outage_during_exchange_is_503() {
    let app = TestApp::new();
    let token = app.token("sub-down", "down@example.com", "google.com", true);
    app.provider.set_unavailable(true);

    let response = app.exchange("/session", &token, None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.store.accounts().is_empty());
}

#[tokio::test]
async fn failed_seal_is_audited_and_leaves_no_session() {
    let app = TestApp::new();
    let token = app.token("sub-seal", "seal@example.com", "google.com", true);
    app.provider.set_fail_seal(true);

    let response = app.exchange("/session", &token, None).await;
    assert!(!response.status().is_success());
    assert!(session_set_cookies(&response).is_empty());
    assert!(app.store.sessions().is_empty());

    let failed = app.audit("SESSION_CREATE_FAILED").await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].severity, "ERROR");

    // No sign-in success is recorded for a request that issued no session.
    assert!(app.audit("USER_SIGNUP").await.is_empty());
    assert!(app.audit("USER_LOGIN").await.is_empty());
}

#[tokio::test]
async fn exchange_with_existing_cookie_rotates_the_session() {
    let app = TestApp::new();
    let first = app.sign_in("sub-rotate", "rot@example.com", "google.com").await;

    let token = app.token("sub-rotate", "rot@example.com", "google.com", true);
    let response = app.exchange("/session", &token, Some(&first)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = session_cookie(&response).expect("rotated cookie");
    assert_ne!(first, second);

    let sessions = app.store.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].credential_hash, hash_credential(&second));
    assert_eq!(app.audit("SESSION_REFRESH").await.len(), 1);

    // The replacement stays usable.
    assert_eq!(
        app.get("/me", Some(&second)).await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn logout_is_idempotent_and_clears_cookie() {
    let app = TestApp::new();
    let cookie = app.sign_in("sub-out", "out@example.com", "google.com").await;
    assert_eq!(app.store.sessions().len(), 1);

    for _ in 0..2 {
        let response = app.logout(Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let cleared = session_set_cookies(&response).pop().expect("clearing cookie");
        assert!(cleared.starts_with(&format!("{}=;", COOKIE_NAME)));
        assert!(cleared.contains("Max-Age=0"));
        assert!(cleared.contains("Domain=app.example"));
        assert!(cleared.contains("Path=/"));

        assert_eq!(body_json(response).await["status"], "logged_out");
    }

    assert!(app.store.sessions().is_empty());
    assert_eq!(app.provider.revoke_calls(), vec!["sub-out", "sub-out"]);

    let logouts = app.audit("USER_LOGOUT").await;
    assert_eq!(logouts.len(), 2);
    let deleted: Vec<_> = logouts
        .iter()
        .map(|e| e.metadata["sessions_deleted"].as_u64())
        .collect();
    assert!(deleted.contains(&Some(1)));
    assert!(deleted.contains(&Some(0)));

    assert_eq!(
        app.get("/me", Some(&cookie)).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn logout_without_cookie_still_succeeds() {
    let app = TestApp::new();

    let response = app.logout(None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(session_set_cookies(&response).len(), 1);

    let logouts = app.audit("USER_LOGOUT").await;
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].metadata["had_session"], false);
}

#[tokio::test]
async fn logout_with_provider_failure_still_clears_locally() {
    let app = TestApp::new();
    let cookie = app.sign_in("sub-fail", "fail@example.com", "google.com").await;
    app.provider.set_fail_revoke(true);

    let response = app.logout(Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.store.sessions().is_empty());

    let failed = app.audit("USER_LOGOUT_FAILED").await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].metadata["reason"], "provider_revoke_failed");
}
