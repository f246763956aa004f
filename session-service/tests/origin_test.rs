//! Origin validation and CORS.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{body_json, TestApp, ALLOWED_ORIGIN};

fn health_from(origin: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri("/health")
        .header(header::ORIGIN, origin)
        .header("x-forwarded-for", "192.0.2.44")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn disallowed_origin_is_403_and_audited() {
    let app = TestApp::new();

    let response = app.send(health_from("https://evil.example")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    assert_eq!(body_json(response).await["code"], "ORIGIN_BLOCKED");

    let blocked = app.audit("ACCESS_BLOCKED").await;
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].severity, "SECURITY");
    assert_eq!(blocked[0].metadata["origin"], "https://evil.example");
    assert_eq!(blocked[0].metadata["reason"], "cors_origin");
    assert_eq!(blocked[0].metadata["route"], "/health");
    assert!(blocked[0].request_id.is_some());
}

#[tokio::test]
async fn allowed_origin_gets_credentialed_cors_headers() {
    let app = TestApp::new();

    let response = app.send(health_from(ALLOWED_ORIGIN)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        ALLOWED_ORIGIN
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );
}

#[tokio::test]
async fn subdomain_of_trusted_suffix_is_allowed() {
    let app = TestApp::new();

    let response = app.send(health_from("https://shop.trusted.example")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.send(health_from("https://nottrusted.example")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn preflight_from_allowed_origin_succeeds() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/session")
        .header(header::ORIGIN, ALLOWED_ORIGIN)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app.send(request).await;
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        ALLOWED_ORIGIN
    );
}

#[tokio::test]
async fn request_without_origin_passes() {
    let app = TestApp::new();

    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.audit("ACCESS_BLOCKED").await.is_empty());
}
