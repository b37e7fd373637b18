use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ingesta::controllers::HealthCheckBody;
use tower::ServiceExt;

mod common;

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn health_check_works() {
    let router = common::TestHarness::new().router;

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: HealthCheckBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(body.status, "OK");
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn health_check_with_server() {
    let server = common::TestApp::new();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", &server.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status(), StatusCode::OK);

    let body: HealthCheckBody = response.json().await.unwrap();
    assert_eq!(body.status, "OK");
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn readiness_reports_database_and_queue() {
    let server = common::TestApp::new();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health/ready", &server.address))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::OK);

    let body: ingesta::controllers::ReadyCheckBody = response.json().await.unwrap();
    assert!(body.ready);
    assert!(body.services.database);
    assert!(body.services.queue);
}
