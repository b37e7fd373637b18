use std::time::Duration;

use tokio::time::timeout;

mod common;

use common::vehicle_csv;

/// Reads from the response stream until `needle` appears or the deadline
/// passes, returning the buffered text.
async fn read_until(
    response: &mut reqwest::Response,
    needle: &str,
    deadline: Duration,
) -> String {
    let mut buffer = String::new();
    let read = timeout(deadline, async {
        while let Ok(Some(chunk)) = response.chunk().await {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            if buffer.contains(needle) {
                break;
            }
        }
        buffer
    })
    .await;
    read.unwrap_or_else(|_| panic!("timed out waiting for {needle:?}"))
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn stream_snapshots_a_completed_job_and_heartbeats() {
    let server = common::TestApp::new_with(|settings| {
        settings.import.sse_heartbeat_sec = 1;
    });

    // Complete a job before anyone subscribes.
    let harness_state = server.state();
    let intake = {
        use axum::extract::FromRef;
        ingesta::ingest::intake::IntakeService::from_ref(&harness_state)
    };
    let content = vehicle_csv(&[("Gol", "ABC1D23", "2020", "55000.00")]);
    let job = intake
        .submit("frota.csv", content.as_bytes(), ingesta::domain::mapping::MappingConfig::vehicle_preset())
        .unwrap();
    {
        use axum::extract::FromRef;
        let processor = ingesta::ingest::processor::RowProcessor::from_ref(&harness_state);
        processor.process_job(job.id).await.unwrap();
    }

    let client = reqwest::Client::new();
    let mut response = client
        .get(format!(
            "{}/imports/stream?job_id={}",
            &server.address, job.id
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|value| value.to_str().ok()),
        Some("no-cache")
    );
    assert_eq!(
        response
            .headers()
            .get("x-accel-buffering")
            .and_then(|value| value.to_str().ok()),
        Some("no")
    );

    // Initial snapshot, then the connected marker.
    let body = read_until(&mut response, "event: connected", Duration::from_secs(2)).await;
    assert!(body.contains("event: job_status"));
    assert!(body.contains("\"completed\""));
    let snapshot_index = body.find("event: job_status").unwrap();
    let connected_index = body.find("event: connected").unwrap();
    assert!(snapshot_index < connected_index);

    // Heartbeat comments arrive while the stream is otherwise silent.
    let body = read_until(&mut response, ":heartbeat", Duration::from_secs(5)).await;
    assert!(body.contains(":heartbeat"));
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn stream_for_an_unknown_job_is_404() {
    let server = common::TestApp::new();
    let client = reqwest::Client::new();

    let response = client
        .get(format!(
            "{}/imports/stream?job_id={}",
            &server.address,
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn live_events_reach_a_streaming_subscriber() {
    let server = common::TestApp::new_with(|settings| {
        settings.import.sse_heartbeat_sec = 30;
    });
    let client = reqwest::Client::new();

    // Open the firehose stream first so it witnesses the whole run.
    let mut response = client
        .get(format!("{}/imports/stream", &server.address))
        .send()
        .await
        .unwrap();
    let connected = read_until(&mut response, "event: connected", Duration::from_secs(2)).await;
    assert!(connected.contains("event: connected"));

    let state = server.state();
    let content = vehicle_csv(&[("Gol", "XYZ9A88", "2021", "70000.00")]);
    let job = {
        use axum::extract::FromRef;
        ingesta::ingest::intake::IntakeService::from_ref(&state)
            .submit("frota.csv", content.as_bytes(), ingesta::domain::mapping::MappingConfig::vehicle_preset())
            .unwrap()
    };
    {
        use axum::extract::FromRef;
        ingesta::ingest::processor::RowProcessor::from_ref(&state)
            .process_job(job.id)
            .await
            .unwrap();
    }

    let body = read_until(&mut response, "event: status_update", Duration::from_secs(5)).await;
    assert!(body.contains("event: status_update"));
}
