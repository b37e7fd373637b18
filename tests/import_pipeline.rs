use std::time::Duration;

use ingesta::db::{import_jobs, import_logs, vehicles};
use ingesta::domain::event::EventKind;
use ingesta::domain::import_job::{JobStatus, LogLevel};
use ingesta::events::Subscription;

mod common;

use common::{process_message, receive_one, run_import, submit_csv, vehicle_csv};

const EVENT_WAIT: Duration = Duration::from_millis(250);

/// Drains every event currently buffered on a subscription.
async fn drain(subscription: &mut Subscription) -> Vec<ingesta::domain::event::ImportEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.next(EVENT_WAIT).await {
        events.push(event);
    }
    events
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn scenario_a_happy_path_csv() {
    let harness = common::TestHarness::new();
    let content = vehicle_csv(&[
        ("Gol", "ABC1D23", "2020", "55000.00"),
        ("Uno", "DEF2E34", "2019", "30000.50"),
    ]);

    let job = submit_csv(&harness, "frota.csv", &content);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.total_rows, Some(2));

    let mut subscription = harness.app.event_bus.subscribe(Some(job.id));
    let message = receive_one(&harness).expect("message must be visible");
    process_message(&harness, message).await;

    let mut conn = harness.get_conn();
    let finished = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.total_rows, Some(2));
    assert_eq!(finished.processed_rows, 2);
    assert_eq!(finished.error_rows, 0);
    assert!(finished.started_at.is_some());
    assert!(finished.finished_at.is_some());

    let rows = vehicles::for_job(&mut conn, &job.id).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].modelo, "Gol");
    assert_eq!(rows[0].placa, "ABC1D23");
    assert_eq!(rows[0].ano, Some(2020));

    // Subscriber sees processing, progress, completion, in that order.
    let events = drain(&mut subscription).await;
    let kinds: Vec<EventKind> = events.iter().map(|event| event.kind).collect();
    assert!(kinds.contains(&EventKind::StatusUpdate));
    assert!(kinds.contains(&EventKind::ProgressUpdate));
    let statuses: Vec<&str> = events
        .iter()
        .filter(|event| event.kind == EventKind::StatusUpdate)
        .filter_map(|event| event.data["status"].as_str())
        .collect();
    assert_eq!(statuses.first(), Some(&"processing"));
    assert_eq!(statuses.last(), Some(&"completed"));

    let progress = events
        .iter()
        .filter(|event| event.kind == EventKind::ProgressUpdate)
        .next_back()
        .expect("at least one progress event");
    assert_eq!(progress.data["processed_rows"], 2);
    assert_eq!(progress.data["error_rows"], 0);

    // Terminal transition removed the staged file.
    assert!(!harness.app.staging.path_for(&job.id, "csv").exists());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn scenario_b_mixed_validity() {
    let harness = common::TestHarness::new();
    let content = vehicle_csv(&[
        ("Gol", "abc1d23", "2020", "55000"),
        ("", "ZZZ9Z99", "1800", "-5"),
        ("Uno", "ABC1D23", "2020", "10"),
    ]);

    let mut subscription = harness.app.event_bus.subscribe(None);
    let job = run_import(&harness, "frota.csv", &content).await;

    let mut conn = harness.get_conn();
    let finished = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.processed_rows, 1);
    assert_eq!(finished.error_rows, 2);

    // Row 0 was accepted with its plate normalized to upper case.
    let rows = vehicles::for_job(&mut conn, &job.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].placa, "ABC1D23");

    let logs = import_logs::for_job(&mut conn, &job.id).unwrap();
    let warnings: Vec<&str> = logs
        .iter()
        .filter(|line| line.level == LogLevel::Warning)
        .map(|line| line.message.as_str())
        .collect();
    assert_eq!(warnings.len(), 2);
    assert!(warnings[0].starts_with("row 1:"));
    assert!(warnings[0].contains("required modelo"));
    assert!(warnings[0].contains("year out of range"));
    assert!(warnings[0].contains("non-positive value"));
    assert!(warnings[1].starts_with("row 2:"));
    assert!(warnings[1].contains("duplicate placa 'ABC1D23'"));

    // Two rejections plus the completion summary: three log events.
    let events = drain(&mut subscription).await;
    let log_events = events
        .iter()
        .filter(|event| event.kind == EventKind::Log)
        .count();
    assert_eq!(log_events, 3);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn scenario_c_redelivery_is_a_no_op() {
    let harness = common::TestHarness::new();
    let content = vehicle_csv(&[("Gol", "ABC1D23", "2020", "55000.00")]);
    let job = run_import(&harness, "frota.csv", &content).await;

    let mut conn = harness.get_conn();
    let after_first = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(after_first.status, JobStatus::Completed);

    // Simulate the queue redelivering the same job id.
    use axum::extract::FromRef;
    let processor = ingesta::ingest::processor::RowProcessor::from_ref(&harness.state());
    processor
        .process_job(job.id)
        .await
        .expect("redelivery must be absorbed");

    let after_second = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(after_second.processed_rows, after_first.processed_rows);
    assert_eq!(after_second.error_rows, after_first.error_rows);
    assert_eq!(after_second.finished_at, after_first.finished_at);
    assert_eq!(vehicles::count_for_job(&mut conn, &job.id).unwrap(), 1);

    // The queue is empty: the message was acknowledged.
    assert_eq!(harness.app.work_queue.depth().unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn scenario_d_header_mismatch_fails_the_job() {
    let harness = common::TestHarness::new();
    let content = "model,plate,year,price\nGol,ABC1D23,2020,55000.00\n";
    let job = run_import(&harness, "frota.csv", content).await;

    let mut conn = harness.get_conn();
    let failed = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.processed_rows, 0);
    assert!(failed.finished_at.is_some());

    let logs = import_logs::for_job(&mut conn, &job.id).unwrap();
    let error_line = logs
        .iter()
        .find(|line| line.level == LogLevel::Error)
        .expect("an ERROR log line");
    assert!(error_line.message.contains("missing required columns"));
    assert!(error_line.message.contains("modelo"));
    assert!(error_line.message.contains("placa"));

    // No target-table writes, staged file deleted best-effort.
    assert_eq!(vehicles::count_for_job(&mut conn, &job.id).unwrap(), 0);
    assert!(!harness.app.staging.path_for(&job.id, "csv").exists());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn scenario_f_progress_throttling() {
    // Five chunks of two rows each.
    let harness = common::TestHarness::new_with(|settings| {
        settings.import.batch_size = 2;
    });
    let rows: Vec<(String, String)> = (0..10)
        .map(|i| (format!("Modelo {i}"), format!("ABC{i}D2{i}")))
        .collect();
    let mut content = String::from("modelo,placa,ano,valor_fipe\n");
    for (modelo, placa) in &rows {
        content.push_str(&format!("{modelo},{placa},2020,1000.00\n"));
    }

    let started = std::time::Instant::now();
    let mut subscription = harness.app.event_bus.subscribe(None);
    let job = run_import(&harness, "frota.csv", &content).await;
    let elapsed_ms = started.elapsed().as_millis() as usize;

    let events = drain(&mut subscription).await;
    let progress: Vec<_> = events
        .iter()
        .filter(|event| event.kind == EventKind::ProgressUpdate)
        .collect();

    // At most one emission per throttle window, plus the final one.
    let allowed = elapsed_ms / 1000 + 2;
    assert!(
        progress.len() <= allowed,
        "{} progress events exceed the throttle allowance {}",
        progress.len(),
        allowed
    );

    let last = progress.last().expect("final progress is always emitted");
    let processed = last.data["processed_rows"].as_i64().unwrap();
    let errors = last.data["error_rows"].as_i64().unwrap();
    assert_eq!(processed + errors, 10);

    let mut conn = harness.get_conn();
    let finished = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(finished.processed_rows, 10);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn empty_file_completes_with_zero_counters() {
    let harness = common::TestHarness::new();
    let job = run_import(&harness, "frota.csv", "modelo,placa,ano,valor_fipe\n").await;

    let mut conn = harness.get_conn();
    let finished = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.total_rows, Some(0));
    assert_eq!(finished.processed_rows, 0);
    assert_eq!(finished.error_rows, 0);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn intra_file_duplicates_keep_the_first_row() {
    let harness = common::TestHarness::new();
    let content = vehicle_csv(&[
        ("Gol", "ABC1D23", "2020", "55000.00"),
        ("Gol", "ABC1D23", "2020", "55000.00"),
        ("Gol", "abc1d23", "2020", "55000.00"),
    ]);
    let job = run_import(&harness, "frota.csv", &content).await;

    let mut conn = harness.get_conn();
    let finished = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(finished.processed_rows, 1);
    assert_eq!(finished.error_rows, 2);
    assert_eq!(vehicles::count_for_job(&mut conn, &job.id).unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn resubmitting_the_same_file_inserts_nothing() {
    let harness = common::TestHarness::new();
    let content = vehicle_csv(&[
        ("Gol", "ABC1D23", "2020", "55000.00"),
        ("Uno", "DEF2E34", "2019", "30000.50"),
    ]);

    let first = run_import(&harness, "frota.csv", &content).await;
    let second = run_import(&harness, "frota.csv", &content).await;
    assert_ne!(first.id, second.id);

    let mut conn = harness.get_conn();
    let second_job = import_jobs::get_by_id(&mut conn, &second.id).unwrap();
    assert_eq!(second_job.status, JobStatus::Completed);
    assert_eq!(second_job.processed_rows, 0);
    assert_eq!(second_job.error_rows, 2);
    assert_eq!(vehicles::count_for_job(&mut conn, &second.id).unwrap(), 0);

    // Cross-job uniqueness: the first job's rows are untouched.
    assert_eq!(vehicles::count_for_job(&mut conn, &first.id).unwrap(), 2);
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server"]
async fn missing_staged_file_fails_the_job_with_a_log() {
    let harness = common::TestHarness::new();
    let content = vehicle_csv(&[("Gol", "ABC1D23", "2020", "55000.00")]);
    let job = submit_csv(&harness, "frota.csv", &content);

    // Sabotage: remove the staged file before the worker picks the job up.
    harness.app.staging.delete(&job.id, "csv").unwrap();

    let message = receive_one(&harness).expect("message must be visible");
    process_message(&harness, message).await;

    let mut conn = harness.get_conn();
    let failed = import_jobs::get_by_id(&mut conn, &job.id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);

    let logs = import_logs::for_job(&mut conn, &job.id).unwrap();
    assert!(
        logs.iter()
            .any(|line| line.level == LogLevel::Error
                && line.message.contains("staged file not found"))
    );
}
