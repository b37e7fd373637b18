use axum::extract::FromRef;
use ingesta::domain::import_job::ImportJob;
use ingesta::domain::mapping::MappingConfig;
use ingesta::ingest::intake::IntakeService;
use ingesta::ingest::processor::RowProcessor;
use ingesta::queue::ReceivedMessage;

use crate::common::TestHarness;

/// Builds a vehicle-preset CSV body from `(modelo, placa, ano, valor_fipe)`
/// tuples.
pub fn vehicle_csv(rows: &[(&str, &str, &str, &str)]) -> String {
	let mut body = String::from("modelo,placa,ano,valor_fipe\n");
	for (modelo, placa, ano, valor) in rows {
		body.push_str(&format!("{modelo},{placa},{ano},{valor}\n"));
	}
	body
}

/// Submits a CSV through the intake service with the vehicle preset.
pub fn submit_csv(harness: &TestHarness, filename: &str, content: &str) -> ImportJob {
	let intake = IntakeService::from_ref(&harness.state());
	intake
		.submit(filename, content.as_bytes(), MappingConfig::vehicle_preset())
		.expect("Failed to submit file")
}

/// Receives the next visible queue message without waiting.
pub fn receive_one(harness: &TestHarness) -> Option<ReceivedMessage> {
	harness
		.app
		.work_queue
		.receive_now(1)
		.expect("Failed to receive from queue")
		.into_iter()
		.next()
}

/// Drives the referenced job to a terminal state and acknowledges the
/// message, exactly as the worker loop would.
pub async fn process_message(harness: &TestHarness, message: ReceivedMessage) {
	let processor = RowProcessor::from_ref(&harness.state());
	processor
		.process_job(message.payload.job_id)
		.await
		.expect("Processor failed");
	harness
		.app
		.work_queue
		.delete(&message.receipt)
		.expect("Failed to acknowledge message");
}

/// Submits and fully processes a CSV, returning the job id.
pub async fn run_import(harness: &TestHarness, filename: &str, content: &str) -> ImportJob {
	let job = submit_csv(harness, filename, content);
	let message = receive_one(harness).expect("No queue message after submission");
	assert_eq!(message.payload.job_id, job.id);
	process_message(harness, message).await;
	job
}
