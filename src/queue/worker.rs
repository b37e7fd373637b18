use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use tokio::sync::broadcast::Receiver;
use tokio::time::sleep;
use tracing::{debug, error, instrument, trace, warn};
use ulid::Ulid;

use crate::domain::app_state::AppState;
use crate::ingest::processor::RowProcessor;
use crate::queue::{ReceivedMessage, WorkQueue};
use crate::Error;

/// A long-running consumer of the import work queue.
///
/// Each worker serially receives queue messages, hands the referenced job to
/// the [`RowProcessor`], and acknowledges the message once the job has been
/// driven to a terminal state (or turned out to be a redelivery no-op). A
/// message whose processing failed at the infrastructure level is left
/// unacknowledged so the visibility timeout redelivers it.
pub struct ImportWorker {
	/// A unique ID for the worker instance
	id: String,
	/// A broadcast channel receiver for handling graceful shutdowns
	shutdown_rx: Receiver<()>,
	/// The row processor executing jobs
	processor: RowProcessor,
	/// Long-poll window for queue receives
	long_poll: Duration,
}

impl ImportWorker {
	pub fn initialise_n(n: usize, state: &AppState) -> Vec<ImportWorker> {
		(0..n)
			.map(|_| ImportWorker::from_ref(state))
			.collect::<Vec<_>>()
	}

	fn new(state: &AppState, shutdown_rx: Receiver<()>) -> Self {
		let id = format!("importer-{}", Ulid::new());
		debug!("Starting worker {}", id);
		Self {
			id,
			shutdown_rx,
			processor: RowProcessor::from_ref(state),
			long_poll: Duration::from_secs(state.settings.import.queue_long_poll_sec),
		}
	}

	#[instrument(skip(self, queue), fields(worker = %self.id))]
	pub async fn run(&mut self, queue: Arc<WorkQueue>) -> Result<(), Error> {
		trace!("Worker {} running", self.id);

		loop {
			tokio::select! {
				_ = self.shutdown_rx.recv() => {
					debug!("Worker {} shutting down", self.id);
					break;
				}
				received = queue.receive(1, self.long_poll) => {
					match received {
						Ok(batch) => {
							// An empty batch is just the long poll timing out.
							for message in batch {
								self.process_message(&queue, message).await;
							}
						}
						Err(e) => {
							error!("Worker {} failed to receive from queue: {}", self.id, e);
							sleep(Duration::from_secs(5)).await;
						}
					}
				}
			}
		}

		Ok(())
	}

	async fn process_message(&self, queue: &WorkQueue, message: ReceivedMessage) {
		let job_id = message.payload.job_id;
		trace!("Worker {} picked up job {}", self.id, job_id);

		match self.processor.process_job(job_id).await {
			Ok(()) => {
				if let Err(e) = queue.delete(&message.receipt) {
					error!("Worker {} failed to acknowledge job {}: {}", self.id, job_id, e);
				}
			}
			Err(e) => {
				// Do not acknowledge: the visibility timeout will redeliver
				// and the job's own status guards idempotent re-entry.
				warn!(
					"Worker {} leaving job {} for redelivery: {}",
					self.id, job_id, e
				);
			}
		}
	}
}

impl FromRef<AppState> for ImportWorker {
	fn from_ref(state: &AppState) -> Self {
		let rx = state.work_queue.subscribe_shutdown();
		Self::new(state, rx)
	}
}
