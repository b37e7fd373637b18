use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::queue::WorkQueue;
use crate::queue::worker::ImportWorker;

/// How long a draining pool waits for its workers. Must comfortably exceed
/// the queue's long-poll window so a worker idling in `receive` observes
/// the shutdown broadcast before the deadline hits.
const DRAIN_DEADLINE: Duration = Duration::from_secs(25);

/// Owner of the import worker tasks.
///
/// Workers stop at the next loop iteration once the queue's shutdown
/// broadcast fires. A worker still mid-import at the drain deadline is
/// aborted; its unacknowledged message becomes visible again after the
/// queue's visibility timeout and is picked up by the next worker, here or
/// on another host.
pub struct WorkerPool {
	pub queue: Arc<WorkQueue>,
	workers: Vec<JoinHandle<()>>,
	cancellation_token: CancellationToken,
}

impl WorkerPool {
	pub fn new(queue: Arc<WorkQueue>, token: CancellationToken) -> Self {
		Self {
			queue,
			workers: Vec::new(),
			cancellation_token: token,
		}
	}

	/// Parks until the cancellation token fires, then drains the pool.
	pub async fn monitor(&mut self) -> Result<(), Error> {
		self.cancellation_token.cancelled().await;
		info!("Stopping import workers...");
		self.shutdown().await
	}

	/// Spawns one worker onto the runtime and tracks its handle.
	pub fn add_worker(&mut self, mut worker: ImportWorker) {
		let queue = Arc::clone(&self.queue);
		self.workers.push(tokio::spawn(async move {
			if let Err(e) = worker.run(queue).await {
				error!("Import worker exited with an error: {}", e);
			}
		}));
	}

	pub fn add_workers(&mut self, workers: Vec<ImportWorker>) {
		for worker in workers {
			self.add_worker(worker);
		}
		debug!("Import worker pool running {} workers", self.workers.len());
	}

	/// Broadcasts shutdown and waits up to [`DRAIN_DEADLINE`] for each
	/// worker to finish the message it is on. Workers that outlive the
	/// deadline are aborted; redelivery covers whatever they were doing.
	pub async fn shutdown(&mut self) -> Result<(), Error> {
		if self.workers.is_empty() {
			return Ok(());
		}
		self.queue.shutdown()?;

		let deadline = Instant::now() + DRAIN_DEADLINE;
		let mut drained = 0usize;
		let mut aborted = 0usize;
		for mut handle in std::mem::take(&mut self.workers) {
			let remaining = deadline.saturating_duration_since(Instant::now());
			match timeout(remaining, &mut handle).await {
				Ok(_) => drained += 1,
				Err(_) => {
					handle.abort();
					aborted += 1;
				}
			}
		}

		if aborted == 0 {
			info!("Import worker pool drained ({} workers)", drained);
		} else {
			warn!(
				"Aborted {} of {} import workers at the drain deadline; \
				 their in-flight messages reappear after the visibility timeout",
				aborted,
				drained + aborted
			);
		}
		Ok(())
	}

	/// Number of workers still owned by the pool.
	pub fn worker_count(&self) -> usize {
		self.workers.len()
	}
}
