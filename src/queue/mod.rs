//! Durable, at-least-once work queue over the `import_queue` table.
//!
//! Messages carry only a job identifier. A received message is stamped with
//! `locked_at` plus a fresh `locked_by` receipt; until the visibility
//! timeout expires the message is invisible to other receivers. Deleting by
//! receipt acknowledges it; an unacknowledged message reappears after the
//! timeout, so consumers must be idempotent on `job_id`.

use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::domain::app_state::AppPool;
use crate::schema::import_queue::dsl::*;
use crate::{Error, ErrorKind, Result};

pub mod worker;
pub mod worker_pool;

/// Interval between visibility polls while a long-poll receive waits.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// The queue message payload: a single JSON object naming the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
}

/// Opaque handle whose presentation deletes the message.
pub type ReceiptHandle = Uuid;

/// A received message plus the receipt that acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub payload: JobMessage,
    pub receipt: ReceiptHandle,
}

#[derive(Debug, Clone)]
pub struct WorkQueue {
    pool: AppPool,
    visibility: ChronoDuration,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkQueue {
    pub fn new(pool: AppPool, visibility_sec: u64) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            pool,
            visibility: ChronoDuration::seconds(visibility_sec as i64),
            shutdown_tx,
        }
    }

    /// Enqueues a message; returns only once it is durably accepted.
    pub fn publish(&self, message: &JobMessage) -> Result<Uuid> {
        let mut conn = self.pool.get()?;
        let message_id = diesel::insert_into(import_queue)
            .values(payload.eq(serde_json::to_value(message)?))
            .returning(id)
            .get_result(&mut conn)?;
        trace!(job_id = %message.job_id, %message_id, "published queue message");
        Ok(message_id)
    }

    /// Long-polling receive: returns up to `max` visible messages, waiting
    /// up to `wait` before returning an empty batch.
    pub async fn receive(
        &self,
        max: i64,
        wait: std::time::Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let batch = self.receive_now(max)?;
            if !batch.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// One visibility-aware receive attempt. Locks each returned message
    /// with a fresh receipt inside a single transaction.
    pub fn receive_now(&self, max: i64) -> Result<Vec<ReceivedMessage>> {
        let mut conn = self.pool.get()?;
        let visibility = self.visibility;

        conn.transaction(|conn| {
            let cutoff = Utc::now() - visibility;
            let candidates: Vec<(Uuid, serde_json::Value)> = import_queue
                .filter(locked_at.is_null().or(locked_at.lt(cutoff)))
                .order_by(created_at.asc())
                .limit(max)
                .select((id, payload))
                .for_update()
                .skip_locked()
                .load(conn)?;

            let mut received = Vec::with_capacity(candidates.len());
            for (message_id, body) in candidates {
                let receipt: ReceiptHandle = Uuid::new_v4();
                diesel::update(import_queue.find(message_id))
                    .set((locked_at.eq(Some(Utc::now())), locked_by.eq(Some(receipt))))
                    .execute(conn)?;

                match serde_json::from_value::<JobMessage>(body) {
                    Ok(message) => received.push(ReceivedMessage {
                        payload: message,
                        receipt,
                    }),
                    Err(err) => {
                        // A payload we cannot parse would be redelivered
                        // forever; drop it instead.
                        error!(%message_id, "discarding malformed queue payload: {}", err);
                        diesel::delete(import_queue.find(message_id)).execute(conn)?;
                    }
                }
            }
            Ok(received)
        })
    }

    /// Acknowledges a message by its receipt handle. Returns the number of
    /// messages removed (zero when the visibility timeout already expired
    /// and another receiver holds a newer receipt).
    pub fn delete(&self, receipt: &ReceiptHandle) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let removed = diesel::delete(import_queue.filter(locked_by.eq(Some(*receipt))))
            .execute(&mut conn)?;
        if removed == 0 {
            warn!(%receipt, "queue delete matched no message; receipt expired?");
        }
        Ok(removed)
    }

    /// Number of messages currently in the queue, visible or not.
    pub fn depth(&self) -> Result<i64> {
        let mut conn = self.pool.get()?;
        let count = import_queue.count().get_result(&mut conn)?;
        Ok(count)
    }

    /// Get a shutdown receiver that can be used to listen for shutdown signals.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signals all workers to shut down.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .map_err(|_| Error::from((ErrorKind::QueueError, "failed to signal queue shutdown")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_as_the_wire_format() {
        let message = JobMessage {
            job_id: Uuid::parse_str("9f8d1c9a-4f0a-4b44-a2bb-111111111111").unwrap(),
        };
        let rendered = serde_json::to_string(&message).unwrap();
        assert_eq!(
            rendered,
            r#"{"job_id":"9f8d1c9a-4f0a-4b44-a2bb-111111111111"}"#
        );

        let parsed: JobMessage = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn malformed_payloads_do_not_deserialize() {
        assert!(serde_json::from_str::<JobMessage>(r#"{"job":"x"}"#).is_err());
        assert!(serde_json::from_str::<JobMessage>(r#"{"job_id":"not-a-uuid"}"#).is_err());
    }
}
