//! # Audit event publishing
//!
//! `EventPublisher::publish` never waits on the queue: events go into a
//! bounded in-process channel drained by a small pool of worker tasks. When
//! the channel is full the event is dropped and logged. Workers deliver with a
//! per-attempt timeout and at most one retry; delivery failures are logged
//! and go no further.

pub mod sqs;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::evaluation::AuditEvent;

pub use sqs::SqsEventQueue;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("could not serialize audit event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("queue delivery failed: {0}")]
    Delivery(String),
}

/// Destination for serialized audit events.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn send(&self, body: String) -> Result<(), PublishError>;
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub buffer_size: usize,
    pub workers: usize,
    pub publish_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            workers: 4,
            publish_timeout: Duration::from_secs(2),
        }
    }
}

/// Cheap to clone; every clone feeds the same worker pool.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: Option<mpsc::Sender<AuditEvent>>,
}

impl EventPublisher {
    /// Publishing is a no-op, used when no queue is configured.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Spawn the worker pool. Workers exit once every publisher clone is dropped.
    pub fn start(queue: Arc<dyn EventQueue>, config: PublisherConfig) -> (Self, PublisherWorkers) {
        let (sender, receiver) = mpsc::channel(config.buffer_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let queue = Arc::clone(&queue);
                let publish_timeout = config.publish_timeout;
                tokio::spawn(async move {
                    loop {
                        // Only one idle worker waits on the channel at a time
                        let next = receiver.lock().await.recv().await;
                        match next {
                            Some(event) => deliver(queue.as_ref(), &event, publish_timeout).await,
                            None => break,
                        }
                    }
                    debug!(worker = worker, "audit publisher worker stopped");
                })
            })
            .collect();

        info!(
            buffer_size = config.buffer_size,
            workers = config.workers,
            "audit event publisher started"
        );

        (Self { sender: Some(sender) }, PublisherWorkers { handles })
    }

    #[cfg(test)]
    pub(crate) fn from_sender(sender: mpsc::Sender<AuditEvent>) -> Self {
        Self { sender: Some(sender) }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Hand off an event without waiting. Never fails the caller.
    pub fn publish(&self, event: AuditEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    event_id = %event.event_id,
                    fingerprint = %event.fingerprint,
                    "audit queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(event_id = %event.event_id, "audit publisher stopped, dropping event");
            }
        }
    }
}

/// Join handles of the delivery workers, used to drain on shutdown.
#[derive(Debug)]
pub struct PublisherWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl PublisherWorkers {
    /// Wait for workers to flush the channel, giving up after `grace`.
    /// All `EventPublisher` clones must be dropped first.
    pub async fn drain(self, grace: Duration) {
        let all = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(grace, all).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "audit publisher did not drain in time");
        }
    }
}

async fn deliver(queue: &dyn EventQueue, event: &AuditEvent, publish_timeout: Duration) {
    let body = match serde_json::to_string(event) {
        Ok(body) => body,
        Err(e) => {
            let e = PublishError::from(e);
            warn!(event_id = %event.event_id, error = %e, "dropping audit event");
            return;
        }
    };

    for attempt in 1..=2 {
        let outcome = match tokio::time::timeout(publish_timeout, queue.send(body.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PublishError::Timeout(publish_timeout)),
        };

        match outcome {
            Ok(()) => {
                debug!(event_id = %event.event_id, attempt = attempt, "audit event delivered");
                return;
            }
            Err(e) => {
                warn!(event_id = %event.event_id, attempt = attempt, error = %e, "audit event delivery failed");
            }
        }
    }
}
