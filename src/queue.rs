// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Bounded, deduplicating work queue keyed on [`RoutingKey`].
//!
//! - **Bounded**: [`QueueHandle::enqueue`] awaits channel capacity, so producers slow
//!   down when the worker falls behind. Nothing is dropped.
//! - **Deduplicating**: a key that is already waiting is not queued twice. A key is
//!   removed from the waiting set when the worker picks it up, so an event arriving
//!   during processing queues one more pass.
//! - **Retrying**: a failed key is queued again after a per-key exponential backoff,
//!   which resets once the key succeeds.
//!
//! There is exactly one worker. Reconciliations of different keys that touch the same
//! image stream are therefore serialized, which avoids resource version conflicts
//! between them.

use crate::errors::DistributorError;
use crate::retry::{requeue_backoff, ExponentialBackoff};
use crate::routing::RoutingKey;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// The worker has stopped and no longer accepts keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("work queue is closed")]
pub struct QueueClosed;

type Pending = Arc<Mutex<HashSet<RoutingKey>>>;

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashSet<RoutingKey>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<RoutingKey>,
    pending: Pending,
}

impl QueueHandle {
    /// Queue a key unless it is already waiting.
    ///
    /// Returns `true` if the key was queued and `false` if it was collapsed into a
    /// waiting duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the worker is gone.
    pub async fn enqueue(&self, key: RoutingKey) -> Result<bool, QueueClosed> {
        if !lock(&self.pending).insert(key.clone()) {
            debug!(key = %key, "Key already queued");
            return Ok(false);
        }

        if let Err(mpsc::error::SendError(key)) = self.sender.send(key).await {
            lock(&self.pending).remove(&key);
            return Err(QueueClosed);
        }
        Ok(true)
    }

    /// Number of keys waiting to be processed.
    pub(crate) fn len(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Consumer side of the queue.
pub struct WorkQueue {
    receiver: mpsc::Receiver<RoutingKey>,
    handle: QueueHandle,
    backoff: ExponentialBackoff,
    failures: HashMap<RoutingKey, ExponentialBackoff>,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` waiting keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_backoff(capacity, requeue_backoff())
    }

    /// Create a queue with a custom requeue schedule.
    #[must_use]
    pub fn with_backoff(capacity: usize, backoff: ExponentialBackoff) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            receiver,
            handle: QueueHandle {
                sender,
                pending: Arc::default(),
            },
            backoff,
            failures: HashMap::new(),
        }
    }

    /// A producer handle.
    #[must_use]
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Process keys one at a time until every producer handle is dropped.
    ///
    /// The queue keeps its own handle for requeues, so in practice this only returns
    /// when the surrounding task is cancelled.
    pub async fn run<F, Fut>(mut self, mut process: F)
    where
        F: FnMut(RoutingKey) -> Fut,
        Fut: Future<Output = Result<(), DistributorError>>,
    {
        info!("Work queue worker started");
        while let Some(key) = self.receiver.recv().await {
            lock(&self.handle.pending).remove(&key);
            debug!(key = %key, waiting = self.handle.len(), "Processing key");

            match process(key.clone()).await {
                Ok(()) => {
                    self.failures.remove(&key);
                }
                Err(err) => {
                    let delay = self
                        .failures
                        .entry(key.clone())
                        .or_insert_with(|| self.backoff.clone())
                        .next_backoff();
                    error!(key = %key, error = %err, retry_after = ?delay, "Reconciliation failed, requeueing");

                    let handle = self.handle.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if handle.enqueue(key).await.is_err() {
                            debug!("Work queue closed before requeue");
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod queue_tests;
