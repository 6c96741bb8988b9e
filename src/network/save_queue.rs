//! Debounced background upload.
//!
//! Saved facts are handed to a worker thread that waits a short window for
//! more to arrive, then uploads them as one batch. `flush` cuts the window
//! short and returns once everything queued before it has been uploaded.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ExecutionError, KyroFactError, KyroFactResult};
use crate::fact::{FactEnvelope, FactReference};

use super::Network;

#[allow(missing_docs)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SaveQueueConfig {
    /// How long to wait for more facts after the first one arrives.
    pub debounce_ms: u64,
    /// Upload early once this many facts are waiting.
    pub max_batch: usize,
    /// Longest wait between attempts while the network keeps failing.
    pub max_retry_ms: u64,
}

impl Default for SaveQueueConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            max_batch: 500,
            max_retry_ms: 30_000,
        }
    }
}

enum QueueMsg {
    Enqueue(Vec<FactEnvelope>),
    Flush(Sender<KyroFactResult<()>>),
}

/// Background uploader in front of a [`Network`].
pub struct SaveQueue {
    tx: Sender<QueueMsg>,
    uploaded: Arc<AtomicU64>,
    failed_batches: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SaveQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveQueue")
            .field("uploaded", &self.uploaded())
            .field("failed_batches", &self.failed_batches())
            .finish_non_exhaustive()
    }
}

/// First retry delay when the debounce window is shorter.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

fn disconnected() -> KyroFactError {
    ExecutionError::Disconnected {
        path: "save_queue".to_string(),
    }
    .into()
}

impl SaveQueue {
    /// Spawn the worker thread.
    pub fn new(cfg: SaveQueueConfig, network: Arc<dyn Network>) -> KyroFactResult<Self> {
        let (tx, rx) = unbounded::<QueueMsg>();
        let uploaded = Arc::new(AtomicU64::new(0));
        let failed_batches = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            debounce: Duration::from_millis(cfg.debounce_ms),
            max_batch: cfg.max_batch.max(1),
            max_retry: Duration::from_millis(cfg.max_retry_ms),
            failures: 0,
            network,
            uploaded: Arc::clone(&uploaded),
            failed_batches: Arc::clone(&failed_batches),
            batch: Vec::new(),
        };
        let join = thread::Builder::new()
            .name("kyrofact-save-queue".to_string())
            .spawn(move || worker.run(&rx))
            .map_err(|e| KyroFactError::internal(format!("failed to spawn save queue worker: {e}")))?;

        Ok(Self {
            tx,
            uploaded,
            failed_batches,
            join: Mutex::new(Some(join)),
        })
    }

    /// Queue facts for upload. Never blocks.
    pub fn enqueue(&self, envelopes: Vec<FactEnvelope>) -> KyroFactResult<()> {
        if envelopes.is_empty() {
            return Ok(());
        }
        self.tx.send(QueueMsg::Enqueue(envelopes)).map_err(|_| disconnected())
    }

    /// Upload everything queued so far and wait for the result.
    pub fn flush(&self) -> KyroFactResult<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx.send(QueueMsg::Flush(reply_tx)).map_err(|_| disconnected())?;
        reply_rx.recv().map_err(|_| disconnected())?
    }

    /// Facts uploaded so far.
    #[must_use]
    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    /// Batches the network rejected.
    #[must_use]
    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }
}

impl Drop for SaveQueue {
    fn drop(&mut self) {
        // Closing the channel makes the worker upload what is left and exit.
        let (dummy_tx, _) = unbounded::<QueueMsg>();
        drop(std::mem::replace(&mut self.tx, dummy_tx));
        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

struct Worker {
    debounce: Duration,
    max_batch: usize,
    max_retry: Duration,
    /// Consecutive failed attempts for the batch being held.
    failures: u32,
    network: Arc<dyn Network>,
    uploaded: Arc<AtomicU64>,
    failed_batches: Arc<AtomicU64>,
    batch: Vec<FactEnvelope>,
}

impl Worker {
    fn run(mut self, rx: &Receiver<QueueMsg>) {
        let mut deadline = Instant::now();
        loop {
            let msg = if self.batch.is_empty() {
                match rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => return,
                }
            } else {
                match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => {
                        let _ = self.upload_and_reschedule(&mut deadline);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        let _ = self.upload();
                        return;
                    }
                }
            };

            match msg {
                QueueMsg::Enqueue(envelopes) => {
                    if self.batch.is_empty() {
                        deadline = Instant::now() + self.debounce;
                    }
                    self.batch.extend(envelopes);
                    // While retrying, the backoff deadline decides when to try again.
                    if self.failures == 0 && self.batch.len() >= self.max_batch {
                        let _ = self.upload_and_reschedule(&mut deadline);
                    }
                }
                QueueMsg::Flush(reply) => {
                    let _ = reply.send(self.upload_and_reschedule(&mut deadline));
                }
            }
        }
    }

    /// Upload, then push the deadline out if a failed batch is being held.
    fn upload_and_reschedule(&mut self, deadline: &mut Instant) -> KyroFactResult<()> {
        let result = self.upload();
        if !self.batch.is_empty() {
            *deadline = Instant::now() + self.retry_delay();
        }
        result
    }

    /// Doubles with each consecutive failure, capped at `max_retry`.
    fn retry_delay(&self) -> Duration {
        let base = self.debounce.max(MIN_RETRY_DELAY);
        let factor = 2u32.saturating_pow(self.failures.saturating_sub(1).min(16));
        base.saturating_mul(factor).min(self.max_retry.max(base))
    }

    fn upload(&mut self) -> KyroFactResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let mut seen: HashSet<FactReference> = HashSet::new();
        let batch: Vec<FactEnvelope> = std::mem::take(&mut self.batch)
            .into_iter()
            .filter(|e| seen.insert(e.fact.reference().clone()))
            .collect();

        match self.network.save(&batch) {
            Ok(()) => {
                self.failures = 0;
                self.uploaded.fetch_add(batch.len() as u64, Ordering::Relaxed);
                info!(facts = batch.len(), "uploaded batch");
                Ok(())
            }
            Err(err) => {
                self.failed_batches.fetch_add(1, Ordering::Relaxed);
                warn!(facts = batch.len(), error = %err, "upload failed");
                if err.is_retryable() {
                    self.failures = self.failures.saturating_add(1);
                    self.batch = batch;
                } else {
                    self.failures = 0;
                }
                Err(err)
            }
        }
    }
}
