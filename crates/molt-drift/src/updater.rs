// crates/molt-drift/src/updater.rs
//
// Background drift bookkeeping. Request handlers hand samples to a bounded
// queue without waiting; a dedicated task drains the queue into the
// `DriftMonitor` and emits `drift.{namespace}` whenever the per-namespace
// throttle allows. When the queue is full the incoming sample is dropped and
// counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::detection::DriftMonitor;

/// One queued vector for a namespace.
#[derive(Debug, Clone)]
pub struct DriftSample {
    pub namespace: String,
    pub vector: Vec<f32>,
}

/// Cheap, cloneable handle used on the write path.
#[derive(Debug, Clone)]
pub struct DriftSampler {
    tx: mpsc::Sender<DriftSample>,
    dropped: Arc<AtomicU64>,
}

impl DriftSampler {
    /// Create a sampler and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DriftSample>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Queue a sample without waiting. Returns `false` if it was dropped.
    pub fn offer(&self, namespace: &str, vector: Vec<f32>) -> bool {
        let sample = DriftSample {
            namespace: namespace.to_string(),
            vector,
        };
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(namespace, dropped, "drift queue full, sample dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Samples dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drains a sampler queue into a `DriftMonitor`.
pub struct DriftUpdater;

impl DriftUpdater {
    /// Spawn the updater task. It stops when every sampler is dropped or
    /// `cancel` fires, and resolves to the number of samples processed.
    pub fn spawn(
        monitor: Arc<DriftMonitor>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (DriftSampler, JoinHandle<u64>) {
        let (sampler, rx) = DriftSampler::channel(capacity);
        let handle = tokio::spawn(Self::run(monitor, rx, cancel));
        (sampler, handle)
    }

    /// Updater loop.
    pub async fn run(
        monitor: Arc<DriftMonitor>,
        mut rx: mpsc::Receiver<DriftSample>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut processed = 0u64;
        tracing::debug!("drift updater started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("drift updater cancelled");
                    break;
                }
                sample = rx.recv() => match sample {
                    Some(sample) => {
                        monitor.record_sample(&sample.namespace, &sample.vector);
                        monitor.maybe_emit_drift(&sample.namespace);
                        processed += 1;
                    }
                    None => break,
                }
            }
        }

        tracing::debug!(processed, "drift updater stopped");
        processed
    }
}
