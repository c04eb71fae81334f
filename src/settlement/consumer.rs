//! Settlement worker pool
//!
//! Worker `i` of `W` owns every intent partition `p` with `p % W == i`, so
//! all intents for one loan are handled by one worker, strictly in order.
//! Different loans settle in parallel across workers.
//!
//! Acknowledgement policy per delivery:
//! - committed, or already committed by an earlier delivery: ack
//! - business-rule rejection under the lock: ack (terminal, logged)
//! - transient failure: leave unacknowledged, redelivered after backoff

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::transaction::{SettlementEngine, SettlementOutcome};
use crate::error::ErrorClass;
use crate::transport::EventTransport;

/// Cooperative stop flag shared by the workers
pub struct ShutdownSignal {
    shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if shutdown was requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub workers: usize,
    /// Idle wait between empty fetches
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Settled,
    Duplicate,
    /// Terminal business rejection, carries the error code
    Rejected(&'static str),
    /// Left unacknowledged for redelivery
    Retry,
}

#[derive(Debug, Default)]
pub struct ConsumerStats {
    settled: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub settled: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub retried: u64,
}

impl ConsumerStats {
    fn record(&self, disposition: &Disposition) {
        let counter = match disposition {
            Disposition::Settled => &self.settled,
            Disposition::Duplicate => &self.duplicates,
            Disposition::Rejected(_) => &self.rejected,
            Disposition::Retry => &self.retried,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            settled: self.settled.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

pub struct SettlementConsumer {
    engine: Arc<SettlementEngine>,
    transport: Arc<EventTransport>,
    config: ConsumerConfig,
    shutdown: Arc<ShutdownSignal>,
    stats: ConsumerStats,
}

impl SettlementConsumer {
    pub fn new(
        engine: Arc<SettlementEngine>,
        transport: Arc<EventTransport>,
        config: ConsumerConfig,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            engine,
            transport,
            config,
            shutdown,
            stats: ConsumerStats::default(),
        }
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Partitions owned by `worker` out of `workers`
    pub fn assigned_partitions(worker: usize, workers: usize, partitions: usize) -> Vec<usize> {
        (0..partitions).filter(|p| p % workers == worker).collect()
    }

    /// One fetch/settle/acknowledge cycle. `None` if nothing was deliverable.
    pub async fn process_one(&self, partitions: &[usize]) -> Option<Disposition> {
        let delivery = tokio::select! {
            d = self.transport.fetch_intent(partitions, self.config.poll_interval) => d?,
            _ = self.shutdown.wait() => return None,
        };
        let intent = &delivery.message;

        // Once fetched the cycle runs to the end, shutdown or not
        let disposition = match self.engine.settle(intent).await {
            Ok(SettlementOutcome::Committed { .. }) => Disposition::Settled,
            Ok(SettlementOutcome::AlreadySettled { .. }) => Disposition::Duplicate,
            Err(e) => match e.class() {
                ErrorClass::Transient => {
                    warn!(
                        event_id = %intent.id,
                        loan_id = %intent.loan_id,
                        attempt = delivery.attempt,
                        error = %e,
                        "Settlement failed, will redeliver"
                    );
                    Disposition::Retry
                }
                ErrorClass::Idempotency => Disposition::Duplicate,
                ErrorClass::BusinessRule | ErrorClass::Validation => {
                    warn!(
                        event_id = %intent.id,
                        loan_id = %intent.loan_id,
                        investor_id = %intent.investor_id,
                        amount = %intent.amount,
                        reason = e.code(),
                        "Investment rejected at settlement"
                    );
                    Disposition::Rejected(e.code())
                }
            },
        };

        let disposition = if disposition == Disposition::Retry {
            self.transport.nack_intent(&delivery);
            disposition
        } else if let Err(e) = self.transport.ack_intent(&delivery).await {
            // Redelivery will find the investment and ack as duplicate
            error!(event_id = %intent.id, error = %e, "Failed to acknowledge intent");
            self.transport.nack_intent(&delivery);
            Disposition::Retry
        } else {
            disposition
        };

        self.stats.record(&disposition);
        Some(disposition)
    }

    async fn run_worker(self: Arc<Self>, worker: usize) {
        let partitions = Self::assigned_partitions(
            worker,
            self.config.workers,
            self.transport.intent_partitions(),
        );
        info!(worker, partitions = ?partitions, "Settlement worker started");

        while !self.shutdown.is_shutdown_requested() {
            if let Some(disposition) = self.process_one(&partitions).await {
                debug!(worker, ?disposition, "Delivery processed");
            }
        }

        info!(worker, "Settlement worker stopped");
    }

    /// Start the pool; stop it with [`ConsumerHandle::stop`]
    pub fn spawn(self: Arc<Self>) -> ConsumerHandle {
        let workers = (0..self.config.workers.max(1))
            .map(|i| tokio::spawn(self.clone().run_worker(i)))
            .collect();
        ConsumerHandle {
            shutdown: self.shutdown.clone(),
            workers,
        }
    }
}

pub struct ConsumerHandle {
    shutdown: Arc<ShutdownSignal>,
    workers: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Signal the workers and wait for in-flight cycles to finish
    pub async fn stop(self) {
        self.shutdown.request_shutdown();
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                error!(error = %e, "Settlement worker panicked");
            }
        }
    }
}
