//! Event transport
//!
//! Two channels:
//! - `investment-intent`: many publishers, drained by the settlement workers
//! - `fully-funded`: published after a loan's capacity reaches zero
//!
//! Both are partitioned by loan identity. Delivery is at-least-once: a message
//! stays on its partition until acknowledged. With a journal directory
//! configured every publish and every intent acknowledgement is fsynced
//! before it takes effect, and un-acknowledged intents are re-enqueued in
//! their original order when the transport is reopened.

pub mod journal;
pub mod topic;

pub use journal::{Journal, JournalRecord};
pub use topic::{Delivery, Topic};

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::TransportConfig;
use crate::core_types::{EventId, InvestorId, LoanId};
use crate::error::LoanError;
use crate::loan::Loan;

pub const INTENT_JOURNAL: &str = "investment_intents.journal";
pub const FULLY_FUNDED_JOURNAL: &str = "fully_funded.journal";

/// A request to invest, queued for authoritative settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentIntent {
    /// Becomes the identity of the settled investment
    pub id: EventId,
    pub loan_id: LoanId,
    pub investor_id: InvestorId,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Loan snapshot taken when remaining capacity reached zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullyFundedEvent {
    pub loan: Loan,
    pub funded_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_intent(&self, intent: InvestmentIntent) -> Result<(), LoanError>;
    async fn publish_fully_funded(&self, event: FullyFundedEvent) -> Result<(), LoanError>;
}

pub struct EventTransport {
    intents: Arc<Topic<InvestmentIntent>>,
    fully_funded: Arc<Topic<FullyFundedEvent>>,
    intent_journal: Option<Arc<Mutex<Journal>>>,
    funded_journal: Option<Arc<Mutex<Journal>>>,
}

/// Append `record` on the blocking pool, then run `then` while the journal
/// lock is still held so journal order and topic order agree
async fn journaled<R, F>(
    journal: &Option<Arc<Mutex<Journal>>>,
    record: JournalRecord,
    then: F,
) -> Result<R, LoanError>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let Some(journal) = journal.clone() else {
        return Ok(then());
    };
    tokio::task::spawn_blocking(move || {
        let mut journal = journal
            .lock()
            .map_err(|_| LoanError::TransportUnavailable("journal mutex poisoned".into()))?;
        journal.append(&record)?;
        Ok(then())
    })
    .await
    .map_err(|e| LoanError::Internal(format!("journal task failed: {}", e)))?
}

impl EventTransport {
    /// Non-durable transport
    pub fn in_memory(config: &TransportConfig) -> Self {
        Self {
            intents: Arc::new(Topic::new(
                "investment-intent",
                config.partitions,
                config.redelivery_backoff(),
            )),
            fully_funded: Arc::new(Topic::new(
                "fully-funded",
                config.partitions,
                config.redelivery_backoff(),
            )),
            intent_journal: None,
            funded_journal: None,
        }
    }

    /// Open per `config`, replaying the journal when one is configured
    pub fn open(config: &TransportConfig) -> Result<Self, LoanError> {
        match &config.journal_dir {
            Some(dir) => Self::open_journaled(config, dir),
            None => Ok(Self::in_memory(config)),
        }
    }

    fn open_journaled(config: &TransportConfig, dir: &Path) -> Result<Self, LoanError> {
        std::fs::create_dir_all(dir)?;
        let mut transport = Self::in_memory(config);

        let intent_path = dir.join(INTENT_JOURNAL);
        let (intent_journal, intent_records) = Journal::open(&intent_path)?;
        let total_records = intent_records.len();
        let acked: HashSet<EventId> = intent_records
            .iter()
            .filter_map(|r| match r {
                JournalRecord::Ack(id) => Some(*id),
                _ => None,
            })
            .collect();

        let pending: Vec<JournalRecord> = intent_records
            .into_iter()
            .filter(|r| matches!(r, JournalRecord::Intent(intent) if !acked.contains(&intent.id)))
            .collect();

        for record in &pending {
            if let JournalRecord::Intent(intent) = record {
                transport
                    .intents
                    .publish(intent.loan_id.as_uuid().as_u128(), intent.clone());
            }
        }

        // Drop settled history so the file only holds outstanding work
        let intent_journal = if pending.len() < total_records {
            drop(intent_journal);
            let compacted = Journal::rewrite(&intent_path, &pending)?;
            tracing::info!(
                path = %intent_path.display(),
                dropped_records = total_records - pending.len(),
                kept_records = pending.len(),
                "Intent journal compacted"
            );
            compacted
        } else {
            intent_journal
        };

        let (funded_journal, funded_records) = Journal::open(dir.join(FULLY_FUNDED_JOURNAL))?;

        tracing::info!(
            journal_dir = %dir.display(),
            replayed_intents = pending.len(),
            acked_intents = acked.len(),
            fully_funded_events = funded_records.len(),
            "Event journal replayed"
        );

        transport.intent_journal = Some(Arc::new(Mutex::new(intent_journal)));
        transport.funded_journal = Some(Arc::new(Mutex::new(funded_journal)));
        Ok(transport)
    }

    pub fn intent_partitions(&self) -> usize {
        self.intents.partition_count()
    }

    /// Wait up to `wait` for the next deliverable intent on `partitions`
    pub async fn fetch_intent(
        &self,
        partitions: &[usize],
        wait: Duration,
    ) -> Option<Delivery<InvestmentIntent>> {
        self.intents.fetch(partitions, wait).await
    }

    /// Acknowledge a settled or terminally rejected intent
    pub async fn ack_intent(&self, delivery: &Delivery<InvestmentIntent>) -> Result<(), LoanError> {
        let topic = self.intents.clone();
        let (partition, seq) = (delivery.partition, delivery.seq);
        let removed = journaled(
            &self.intent_journal,
            JournalRecord::Ack(delivery.message.id),
            move || topic.ack(partition, seq),
        )
        .await?;
        if !removed {
            tracing::warn!(
                event_id = %delivery.message.id,
                partition = delivery.partition,
                "Ack for an intent that is no longer at the partition head"
            );
        }
        Ok(())
    }

    /// Leave the intent unacknowledged; it is redelivered after the backoff
    pub fn nack_intent(&self, delivery: &Delivery<InvestmentIntent>) {
        self.intents.nack(delivery.partition, delivery.seq);
    }

    /// Intents published but not yet acknowledged
    pub fn pending_intents(&self) -> usize {
        self.intents.len()
    }

    pub async fn fetch_fully_funded(&self, wait: Duration) -> Option<Delivery<FullyFundedEvent>> {
        let all: Vec<usize> = (0..self.fully_funded.partition_count()).collect();
        self.fully_funded.fetch(&all, wait).await
    }

    pub fn ack_fully_funded(&self, delivery: &Delivery<FullyFundedEvent>) {
        self.fully_funded.ack(delivery.partition, delivery.seq);
    }

    pub fn pending_fully_funded(&self) -> usize {
        self.fully_funded.len()
    }
}

#[async_trait]
impl EventPublisher for EventTransport {
    async fn publish_intent(&self, intent: InvestmentIntent) -> Result<(), LoanError> {
        let topic = self.intents.clone();
        let key = intent.loan_id.as_uuid().as_u128();
        let record = JournalRecord::Intent(intent.clone());
        let seq = journaled(&self.intent_journal, record, move || {
            topic.publish(key, intent)
        })
        .await?;
        tracing::debug!(seq, topic = self.intents.name(), "Intent published");
        Ok(())
    }

    async fn publish_fully_funded(&self, event: FullyFundedEvent) -> Result<(), LoanError> {
        let topic = self.fully_funded.clone();
        let key = event.loan.id.as_uuid().as_u128();
        let record = JournalRecord::FullyFunded(event.clone());
        journaled(&self.funded_journal, record, move || {
            topic.publish(key, event);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(journal_dir: Option<PathBuf>) -> TransportConfig {
        TransportConfig {
            journal_dir,
            partitions: 4,
            redelivery_backoff_ms: 0,
        }
    }

    fn intent(loan_id: LoanId, amount: i64) -> InvestmentIntent {
        InvestmentIntent {
            id: EventId::new(),
            loan_id,
            investor_id: InvestorId::new(),
            amount: Decimal::from(amount),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unacked_intents_replayed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let loan = LoanId::new();
        let a = intent(loan, 1);
        let b = intent(loan, 2);
        let c = intent(loan, 3);

        {
            let transport = EventTransport::open(&config(Some(dir.path().to_path_buf()))).unwrap();
            transport.publish_intent(a.clone()).await.unwrap();
            transport.publish_intent(b.clone()).await.unwrap();
            transport.publish_intent(c.clone()).await.unwrap();

            let all: Vec<usize> = (0..4).collect();
            let first = transport
                .fetch_intent(&all, Duration::from_millis(10))
                .await
                .unwrap();
            assert_eq!(first.message, a);
            transport.ack_intent(&first).await.unwrap();
        }

        let reopened = EventTransport::open(&config(Some(dir.path().to_path_buf()))).unwrap();
        assert_eq!(reopened.pending_intents(), 2);

        let all: Vec<usize> = (0..4).collect();
        let next = reopened
            .fetch_intent(&all, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(next.message, b);
        reopened.ack_intent(&next).await.unwrap();
        let last = reopened
            .fetch_intent(&all, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(last.message, c);
    }

    #[tokio::test]
    async fn test_reopen_compacts_settled_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INTENT_JOURNAL);
        let loan = LoanId::new();
        let all: Vec<usize> = (0..4).collect();

        {
            let transport = EventTransport::open(&config(Some(dir.path().to_path_buf()))).unwrap();
            for amount in 1..=20 {
                transport.publish_intent(intent(loan, amount)).await.unwrap();
            }
            for _ in 0..19 {
                let d = transport
                    .fetch_intent(&all, Duration::from_millis(10))
                    .await
                    .unwrap();
                transport.ack_intent(&d).await.unwrap();
            }
        }
        let before = std::fs::metadata(&path).unwrap().len();

        let reopened = EventTransport::open(&config(Some(dir.path().to_path_buf()))).unwrap();
        assert_eq!(reopened.pending_intents(), 1);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after * 20 < before, "journal not compacted: {} -> {}", before, after);

        let last = reopened
            .fetch_intent(&all, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(last.message.amount, Decimal::from(20));
        reopened.ack_intent(&last).await.unwrap();
        drop(reopened);

        let empty = EventTransport::open(&config(Some(dir.path().to_path_buf()))).unwrap();
        assert_eq!(empty.pending_intents(), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_replay_in_delivery_order() {
        let dir = tempfile::tempdir().unwrap();
        let transport =
            Arc::new(EventTransport::open(&config(Some(dir.path().to_path_buf()))).unwrap());
        let loan = LoanId::new();

        let publishes = (1..=32).map(|amount| {
            let transport = transport.clone();
            tokio::spawn(async move { transport.publish_intent(intent(loan, amount)).await })
        });
        for result in futures::future::join_all(publishes).await {
            result.unwrap().unwrap();
        }

        let replayed = EventTransport::open(&config(Some(dir.path().to_path_buf()))).unwrap();
        let all: Vec<usize> = (0..4).collect();
        for _ in 0..32 {
            let live = transport
                .fetch_intent(&all, Duration::from_millis(10))
                .await
                .unwrap();
            let again = replayed
                .fetch_intent(&all, Duration::from_millis(10))
                .await
                .unwrap();
            assert_eq!(live.message, again.message);
            transport.ack_intent(&live).await.unwrap();
            replayed.ack_intent(&again).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_nacked_intent_is_redelivered() {
        let transport = EventTransport::in_memory(&config(None));
        let loan = LoanId::new();
        let original = intent(loan, 5);
        transport.publish_intent(original.clone()).await.unwrap();

        let all: Vec<usize> = (0..4).collect();
        let first = transport
            .fetch_intent(&all, Duration::from_millis(10))
            .await
            .unwrap();
        transport.nack_intent(&first);

        let again = transport
            .fetch_intent(&all, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(again.message.id, original.id);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn test_fully_funded_channel() {
        let transport = EventTransport::in_memory(&config(None));
        let mut loan = Loan::propose(
            crate::core_types::BorrowerId::new(),
            Decimal::from(10),
            Decimal::ZERO,
            Utc::now(),
        )
        .unwrap();
        loan.approve(Utc::now()).unwrap();
        loan.apply_investment(Decimal::from(10), Utc::now()).unwrap();

        transport
            .publish_fully_funded(FullyFundedEvent {
                loan: loan.clone(),
                funded_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(transport.pending_fully_funded(), 1);

        let delivery = transport
            .fetch_fully_funded(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(delivery.message.loan.id, loan.id);
        transport.ack_fully_funded(&delivery);
        assert_eq!(transport.pending_fully_funded(), 0);
    }
}
