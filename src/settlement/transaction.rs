//! Authoritative settlement of one investment intent
//!
//! 1. lock the loan row (bounded wait, timeout is retryable)
//! 2. re-read state and capacity under the lock
//! 3. reject without writing if the intent no longer fits
//! 4. apply the amount, moving the loan to `invested` at exactly zero
//! 5. commit investment + loan + investor aggregate in one unit
//!
//! Fully-funded follow-ups run after the commit and the lock release, and
//! their failures never reach the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use super::trigger::{FundingCompletionTrigger, NotificationReport};
use crate::core_types::InvestmentId;
use crate::error::LoanError;
use crate::loan::{Investment, Loan};
use crate::store::{LoanStore, LoanWrite};
use crate::transport::{EventPublisher, FullyFundedEvent, InvestmentIntent};

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Investment committed. `fully_funded` is set when this settlement
    /// exhausted the loan's capacity.
    Committed {
        investment_id: InvestmentId,
        loan: Loan,
        fully_funded: Option<NotificationReport>,
    },
    /// An earlier delivery of the same intent already committed
    AlreadySettled { investment_id: InvestmentId },
}

pub struct SettlementEngine {
    store: Arc<dyn LoanStore>,
    publisher: Arc<dyn EventPublisher>,
    trigger: FundingCompletionTrigger,
    lock_timeout: Duration,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LoanStore>,
        publisher: Arc<dyn EventPublisher>,
        trigger: FundingCompletionTrigger,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            trigger,
            lock_timeout,
        }
    }

    pub async fn settle(&self, intent: &InvestmentIntent) -> Result<SettlementOutcome, LoanError> {
        let investment_id = InvestmentId::from(intent.id);

        // Profiles are not guarded by the loan lock; read them first
        let investor = self
            .store
            .get_investor(intent.investor_id)
            .await?
            .ok_or(LoanError::InvestorNotFound)?;

        let mut tx = self.store.lock_loan(intent.loan_id, self.lock_timeout).await?;

        if tx.investment_exists(investment_id).await? {
            debug!(event_id = %intent.id, "Intent already settled");
            return Ok(SettlementOutcome::AlreadySettled { investment_id });
        }

        let mut loan = tx.loan().clone();
        let borrower = self
            .store
            .get_borrower(loan.borrower_id)
            .await?
            .ok_or(LoanError::BorrowerNotFound)?;
        if borrower.user_id == investor.user_id {
            return Err(LoanError::SelfInvestment);
        }

        let now = Utc::now();
        let fully_funded = loan.apply_investment(intent.amount, now)?;
        let investment = Investment::settled(
            intent.id,
            loan.id,
            investor.id,
            intent.amount,
            intent.created_at,
            now,
        );

        tx.commit(LoanWrite::Settlement {
            loan: loan.clone(),
            investment,
        })
        .await?;
        drop(tx);

        info!(
            event_id = %intent.id,
            loan_id = %loan.id,
            investor_id = %investor.id,
            amount = %intent.amount,
            remaining = %loan.remaining_investment,
            state = %loan.state,
            "Investment settled"
        );

        let report = if fully_funded {
            Some(self.on_fully_funded(&loan).await)
        } else {
            None
        };

        Ok(SettlementOutcome::Committed {
            investment_id,
            loan,
            fully_funded: report,
        })
    }

    async fn on_fully_funded(&self, loan: &Loan) -> NotificationReport {
        info!(loan_id = %loan.id, principal = %loan.principal_amount, "Loan fully funded");

        let event = FullyFundedEvent {
            loan: loan.clone(),
            funded_at: Utc::now(),
        };
        if let Err(e) = self.publisher.publish_fully_funded(event).await {
            error!(loan_id = %loan.id, error = %e, "Failed to publish fully-funded event");
        }

        self.trigger.fire(loan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    use crate::config::TransportConfig;
    use crate::core_types::{BorrowerId, EventId, InvestorId, LoanId, UserId};
    use crate::loan::{Borrower, Investor, LoanState};
    use crate::notification::LogNotifier;
    use crate::store::MemoryStore;
    use crate::transport::EventTransport;

    struct Fixture {
        engine: SettlementEngine,
        store: Arc<MemoryStore>,
        transport: Arc<EventTransport>,
        investor: Investor,
        borrower: Borrower,
        loan: Loan,
    }

    async fn fixture(principal: i64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(EventTransport::in_memory(&TransportConfig::default()));

        let borrower = Borrower {
            id: BorrowerId::new(),
            user_id: UserId::new(),
            full_name: "Bo".into(),
            email: "bo@example.com".into(),
        };
        store.upsert_borrower(&borrower).await.unwrap();
        let investor = Investor {
            id: InvestorId::new(),
            user_id: UserId::new(),
            full_name: "Ina".into(),
            email: "ina@example.com".into(),
            total_invested: Decimal::ZERO,
        };
        store.upsert_investor(&investor).await.unwrap();

        let mut loan = Loan::propose(
            borrower.id,
            Decimal::from(principal),
            Decimal::new(1, 1),
            Utc::now(),
        )
        .unwrap();
        loan.approve(Utc::now()).unwrap();
        store.insert_loan(&loan).await.unwrap();

        let trigger = FundingCompletionTrigger::new(store.clone(), Arc::new(LogNotifier), "docs");
        let engine = SettlementEngine::new(
            store.clone(),
            transport.clone(),
            trigger,
            Duration::from_millis(500),
        );

        Fixture {
            engine,
            store,
            transport,
            investor,
            borrower,
            loan,
        }
    }

    fn intent(loan_id: LoanId, investor_id: InvestorId, amount: i64) -> InvestmentIntent {
        InvestmentIntent {
            id: EventId::new(),
            loan_id,
            investor_id,
            amount: Decimal::from(amount),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_partial_settlement() {
        let f = fixture(1000).await;
        let outcome = f
            .engine
            .settle(&intent(f.loan.id, f.investor.id, 400))
            .await
            .unwrap();

        match outcome {
            SettlementOutcome::Committed {
                loan, fully_funded, ..
            } => {
                assert_eq!(loan.remaining_investment, Decimal::from(600));
                assert_eq!(loan.state, LoanState::Approved);
                assert!(fully_funded.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let investor = f.store.get_investor(f.investor.id).await.unwrap().unwrap();
        assert_eq!(investor.total_invested, Decimal::from(400));
        assert_eq!(f.transport.pending_fully_funded(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_intent_is_not_applied_twice() {
        let f = fixture(1000).await;
        let event = intent(f.loan.id, f.investor.id, 100);

        f.engine.settle(&event).await.unwrap();
        let second = f.engine.settle(&event).await.unwrap();
        assert_eq!(
            second,
            SettlementOutcome::AlreadySettled {
                investment_id: InvestmentId::from(event.id)
            }
        );

        let loan = f.store.get_loan(f.loan.id).await.unwrap().unwrap();
        assert_eq!(loan.invested_amount, Decimal::from(100));
        assert_eq!(f.store.investments_by_loan(f.loan.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_over_capacity_rejected_under_lock() {
        let f = fixture(1000).await;
        let result = f
            .engine
            .settle(&intent(f.loan.id, f.investor.id, 1001))
            .await;
        assert!(matches!(result, Err(LoanError::ExceedsLimit)));
        assert_eq!(f.store.get_loan(f.loan.id).await.unwrap().unwrap(), f.loan);
    }

    #[tokio::test]
    async fn test_self_investment_rejected_under_lock() {
        let f = fixture(1000).await;
        let own = Investor {
            id: InvestorId::new(),
            user_id: f.borrower.user_id,
            full_name: "Bo".into(),
            email: "bo@example.com".into(),
            total_invested: Decimal::ZERO,
        };
        f.store.upsert_investor(&own).await.unwrap();

        let result = f.engine.settle(&intent(f.loan.id, own.id, 10)).await;
        assert!(matches!(result, Err(LoanError::SelfInvestment)));
        assert!(f.store.investments_by_loan(f.loan.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_funding_emits_event_and_notifies() {
        let f = fixture(500).await;
        let outcome = f
            .engine
            .settle(&intent(f.loan.id, f.investor.id, 500))
            .await
            .unwrap();

        let SettlementOutcome::Committed {
            loan, fully_funded, ..
        } = outcome
        else {
            panic!("expected commit");
        };
        assert_eq!(loan.state, LoanState::Invested);
        assert_eq!(loan.remaining_investment, Decimal::ZERO);
        let report = fully_funded.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(f.transport.pending_fully_funded(), 1);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retryable() {
        let f = fixture(1000).await;
        let _held = f.store.hold_row_lock(f.loan.id).await.unwrap();

        let err = f
            .engine
            .settle(&intent(f.loan.id, f.investor.id, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, LoanError::LockTimeout));
        assert!(err.is_retryable());
    }
}
