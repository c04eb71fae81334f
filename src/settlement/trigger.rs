//! Funding-completion side effects
//!
//! Runs once per loan right after the settlement that exhausted its
//! capacity. Every investment is handled on its own: a failure for one
//! investor is recorded in the report and the rest still go out.

use std::sync::Arc;

use tracing::{info, warn};

use crate::core_types::{InvestmentId, LoanId};
use crate::loan::{Investment, Loan};
use crate::notification::{AgreementNotice, Notifier};
use crate::store::LoanStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFailure {
    pub investment_id: InvestmentId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<NotificationFailure>,
}

impl NotificationReport {
    fn fail(&mut self, investment_id: InvestmentId, reason: String) {
        self.failures.push(NotificationFailure {
            investment_id,
            reason,
        });
    }
}

pub struct FundingCompletionTrigger {
    store: Arc<dyn LoanStore>,
    notifier: Arc<dyn Notifier>,
    document_base_url: String,
}

impl FundingCompletionTrigger {
    pub fn new(
        store: Arc<dyn LoanStore>,
        notifier: Arc<dyn Notifier>,
        document_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            document_base_url: document_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Agreement letter location for one investment
    pub fn agreement_ref(&self, investment: &Investment) -> String {
        format!(
            "{}/loan_{}/investor_{}/agreement_{}.pdf",
            self.document_base_url, investment.loan_id, investment.investor_id, investment.id
        )
    }

    /// Generate, attach and deliver one agreement per investment. Never fails.
    pub async fn fire(&self, loan: &Loan) -> NotificationReport {
        let mut report = NotificationReport::default();

        let investments = match self.store.investments_by_loan(loan.id).await {
            Ok(investments) => investments,
            Err(e) => {
                warn!(loan_id = %loan.id, error = %e, "Cannot enumerate investments for notification");
                return report;
            }
        };

        for investment in &investments {
            report.attempted += 1;
            match self.notify_one(loan.id, investment).await {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    warn!(
                        loan_id = %loan.id,
                        investment_id = %investment.id,
                        investor_id = %investment.investor_id,
                        reason = %reason,
                        "Agreement notification failed"
                    );
                    report.fail(investment.id, reason);
                }
            }
        }

        info!(
            loan_id = %loan.id,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failures.len(),
            "Funding completion notifications sent"
        );
        report
    }

    async fn notify_one(&self, loan_id: LoanId, investment: &Investment) -> Result<(), String> {
        let document_ref = self.agreement_ref(investment);
        self.store
            .set_agreement_ref(investment.id, &document_ref)
            .await
            .map_err(|e| format!("attach agreement: {}", e))?;

        let investor = self
            .store
            .get_investor(investment.investor_id)
            .await
            .map_err(|e| format!("load investor: {}", e))?
            .ok_or_else(|| "investor profile missing".to_string())?;

        let notice = AgreementNotice {
            recipient: investor.email,
            display_name: investor.full_name,
            document_ref,
            loan_id,
        };
        self.notifier
            .deliver(&notice)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::core_types::{BorrowerId, EventId, InvestorId, UserId};
    use crate::loan::Investor;
    use crate::notification::NotifyError;
    use crate::store::{LoanWrite, MemoryStore};

    /// Records notices, failing for one recipient
    struct FlakyNotifier {
        fail_for: String,
        sent: Mutex<Vec<AgreementNotice>>,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn deliver(&self, notice: &AgreementNotice) -> Result<(), NotifyError> {
            if notice.recipient == self.fail_for {
                return Err(NotifyError::Rejected("mailbox full".into()));
            }
            self.sent.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    async fn funded_loan(store: &MemoryStore, investors: &[(Investor, i64)]) -> Loan {
        let principal: i64 = investors.iter().map(|(_, a)| a).sum();
        let mut loan = Loan::propose(
            BorrowerId::new(),
            Decimal::from(principal),
            Decimal::new(1, 1),
            Utc::now(),
        )
        .unwrap();
        loan.approve(Utc::now()).unwrap();
        store.insert_loan(&loan).await.unwrap();

        for (investor, amount) in investors {
            store.upsert_investor(investor).await.unwrap();
            let mut tx = store.lock_loan(loan.id, Duration::from_secs(1)).await.unwrap();
            let mut updated = tx.loan().clone();
            updated
                .apply_investment(Decimal::from(*amount), Utc::now())
                .unwrap();
            let investment = Investment::settled(
                EventId::new(),
                loan.id,
                investor.id,
                Decimal::from(*amount),
                Utc::now(),
                Utc::now(),
            );
            tx.commit(LoanWrite::Settlement {
                loan: updated.clone(),
                investment,
            })
            .await
            .unwrap();
            loan = updated;
        }
        loan
    }

    fn investor(email: &str) -> Investor {
        Investor {
            id: InvestorId::new(),
            user_id: UserId::new(),
            full_name: email.split('@').next().unwrap_or_default().to_string(),
            email: email.to_string(),
            total_invested: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_others() {
        let store = Arc::new(MemoryStore::new());
        let loan = funded_loan(
            &store,
            &[
                (investor("a@example.com"), 10),
                (investor("b@example.com"), 20),
                (investor("c@example.com"), 30),
            ],
        )
        .await;

        let notifier = Arc::new(FlakyNotifier {
            fail_for: "b@example.com".into(),
            sent: Mutex::new(Vec::new()),
        });
        let trigger =
            FundingCompletionTrigger::new(store.clone(), notifier.clone(), "https://docs.test/");
        let report = trigger.fire(&loan).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 2);

        // references are attached even where delivery failed
        for investment in store.investments_by_loan(loan.id).await.unwrap() {
            let reference = investment.agreement_ref.unwrap();
            assert!(reference.starts_with(&format!("https://docs.test/loan_{}/", loan.id)));
            assert!(reference.ends_with(&format!("agreement_{}.pdf", investment.id)));
        }
    }
}
