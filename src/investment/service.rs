use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

use super::validator::InvestmentValidator;
use crate::core_types::{EventId, InvestorId, LoanId, UserId};
use crate::error::LoanError;
use crate::loan::{Investment, Investor};
use crate::store::LoanStore;
use crate::transport::{EventPublisher, InvestmentIntent};

/// Acceptance of a request: queued for settlement, not settled
#[derive(Debug, Clone, Serialize)]
pub struct InvestmentReceipt {
    /// Identity the investment will carry once settled
    pub event_id: EventId,
    pub loan_id: LoanId,
    pub investor_id: InvestorId,
    pub amount: Decimal,
    pub status: &'static str,
}

pub struct InvestmentService {
    store: Arc<dyn LoanStore>,
    publisher: Arc<dyn EventPublisher>,
    validator: InvestmentValidator,
}

impl InvestmentService {
    pub fn new(store: Arc<dyn LoanStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            validator: InvestmentValidator::new(store.clone()),
            store,
            publisher,
        }
    }

    /// Validate and queue. Returns as soon as the intent is published.
    pub async fn submit_investment(
        &self,
        investor_user: UserId,
        loan_id: LoanId,
        amount: Decimal,
    ) -> Result<InvestmentReceipt, LoanError> {
        let checked = match self.validator.check(investor_user, loan_id, amount).await {
            Ok(checked) => checked,
            Err(e) => {
                tracing::info!(
                    loan_id = %loan_id,
                    user_id = %investor_user,
                    amount = %amount,
                    reason = e.code(),
                    "Investment request rejected"
                );
                return Err(e);
            }
        };

        let intent = InvestmentIntent {
            id: EventId::new(),
            loan_id,
            investor_id: checked.investor.id,
            amount,
            created_at: Utc::now(),
        };
        let receipt = InvestmentReceipt {
            event_id: intent.id,
            loan_id,
            investor_id: checked.investor.id,
            amount,
            status: "queued",
        };

        self.publisher.publish_intent(intent).await?;

        tracing::info!(
            event_id = %receipt.event_id,
            loan_id = %loan_id,
            investor_id = %receipt.investor_id,
            amount = %amount,
            "Investment intent queued"
        );
        Ok(receipt)
    }

    pub async fn investments_by_loan(&self, loan_id: LoanId) -> Result<Vec<Investment>, LoanError> {
        self.store.investments_by_loan(loan_id).await
    }

    pub async fn investments_for_investor(
        &self,
        investor_user: UserId,
    ) -> Result<Vec<Investment>, LoanError> {
        let investor = self.investor_profile(investor_user).await?;
        self.store.investments_by_investor(investor.id).await
    }

    pub async fn investor_profile(&self, investor_user: UserId) -> Result<Investor, LoanError> {
        self.store
            .investor_by_user(investor_user)
            .await?
            .ok_or(LoanError::InvestorNotFound)
    }
}
