//! Advisory investment checks
//!
//! Runs against the currently observed loan row without taking its lock.
//! Passing here only means the request is worth queuing; the settlement
//! transaction repeats the capacity and state checks under the lock.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::core_types::{LoanId, UserId};
use crate::error::LoanError;
use crate::loan::{Investor, Loan, LoanState, is_valid_amount};
use crate::store::LoanStore;

/// Profiles and loan snapshot that passed the advisory checks
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub investor: Investor,
    pub loan: Loan,
    pub amount: Decimal,
}

pub struct InvestmentValidator {
    store: Arc<dyn LoanStore>,
}

impl InvestmentValidator {
    pub fn new(store: Arc<dyn LoanStore>) -> Self {
        Self { store }
    }

    pub async fn check(
        &self,
        investor_user: UserId,
        loan_id: LoanId,
        amount: Decimal,
    ) -> Result<ValidatedRequest, LoanError> {
        let investor = self
            .store
            .investor_by_user(investor_user)
            .await?
            .ok_or(LoanError::InvestorNotFound)?;

        let loan = self
            .store
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LoanError::LoanNotFound(loan_id.to_string()))?;

        if loan.state != LoanState::Approved {
            return Err(LoanError::LoanNotApproved(loan.state));
        }

        let borrower = self
            .store
            .get_borrower(loan.borrower_id)
            .await?
            .ok_or(LoanError::BorrowerNotFound)?;
        if borrower.user_id == investor.user_id {
            return Err(LoanError::SelfInvestment);
        }

        if !is_valid_amount(amount) {
            return Err(LoanError::InvalidAmount);
        }
        // Snapshot may be stale; settlement re-checks under the lock
        if amount > loan.remaining_investment {
            return Err(LoanError::ExceedsLimit);
        }

        Ok(ValidatedRequest {
            investor,
            loan,
            amount,
        })
    }
}
