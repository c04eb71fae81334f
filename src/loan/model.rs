//! Loan, investment and profile models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::LoanState;
use crate::core_types::{
    ApprovalId, BorrowerId, DisbursementId, EventId, InvestmentId, InvestorId, LoanId, UserId,
};
use crate::error::LoanError;

/// Decimal places kept by every stored amount and rate
pub const MONEY_SCALE: u32 = 8;

/// Strictly positive and storable without rounding
pub fn is_valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO && amount.normalize().scale() <= MONEY_SCALE
}

/// Share of the borrower rate passed through to investors (platform keeps 20%)
pub fn investor_share() -> Decimal {
    Decimal::new(8, 1)
}

/// Loan row
///
/// Invariant after every committed mutation:
/// `invested_amount + remaining_investment == principal_amount`,
/// `remaining_investment >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower_id: BorrowerId,
    pub principal_amount: Decimal,
    pub invested_amount: Decimal,
    pub remaining_investment: Decimal,
    /// Interest rate charged to the borrower
    pub rate: Decimal,
    /// Return passed to investors, derived from `rate`
    pub roi: Decimal,
    pub total_interest: Decimal,
    pub state: LoanState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Originate a new loan in `proposed` state
    pub fn propose(
        borrower_id: BorrowerId,
        principal_amount: Decimal,
        rate: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, LoanError> {
        if !is_valid_amount(principal_amount) {
            return Err(LoanError::InvalidAmount);
        }
        if rate < Decimal::ZERO {
            return Err(LoanError::InvalidInput("rate must not be negative".into()));
        }
        if rate.normalize().scale() > MONEY_SCALE {
            return Err(LoanError::InvalidInput(format!(
                "rate allows at most {} decimal places",
                MONEY_SCALE
            )));
        }

        Ok(Self {
            id: LoanId::new(),
            borrower_id,
            principal_amount,
            invested_amount: Decimal::ZERO,
            remaining_investment: principal_amount,
            rate,
            roi: (rate * investor_share()).round_dp(MONEY_SCALE),
            total_interest: (principal_amount * rate).round_dp(MONEY_SCALE),
            state: LoanState::Proposed,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn capacity_balanced(&self) -> bool {
        self.invested_amount + self.remaining_investment == self.principal_amount
            && self.remaining_investment >= Decimal::ZERO
    }

    fn advance(&mut self, next: LoanState, now: DateTime<Utc>) -> Result<(), LoanError> {
        if !self.state.can_transition_to(next) {
            return Err(LoanError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// `proposed -> approved`
    pub fn approve(&mut self, now: DateTime<Utc>) -> Result<(), LoanError> {
        if self.state != LoanState::Proposed {
            return Err(LoanError::AlreadyApproved);
        }
        self.advance(LoanState::Approved, now)
    }

    /// `invested -> disbursed`
    pub fn disburse(&mut self, now: DateTime<Utc>) -> Result<(), LoanError> {
        if self.state != LoanState::Invested {
            return Err(LoanError::NotYetInvested);
        }
        self.advance(LoanState::Disbursed, now)
    }

    /// Apply one settled investment against remaining capacity.
    ///
    /// Must only be called on a row read under the loan lock. Returns `true`
    /// when this investment exhausted the capacity and moved the loan to
    /// `invested`.
    pub fn apply_investment(
        &mut self,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<bool, LoanError> {
        if !self.state.accepts_investment() {
            return Err(LoanError::LoanNotApproved(self.state));
        }
        if !is_valid_amount(amount) {
            return Err(LoanError::InvalidAmount);
        }
        if amount > self.remaining_investment {
            return Err(LoanError::ExceedsLimit);
        }

        self.invested_amount += amount;
        self.remaining_investment -= amount;
        self.updated_at = now;

        if self.remaining_investment <= Decimal::ZERO {
            self.remaining_investment = Decimal::ZERO;
            self.advance(LoanState::Invested, now)?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Investment settlement status
///
/// Settlement only ever produces `Completed`; the other values are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestmentStatus {
    Pending,
    Completed,
    Failed,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Pending => "pending",
            InvestmentStatus::Completed => "completed",
            InvestmentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvestmentStatus::Pending),
            "completed" => Some(InvestmentStatus::Completed),
            "failed" => Some(InvestmentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub loan_id: LoanId,
    pub investor_id: InvestorId,
    pub amount: Decimal,
    pub status: InvestmentStatus,
    /// Generated agreement letter, set once the loan is fully funded
    pub agreement_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Investment {
    /// Build the record for a settled intent. Identity is the event identity.
    pub fn settled(
        event_id: EventId,
        loan_id: LoanId,
        investor_id: InvestorId,
        amount: Decimal,
        requested_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InvestmentId::from(event_id),
            loan_id,
            investor_id,
            amount,
            status: InvestmentStatus::Completed,
            agreement_ref: None,
            created_at: requested_at,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Borrower {
    pub id: BorrowerId,
    pub user_id: UserId,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investor {
    pub id: InvestorId,
    pub user_id: UserId,
    pub full_name: String,
    pub email: String,
    /// Sum of settled investment amounts, maintained inside settlement commits
    pub total_invested: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub loan_id: LoanId,
    pub validator_id: UserId,
    pub proof_ref: String,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disbursement {
    pub id: DisbursementId,
    pub loan_id: LoanId,
    pub officer_id: UserId,
    pub agreement_ref: String,
    pub disbursed_at: DateTime<Utc>,
}
