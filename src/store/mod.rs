//! Persistence seam
//!
//! [`LoanStore`] is everything the pipeline needs from storage:
//! - a row-level exclusive lock on a loan ([`LoanStore::lock_loan`])
//! - a multi-row atomic commit through the returned [`LoanTx`]
//! - plain reads that never wait on the row lock
//!
//! Dropping a [`LoanTx`] without committing releases the lock and discards
//! every pending write.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::core_types::{BorrowerId, InvestmentId, InvestorId, LoanId, UserId};
use crate::error::LoanError;
use crate::loan::{Approval, Borrower, Disbursement, Investment, Investor, Loan, LoanState};

/// Rows written by one locked unit of work
#[derive(Debug, Clone)]
pub enum LoanWrite {
    /// Settlement: new investment, updated loan totals/state, and an
    /// increment of the investor's `total_invested` by the investment amount
    Settlement { loan: Loan, investment: Investment },
    Approval { loan: Loan, approval: Approval },
    Disbursement { loan: Loan, disbursement: Disbursement },
}

impl LoanWrite {
    pub fn loan(&self) -> &Loan {
        match self {
            LoanWrite::Settlement { loan, .. }
            | LoanWrite::Approval { loan, .. }
            | LoanWrite::Disbursement { loan, .. } => loan,
        }
    }
}

/// An open transaction holding the exclusive lock on one loan row
#[async_trait]
pub trait LoanTx: Send {
    /// Loan row as read under the lock
    fn loan(&self) -> &Loan;

    /// Whether an investment with this identity has already been committed
    async fn investment_exists(&mut self, id: InvestmentId) -> Result<bool, LoanError>;

    /// Atomically persist `write` and release the lock
    async fn commit(&mut self, write: LoanWrite) -> Result<(), LoanError>;
}

#[async_trait]
pub trait LoanStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Acquire the exclusive row lock, failing with `LockTimeout` after `timeout`
    async fn lock_loan(&self, id: LoanId, timeout: Duration)
    -> Result<Box<dyn LoanTx>, LoanError>;

    // === Loans ===
    async fn insert_loan(&self, loan: &Loan) -> Result<(), LoanError>;
    async fn get_loan(&self, id: LoanId) -> Result<Option<Loan>, LoanError>;
    async fn loans_by_state(&self, state: LoanState) -> Result<Vec<Loan>, LoanError>;
    async fn loans_by_borrower(&self, borrower_id: BorrowerId) -> Result<Vec<Loan>, LoanError>;
    async fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>, LoanError>;
    async fn get_disbursement(&self, loan_id: LoanId) -> Result<Option<Disbursement>, LoanError>;

    // === Investments ===
    async fn investments_by_loan(&self, loan_id: LoanId) -> Result<Vec<Investment>, LoanError>;
    async fn investments_by_investor(
        &self,
        investor_id: InvestorId,
    ) -> Result<Vec<Investment>, LoanError>;
    async fn set_agreement_ref(
        &self,
        investment_id: InvestmentId,
        reference: &str,
    ) -> Result<(), LoanError>;

    // === Profiles (identity resolution) ===
    async fn upsert_borrower(&self, borrower: &Borrower) -> Result<(), LoanError>;
    async fn upsert_investor(&self, investor: &Investor) -> Result<(), LoanError>;
    async fn get_borrower(&self, id: BorrowerId) -> Result<Option<Borrower>, LoanError>;
    async fn borrower_by_user(&self, user_id: UserId) -> Result<Option<Borrower>, LoanError>;
    async fn get_investor(&self, id: InvestorId) -> Result<Option<Investor>, LoanError>;
    async fn investor_by_user(&self, user_id: UserId) -> Result<Option<Investor>, LoanError>;
}
