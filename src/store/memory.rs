//! In-process store
//!
//! Row locks are per-loan async mutexes kept in a `DashMap`; committed rows
//! live behind one short-held table mutex, so plain reads never wait on a
//! row lock. Used by the `memory` storage backend and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;

use super::{LoanStore, LoanTx, LoanWrite};
use crate::core_types::{BorrowerId, InvestmentId, InvestorId, LoanId, UserId};
use crate::error::LoanError;
use crate::loan::{Approval, Borrower, Disbursement, Investment, Investor, Loan, LoanState};

#[derive(Default)]
struct Tables {
    loans: HashMap<LoanId, Loan>,
    /// Insertion-ordered
    investments: Vec<Investment>,
    investment_index: HashMap<InvestmentId, usize>,
    investors: HashMap<InvestorId, Investor>,
    borrowers: HashMap<BorrowerId, Borrower>,
    approvals: HashMap<LoanId, Approval>,
    disbursements: HashMap<LoanId, Disbursement>,
}

fn lock_tables(tables: &Mutex<Tables>) -> Result<MutexGuard<'_, Tables>, LoanError> {
    tables
        .lock()
        .map_err(|_| LoanError::Internal("memory store mutex poisoned".into()))
}

pub struct MemoryStore {
    row_locks: DashMap<LoanId, Arc<tokio::sync::Mutex<()>>>,
    tables: Arc<Mutex<Tables>>,
    injected_failures: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            row_locks: DashMap::new(),
            tables: Arc::new(Mutex::new(Tables::default())),
            injected_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make the next `n` commits fail with a storage error after the row
    /// lock has been acquired. Nothing is written by a failed commit.
    pub fn fail_next_commits(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    /// Take the row lock outside of any transaction (simulates a slow settler)
    pub async fn hold_row_lock(&self, id: LoanId) -> Option<OwnedMutexGuard<()>> {
        let lock = self.row_locks.get(&id).map(|l| l.value().clone())?;
        Some(lock.lock_owned().await)
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, LoanError> {
        lock_tables(&self.tables)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryTx {
    guard: Option<OwnedMutexGuard<()>>,
    loan: Loan,
    tables: Arc<Mutex<Tables>>,
    injected_failures: Arc<AtomicU32>,
}

impl MemoryTx {
    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn apply(&self, write: LoanWrite) -> Result<(), LoanError> {
        let mut tables = lock_tables(&self.tables)?;

        match write {
            LoanWrite::Settlement { loan, investment } => {
                if tables.investment_index.contains_key(&investment.id) {
                    return Err(LoanError::DuplicateInvestment(investment.id.to_string()));
                }
                let investor = tables
                    .investors
                    .get_mut(&investment.investor_id)
                    .ok_or(LoanError::InvestorNotFound)?;
                investor.total_invested += investment.amount;

                let idx = tables.investments.len();
                tables.investment_index.insert(investment.id, idx);
                tables.investments.push(investment);
                tables.loans.insert(loan.id, loan);
            }
            LoanWrite::Approval { loan, approval } => {
                tables.approvals.insert(loan.id, approval);
                tables.loans.insert(loan.id, loan);
            }
            LoanWrite::Disbursement { loan, disbursement } => {
                tables.disbursements.insert(loan.id, disbursement);
                tables.loans.insert(loan.id, loan);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LoanTx for MemoryTx {
    fn loan(&self) -> &Loan {
        &self.loan
    }

    async fn investment_exists(&mut self, id: InvestmentId) -> Result<bool, LoanError> {
        Ok(lock_tables(&self.tables)?.investment_index.contains_key(&id))
    }

    async fn commit(&mut self, write: LoanWrite) -> Result<(), LoanError> {
        let guard = self
            .guard
            .take()
            .ok_or_else(|| LoanError::Internal("transaction already finished".into()))?;

        if write.loan().id != self.loan.id {
            return Err(LoanError::Internal(format!(
                "write targets loan {} but lock is held on {}",
                write.loan().id,
                self.loan.id
            )));
        }

        if self.take_injected_failure() {
            return Err(LoanError::Storage("injected commit failure".into()));
        }

        let result = self.apply(write);
        drop(guard);
        result
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn lock_loan(
        &self,
        id: LoanId,
        timeout: Duration,
    ) -> Result<Box<dyn LoanTx>, LoanError> {
        let lock = self
            .row_locks
            .get(&id)
            .map(|l| l.value().clone())
            .ok_or_else(|| LoanError::LoanNotFound(id.to_string()))?;

        let guard = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| LoanError::LockTimeout)?;

        let loan = self
            .tables()?
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| LoanError::LoanNotFound(id.to_string()))?;

        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            loan,
            tables: self.tables.clone(),
            injected_failures: self.injected_failures.clone(),
        }))
    }

    async fn insert_loan(&self, loan: &Loan) -> Result<(), LoanError> {
        let mut tables = self.tables()?;
        if tables.loans.contains_key(&loan.id) {
            return Err(LoanError::Storage(format!("loan {} already exists", loan.id)));
        }
        tables.loans.insert(loan.id, loan.clone());
        self.row_locks
            .insert(loan.id, Arc::new(tokio::sync::Mutex::new(())));
        Ok(())
    }

    async fn get_loan(&self, id: LoanId) -> Result<Option<Loan>, LoanError> {
        Ok(self.tables()?.loans.get(&id).cloned())
    }

    async fn loans_by_state(&self, state: LoanState) -> Result<Vec<Loan>, LoanError> {
        let mut loans: Vec<Loan> = self
            .tables()?
            .loans
            .values()
            .filter(|l| l.state == state)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.created_at);
        Ok(loans)
    }

    async fn loans_by_borrower(&self, borrower_id: BorrowerId) -> Result<Vec<Loan>, LoanError> {
        let mut loans: Vec<Loan> = self
            .tables()?
            .loans
            .values()
            .filter(|l| l.borrower_id == borrower_id)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.created_at);
        Ok(loans)
    }

    async fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>, LoanError> {
        Ok(self.tables()?.approvals.get(&loan_id).cloned())
    }

    async fn get_disbursement(&self, loan_id: LoanId) -> Result<Option<Disbursement>, LoanError> {
        Ok(self.tables()?.disbursements.get(&loan_id).cloned())
    }

    async fn investments_by_loan(&self, loan_id: LoanId) -> Result<Vec<Investment>, LoanError> {
        Ok(self
            .tables()?
            .investments
            .iter()
            .filter(|i| i.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn investments_by_investor(
        &self,
        investor_id: InvestorId,
    ) -> Result<Vec<Investment>, LoanError> {
        Ok(self
            .tables()?
            .investments
            .iter()
            .filter(|i| i.investor_id == investor_id)
            .cloned()
            .collect())
    }

    async fn set_agreement_ref(
        &self,
        investment_id: InvestmentId,
        reference: &str,
    ) -> Result<(), LoanError> {
        let mut tables = self.tables()?;
        let idx = *tables
            .investment_index
            .get(&investment_id)
            .ok_or_else(|| LoanError::Storage(format!("investment {} missing", investment_id)))?;
        let investment = &mut tables.investments[idx];
        investment.agreement_ref = Some(reference.to_string());
        investment.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn upsert_borrower(&self, borrower: &Borrower) -> Result<(), LoanError> {
        self.tables()?
            .borrowers
            .insert(borrower.id, borrower.clone());
        Ok(())
    }

    async fn upsert_investor(&self, investor: &Investor) -> Result<(), LoanError> {
        let mut tables = self.tables()?;
        // total_invested is owned by settlement commits
        let total_invested = tables
            .investors
            .get(&investor.id)
            .map_or(investor.total_invested, |existing| existing.total_invested);
        tables.investors.insert(
            investor.id,
            Investor {
                total_invested,
                ..investor.clone()
            },
        );
        Ok(())
    }

    async fn get_borrower(&self, id: BorrowerId) -> Result<Option<Borrower>, LoanError> {
        Ok(self.tables()?.borrowers.get(&id).cloned())
    }

    async fn borrower_by_user(&self, user_id: UserId) -> Result<Option<Borrower>, LoanError> {
        Ok(self
            .tables()?
            .borrowers
            .values()
            .find(|b| b.user_id == user_id)
            .cloned())
    }

    async fn get_investor(&self, id: InvestorId) -> Result<Option<Investor>, LoanError> {
        Ok(self.tables()?.investors.get(&id).cloned())
    }

    async fn investor_by_user(&self, user_id: UserId) -> Result<Option<Investor>, LoanError> {
        Ok(self
            .tables()?
            .investors
            .values()
            .find(|i| i.user_id == user_id)
            .cloned())
    }
}
