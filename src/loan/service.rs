//! Loan operations outside the settlement hot path

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::model::{Approval, Disbursement, Loan};
use super::state::LoanState;
use crate::core_types::{ApprovalId, DisbursementId, LoanId, UserId};
use crate::error::LoanError;
use crate::store::{LoanStore, LoanWrite};

pub struct LoanService {
    store: Arc<dyn LoanStore>,
    lock_timeout: Duration,
}

impl LoanService {
    pub fn new(store: Arc<dyn LoanStore>, lock_timeout: Duration) -> Self {
        Self {
            store,
            lock_timeout,
        }
    }

    /// Originate a loan for the borrower behind `borrower_user`
    pub async fn create_loan(
        &self,
        borrower_user: UserId,
        principal_amount: Decimal,
        rate: Decimal,
    ) -> Result<Loan, LoanError> {
        let borrower = self
            .store
            .borrower_by_user(borrower_user)
            .await?
            .ok_or(LoanError::BorrowerNotFound)?;

        let loan = Loan::propose(borrower.id, principal_amount, rate, Utc::now())?;
        self.store.insert_loan(&loan).await?;

        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %borrower.id,
            principal = %loan.principal_amount,
            rate = %loan.rate,
            "Loan proposed"
        );
        Ok(loan)
    }

    /// `proposed -> approved`, recording who validated it and the proof
    pub async fn approve_loan(
        &self,
        loan_id: LoanId,
        validator_id: UserId,
        proof_ref: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<Loan, LoanError> {
        if proof_ref.trim().is_empty() {
            return Err(LoanError::InvalidInput("proof reference is required".into()));
        }

        let mut tx = self.store.lock_loan(loan_id, self.lock_timeout).await?;
        let mut loan = tx.loan().clone();
        loan.approve(approved_at)?;

        let approval = Approval {
            id: ApprovalId::new(),
            loan_id,
            validator_id,
            proof_ref: proof_ref.to_string(),
            approved_at,
        };
        tx.commit(LoanWrite::Approval {
            loan: loan.clone(),
            approval,
        })
        .await?;

        tracing::info!(loan_id = %loan_id, validator_id = %validator_id, "Loan approved");
        Ok(loan)
    }

    /// `invested -> disbursed`, recording the officer and signed agreement
    pub async fn disburse_loan(
        &self,
        loan_id: LoanId,
        officer_id: UserId,
        agreement_ref: &str,
        disbursed_at: DateTime<Utc>,
    ) -> Result<Loan, LoanError> {
        if agreement_ref.trim().is_empty() {
            return Err(LoanError::InvalidInput("agreement reference is required".into()));
        }

        let mut tx = self.store.lock_loan(loan_id, self.lock_timeout).await?;
        let mut loan = tx.loan().clone();
        loan.disburse(disbursed_at)?;

        let disbursement = Disbursement {
            id: DisbursementId::new(),
            loan_id,
            officer_id,
            agreement_ref: agreement_ref.to_string(),
            disbursed_at,
        };
        tx.commit(LoanWrite::Disbursement {
            loan: loan.clone(),
            disbursement,
        })
        .await?;

        tracing::info!(loan_id = %loan_id, officer_id = %officer_id, "Loan disbursed");
        Ok(loan)
    }

    pub async fn get_loan(&self, loan_id: LoanId) -> Result<Loan, LoanError> {
        self.store
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LoanError::LoanNotFound(loan_id.to_string()))
    }

    pub async fn loans_by_state(&self, state: LoanState) -> Result<Vec<Loan>, LoanError> {
        self.store.loans_by_state(state).await
    }

    /// Loans originated by the borrower behind `user_id`
    pub async fn loans_for_borrower(&self, user_id: UserId) -> Result<Vec<Loan>, LoanError> {
        let borrower = self
            .store
            .borrower_by_user(user_id)
            .await?
            .ok_or(LoanError::BorrowerNotFound)?;
        self.store.loans_by_borrower(borrower.id).await
    }

    pub async fn get_approval(&self, loan_id: LoanId) -> Result<Option<Approval>, LoanError> {
        self.store.get_approval(loan_id).await
    }

    pub async fn get_disbursement(
        &self,
        loan_id: LoanId,
    ) -> Result<Option<Disbursement>, LoanError> {
        self.store.get_disbursement(loan_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::BorrowerId;
    use crate::loan::Borrower;
    use crate::store::MemoryStore;

    async fn setup() -> (LoanService, Arc<MemoryStore>, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::new();
        store
            .upsert_borrower(&Borrower {
                id: BorrowerId::new(),
                user_id: user,
                full_name: "Bo Rower".into(),
                email: "bo@example.com".into(),
            })
            .await
            .unwrap();
        let service = LoanService::new(store.clone(), Duration::from_secs(1));
        (service, store, user)
    }

    #[tokio::test]
    async fn test_create_loan_requires_borrower_profile() {
        let (service, _, _) = setup().await;
        let result = service
            .create_loan(UserId::new(), Decimal::from(1000), Decimal::new(1, 1))
            .await;
        assert!(matches!(result, Err(LoanError::BorrowerNotFound)));
    }

    #[tokio::test]
    async fn test_approve_then_reapprove() {
        let (service, _, user) = setup().await;
        let loan = service
            .create_loan(user, Decimal::from(1000), Decimal::new(1, 1))
            .await
            .unwrap();

        let validator = UserId::new();
        let approved = service
            .approve_loan(loan.id, validator, "proof/visit.jpg", Utc::now())
            .await
            .unwrap();
        assert_eq!(approved.state, LoanState::Approved);

        let approval = service.get_approval(loan.id).await.unwrap().unwrap();
        assert_eq!(approval.validator_id, validator);
        assert_eq!(approval.proof_ref, "proof/visit.jpg");

        let again = service
            .approve_loan(loan.id, validator, "proof/visit.jpg", Utc::now())
            .await;
        assert!(matches!(again, Err(LoanError::AlreadyApproved)));
    }

    #[tokio::test]
    async fn test_disburse_before_funding_rejected() {
        let (service, _, user) = setup().await;
        let loan = service
            .create_loan(user, Decimal::from(1000), Decimal::new(1, 1))
            .await
            .unwrap();
        service
            .approve_loan(loan.id, UserId::new(), "proof", Utc::now())
            .await
            .unwrap();

        let result = service
            .disburse_loan(loan.id, UserId::new(), "agreement.pdf", Utc::now())
            .await;
        assert!(matches!(result, Err(LoanError::NotYetInvested)));
        assert!(service.get_disbursement(loan.id).await.unwrap().is_none());
        assert_eq!(
            service.get_loan(loan.id).await.unwrap().state,
            LoanState::Approved
        );
    }

    #[tokio::test]
    async fn test_empty_proof_rejected() {
        let (service, _, user) = setup().await;
        let loan = service
            .create_loan(user, Decimal::from(1000), Decimal::new(1, 1))
            .await
            .unwrap();
        let result = service
            .approve_loan(loan.id, UserId::new(), "  ", Utc::now())
            .await;
        assert!(matches!(result, Err(LoanError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_reads() {
        let (service, _, user) = setup().await;
        let first = service
            .create_loan(user, Decimal::from(1000), Decimal::new(1, 1))
            .await
            .unwrap();
        let second = service
            .create_loan(user, Decimal::from(2000), Decimal::new(2, 1))
            .await
            .unwrap();
        service
            .approve_loan(second.id, UserId::new(), "proof", Utc::now())
            .await
            .unwrap();

        let proposed = service.loans_by_state(LoanState::Proposed).await.unwrap();
        assert_eq!(proposed.len(), 1);
        assert_eq!(proposed[0].id, first.id);

        assert_eq!(service.loans_for_borrower(user).await.unwrap().len(), 2);
        assert!(matches!(
            service.get_loan(LoanId::new()).await,
            Err(LoanError::LoanNotFound(_))
        ));
    }
}
