//! Loan Error Types
//!
//! One taxonomy for the whole pipeline. The class of an error decides what
//! the settlement consumer does with the event that produced it.

use thiserror::Error;

use crate::loan::LoanState;

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input or a row the store refuses; retrying cannot succeed
    Validation,
    /// Intrinsically invalid request; retrying cannot succeed
    BusinessRule,
    /// The same event was already settled
    Idempotency,
    /// Infrastructure hiccup; always retried
    Transient,
}

#[derive(Error, Debug, Clone)]
pub enum LoanError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero with at most 8 decimal places")]
    InvalidAmount,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The database refused the row; the same write will be refused again
    #[error("Rejected by storage constraint: {0}")]
    ConstraintViolation(String),

    // === Business Rule Errors ===
    #[error("Investor not found")]
    InvestorNotFound,

    #[error("Borrower not found")]
    BorrowerNotFound,

    #[error("Loan not found: {0}")]
    LoanNotFound(String),

    #[error("Loan is not approved (current state: {0})")]
    LoanNotApproved(LoanState),

    #[error("Loan is already approved")]
    AlreadyApproved,

    #[error("Loan is not fully invested yet")]
    NotYetInvested,

    #[error("Illegal loan state transition: {from} -> {to}")]
    InvalidTransition { from: LoanState, to: LoanState },

    #[error("Borrower cannot invest in their own loan")]
    SelfInvestment,

    #[error("Investment amount exceeds remaining loan amount")]
    ExceedsLimit,

    #[error("Caller lacks the capability for this operation")]
    Forbidden,

    // === Idempotency Errors ===
    #[error("Investment already recorded: {0}")]
    DuplicateInvestment(String),

    // === Transient Errors ===
    #[error("Timed out waiting for loan row lock")]
    LockTimeout,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Event transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoanError {
    /// Stable error code for API responses and logs
    pub fn code(&self) -> &'static str {
        match self {
            LoanError::InvalidAmount => "INVALID_AMOUNT",
            LoanError::InvalidInput(_) => "INVALID_INPUT",
            LoanError::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            LoanError::InvestorNotFound => "INVESTOR_NOT_FOUND",
            LoanError::BorrowerNotFound => "BORROWER_NOT_FOUND",
            LoanError::LoanNotFound(_) => "LOAN_NOT_FOUND",
            LoanError::LoanNotApproved(_) => "LOAN_NOT_APPROVED",
            LoanError::AlreadyApproved => "ALREADY_APPROVED",
            LoanError::NotYetInvested => "NOT_YET_INVESTED",
            LoanError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LoanError::SelfInvestment => "SELF_INVESTMENT",
            LoanError::ExceedsLimit => "EXCEEDS_LIMIT",
            LoanError::Forbidden => "FORBIDDEN",
            LoanError::DuplicateInvestment(_) => "DUPLICATE_INVESTMENT",
            LoanError::LockTimeout => "LOCK_TIMEOUT",
            LoanError::Storage(_) => "STORAGE_ERROR",
            LoanError::TransportUnavailable(_) => "TRANSPORT_UNAVAILABLE",
            LoanError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            LoanError::InvalidAmount
            | LoanError::InvalidInput(_)
            | LoanError::ConstraintViolation(_) => ErrorClass::Validation,
            LoanError::InvestorNotFound
            | LoanError::BorrowerNotFound
            | LoanError::LoanNotFound(_)
            | LoanError::LoanNotApproved(_)
            | LoanError::AlreadyApproved
            | LoanError::NotYetInvested
            | LoanError::InvalidTransition { .. }
            | LoanError::SelfInvestment
            | LoanError::ExceedsLimit
            | LoanError::Forbidden => ErrorClass::BusinessRule,
            LoanError::DuplicateInvestment(_) => ErrorClass::Idempotency,
            LoanError::LockTimeout
            | LoanError::Storage(_)
            | LoanError::TransportUnavailable(_)
            | LoanError::Internal(_) => ErrorClass::Transient,
        }
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LoanError::InvalidAmount | LoanError::InvalidInput(_) => 400,
            LoanError::Forbidden => 403,
            LoanError::InvestorNotFound
            | LoanError::BorrowerNotFound
            | LoanError::LoanNotFound(_) => 404,
            LoanError::DuplicateInvestment(_) => 409,
            LoanError::LoanNotApproved(_)
            | LoanError::AlreadyApproved
            | LoanError::NotYetInvested
            | LoanError::InvalidTransition { .. }
            | LoanError::SelfInvestment
            | LoanError::ExceedsLimit
            | LoanError::ConstraintViolation(_) => 422,
            LoanError::Internal(_) => 500,
            LoanError::LockTimeout
            | LoanError::Storage(_)
            | LoanError::TransportUnavailable(_) => 503,
        }
    }
}

/// PostgreSQL SQLSTATE for `lock_not_available`
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";
/// PostgreSQL SQLSTATE for `unique_violation`
const PG_UNIQUE_VIOLATION: &str = "23505";
/// `check_violation`, `foreign_key_violation`, `numeric_value_out_of_range`
const PG_PERMANENT_REJECTIONS: [&str; 3] = ["23514", "23503", "22003"];

impl From<sqlx::Error> for LoanError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            match db_err.code().as_deref() {
                Some(PG_LOCK_NOT_AVAILABLE) => return LoanError::LockTimeout,
                Some(PG_UNIQUE_VIOLATION) => {
                    return LoanError::DuplicateInvestment(db_err.message().to_string());
                }
                Some(code) if PG_PERMANENT_REJECTIONS.contains(&code) => {
                    return LoanError::ConstraintViolation(format!(
                        "{} ({})",
                        db_err.message(),
                        code
                    ));
                }
                _ => {}
            }
        }
        LoanError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for LoanError {
    fn from(e: std::io::Error) -> Self {
        LoanError::TransportUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LoanError::SelfInvestment.code(), "SELF_INVESTMENT");
        assert_eq!(LoanError::ExceedsLimit.code(), "EXCEEDS_LIMIT");
        assert_eq!(LoanError::LockTimeout.code(), "LOCK_TIMEOUT");
    }

    #[test]
    fn test_classification() {
        assert!(LoanError::LockTimeout.is_retryable());
        assert!(LoanError::Storage("disk".into()).is_retryable());
        assert!(!LoanError::ExceedsLimit.is_retryable());
        assert!(!LoanError::LoanNotApproved(LoanState::Invested).is_retryable());
        assert_eq!(
            LoanError::DuplicateInvestment("x".into()).class(),
            ErrorClass::Idempotency
        );
        assert_eq!(LoanError::InvalidAmount.class(), ErrorClass::Validation);
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LoanError::InvalidAmount.http_status(), 400);
        assert_eq!(LoanError::Forbidden.http_status(), 403);
        assert_eq!(LoanError::LoanNotFound("x".into()).http_status(), 404);
        assert_eq!(LoanError::ExceedsLimit.http_status(), 422);
        assert_eq!(LoanError::LockTimeout.http_status(), 503);
    }

    #[derive(Debug)]
    struct PgError(&'static str);

    impl std::fmt::Display for PgError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "sqlstate {}", self.0)
        }
    }

    impl std::error::Error for PgError {}

    impl sqlx::error::DatabaseError for PgError {
        fn message(&self) -> &str {
            "rejected"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some(self.0.into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn from_sqlstate(code: &'static str) -> LoanError {
        sqlx::Error::Database(Box::new(PgError(code))).into()
    }

    #[test]
    fn test_sqlstate_mapping() {
        assert!(matches!(from_sqlstate("55P03"), LoanError::LockTimeout));
        assert!(matches!(
            from_sqlstate("23505"),
            LoanError::DuplicateInvestment(_)
        ));
        assert!(matches!(from_sqlstate("40001"), LoanError::Storage(_)));
        assert!(from_sqlstate("40001").is_retryable());

        // refused rows must not be redelivered forever
        for code in ["23514", "23503", "22003"] {
            let err = from_sqlstate(code);
            assert!(matches!(err, LoanError::ConstraintViolation(_)), "{}", code);
            assert!(!err.is_retryable(), "{}", code);
            assert_eq!(err.class(), ErrorClass::Validation);
        }
    }

    #[test]
    fn test_display() {
        let err = LoanError::LoanNotApproved(LoanState::Proposed);
        assert_eq!(err.to_string(), "Loan is not approved (current state: proposed)");
    }
}
