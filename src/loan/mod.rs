//! Loan lifecycle
//!
//! - [`state`]: the four-state lifecycle and its legal transitions
//! - [`model`]: loan, investment and profile rows
//! - [`service`]: origination, approval, disbursement and loan reads

pub mod model;
pub mod service;
pub mod state;

pub use model::{
    Approval, Borrower, Disbursement, Investment, InvestmentStatus, Investor, Loan, MONEY_SCALE,
    investor_share, is_valid_amount,
};
pub use service::LoanService;
pub use state::LoanState;
