//! Loan Settlement - peer-to-peer loan funding engine
//!
//! Investors fund approved loans in partial amounts. Requests are checked
//! optimistically, queued per loan, and settled one at a time under the
//! loan's row lock so that a loan can never be over-funded.
//!
//! # Modules
//!
//! - [`core_types`] - Entity identities
//! - [`error`] - Error taxonomy
//! - [`loan`] - Lifecycle state machine, models, origination/approval/disbursement
//! - [`store`] - Persistence seam (`MemoryStore`, `PgStore`)
//! - [`transport`] - Partitioned, journaled event channels
//! - [`investment`] - Advisory validation and intent publishing
//! - [`settlement`] - Locked settlement, worker pool, funding-completion trigger
//! - [`notification`] - Agreement delivery
//! - [`gateway`] - HTTP boundary

// Core types - must be first!
pub mod core_types;
pub mod error;

pub mod config;
pub mod db;
pub mod logging;

pub mod loan;
pub mod store;
pub mod transport;

pub mod investment;
pub mod notification;
pub mod roles;
pub mod settlement;

pub mod app;
pub mod gateway;

// Convenient re-exports at crate root
pub use app::App;
pub use core_types::{BorrowerId, EventId, InvestmentId, InvestorId, LoanId, UserId};
pub use error::{ErrorClass, LoanError};
pub use loan::{Borrower, Investment, InvestmentStatus, Investor, Loan, LoanState};
pub use settlement::{SettlementEngine, SettlementOutcome};
pub use store::{LoanStore, MemoryStore, PgStore};
pub use transport::{EventPublisher, EventTransport, FullyFundedEvent, InvestmentIntent};
