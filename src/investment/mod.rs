//! Caller-facing investment stage
//!
//! Requests are checked against an unlocked snapshot and, if plausible,
//! queued as intents. Nothing here touches loan capacity.

pub mod service;
pub mod validator;

pub use service::{InvestmentReceipt, InvestmentService};
pub use validator::{InvestmentValidator, ValidatedRequest};
