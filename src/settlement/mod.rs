//! Settlement pipeline
//!
//! - [`transaction`]: locked, all-or-nothing application of one intent
//! - [`consumer`]: worker pool draining the intent channel
//! - [`trigger`]: agreement generation and notification on full funding

pub mod consumer;
pub mod transaction;
pub mod trigger;

pub use consumer::{
    ConsumerConfig, ConsumerHandle, ConsumerStatsSnapshot, Disposition, SettlementConsumer,
    ShutdownSignal,
};
pub use transaction::{SettlementEngine, SettlementOutcome};
pub use trigger::{FundingCompletionTrigger, NotificationFailure, NotificationReport};
