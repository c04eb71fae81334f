use std::sync::Arc;

use super::auth::TokenVerifier;
use crate::investment::InvestmentService;
use crate::loan::LoanService;
use crate::store::LoanStore;
use crate::transport::EventTransport;

/// Shared gateway state
pub struct AppState {
    pub loans: Arc<LoanService>,
    pub investments: Arc<InvestmentService>,
    pub store: Arc<dyn LoanStore>,
    pub transport: Arc<EventTransport>,
    pub tokens: TokenVerifier,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LoanStore>,
        transport: Arc<EventTransport>,
        loans: Arc<LoanService>,
        investments: Arc<InvestmentService>,
        jwt_secret: &str,
    ) -> Self {
        Self {
            loans,
            investments,
            store,
            transport,
            tokens: TokenVerifier::new(jwt_secret),
        }
    }
}
