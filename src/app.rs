//! Component wiring shared by the binary and the integration tests

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ProfileKind, ProfileSeed};
use crate::error::LoanError;
use crate::gateway::state::AppState;
use crate::investment::InvestmentService;
use crate::loan::{Borrower, Investor, LoanService};
use crate::notification::Notifier;
use crate::settlement::{
    ConsumerConfig, ConsumerHandle, FundingCompletionTrigger, SettlementConsumer, SettlementEngine,
    ShutdownSignal,
};
use crate::store::LoanStore;
use crate::transport::EventTransport;

pub struct App {
    pub store: Arc<dyn LoanStore>,
    pub transport: Arc<EventTransport>,
    pub loans: Arc<LoanService>,
    pub investments: Arc<InvestmentService>,
    pub engine: Arc<SettlementEngine>,
    pub consumer: Arc<SettlementConsumer>,
    pub shutdown: Arc<ShutdownSignal>,
}

impl App {
    /// Open the transport (replaying its journal) and assemble every service
    pub fn build(
        config: &AppConfig,
        store: Arc<dyn LoanStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, LoanError> {
        let transport = Arc::new(EventTransport::open(&config.transport)?);
        let lock_timeout = config.storage.lock_timeout();

        let loans = Arc::new(LoanService::new(store.clone(), lock_timeout));
        let investments = Arc::new(InvestmentService::new(store.clone(), transport.clone()));

        let trigger = FundingCompletionTrigger::new(
            store.clone(),
            notifier,
            config.notification.document_base_url.clone(),
        );
        let engine = Arc::new(SettlementEngine::new(
            store.clone(),
            transport.clone(),
            trigger,
            lock_timeout,
        ));

        let shutdown = Arc::new(ShutdownSignal::new());
        let consumer = Arc::new(SettlementConsumer::new(
            engine.clone(),
            transport.clone(),
            ConsumerConfig {
                workers: config.settlement.workers,
                poll_interval: Duration::from_millis(config.settlement.poll_interval_ms),
            },
            shutdown.clone(),
        ));

        Ok(Self {
            store,
            transport,
            loans,
            investments,
            engine,
            consumer,
            shutdown,
        })
    }

    /// Upsert configured borrower/investor profiles
    pub async fn seed_profiles(&self, seeds: &[ProfileSeed]) -> Result<(), LoanError> {
        for seed in seeds {
            match seed.kind {
                ProfileKind::Borrower => {
                    self.store
                        .upsert_borrower(&Borrower {
                            id: seed.id.into(),
                            user_id: seed.user_id.into(),
                            full_name: seed.full_name.clone(),
                            email: seed.email.clone(),
                        })
                        .await?
                }
                ProfileKind::Investor => {
                    self.store
                        .upsert_investor(&Investor {
                            id: seed.id.into(),
                            user_id: seed.user_id.into(),
                            full_name: seed.full_name.clone(),
                            email: seed.email.clone(),
                            total_invested: rust_decimal::Decimal::ZERO,
                        })
                        .await?
                }
            }
        }
        if !seeds.is_empty() {
            tracing::info!(count = seeds.len(), "Seeded profiles");
        }
        Ok(())
    }

    pub fn start_settlement(&self) -> ConsumerHandle {
        self.consumer.clone().spawn()
    }

    pub fn gateway_state(&self, jwt_secret: &str) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.store.clone(),
            self.transport.clone(),
            self.loans.clone(),
            self.investments.clone(),
            jwt_secret,
        ))
    }
}
