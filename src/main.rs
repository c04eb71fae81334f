//! Loan settlement service
//!
//! ```text
//! loan_settlement [--env dev] [--port 8080]
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use loan_settlement::App;
use loan_settlement::config::{AppConfig, StorageBackend};
use loan_settlement::db::Database;
use loan_settlement::gateway;
use loan_settlement::notification::{LogNotifier, Notifier, WebhookNotifier};
use loan_settlement::settlement::ShutdownSignal;
use loan_settlement::store::{LoanStore, MemoryStore, PgStore};
use loan_settlement::transport::EventTransport;

fn arg_value(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|w| names.contains(&w[0].as_str()))
        .map(|w| w[1].clone())
}

fn get_env() -> String {
    arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    arg_value(&["--port"]).and_then(|p| p.parse().ok())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LoanStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let url = config
                .storage
                .postgres_url
                .as_deref()
                .context("storage.postgres_url missing")?;
            let db = Database::connect(url, config.storage.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.init_schema().await.context("Failed to initialize schema")?;
            Ok(Arc::new(PgStore::new(db.pool().clone())))
        }
    }
}

fn build_notifier(config: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.notification.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Agreement notices go to webhook");
            Ok(Arc::new(WebhookNotifier::new(url.clone())?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Drain the fully-funded channel into the audit log
async fn audit_fully_funded(transport: Arc<EventTransport>, shutdown: Arc<ShutdownSignal>) {
    while !shutdown.is_shutdown_requested() {
        if let Some(delivery) = transport.fetch_fully_funded(Duration::from_millis(500)).await {
            let loan = &delivery.message.loan;
            tracing::info!(
                loan_id = %loan.id,
                principal = %loan.principal_amount,
                funded_at = %delivery.message.funded_at,
                "Fully-funded event"
            );
            transport.ack_fully_funded(&delivery);
        }
    }
}

async fn shutdown_requested() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = loan_settlement::logging::init_logging(&config);

    tracing::info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        revision = env!("BUILD_REVISION"),
        "Starting loan settlement service"
    );

    let store = open_store(&config).await?;
    let notifier = build_notifier(&config)?;
    let app = App::build(&config, store, notifier).context("Failed to assemble services")?;
    app.seed_profiles(&config.seed_profiles).await?;

    tracing::info!(
        storage = app.store.name(),
        workers = config.settlement.workers,
        partitions = app.transport.intent_partitions(),
        pending_intents = app.transport.pending_intents(),
        "Services ready"
    );

    let workers = app.start_settlement();
    let audit = tokio::spawn(audit_fully_funded(
        app.transport.clone(),
        app.shutdown.clone(),
    ));

    let port = get_port_override().unwrap_or(config.gateway.port);
    let state = app.gateway_state(&config.gateway.jwt_secret);
    let served = gateway::run_server(state, &config.gateway.host, port, shutdown_requested()).await;

    // HTTP is closed; let in-flight settlement cycles finish
    workers.stop().await;
    if let Err(e) = audit.await {
        tracing::error!(error = %e, "Audit task failed");
    }

    served.context("Gateway server failed")?;
    tracing::info!("Shutdown complete");
    Ok(())
}
