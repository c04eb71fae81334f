//! HTTP boundary
//!
//! Thin axum layer over the loan and investment services. Everything under
//! `/api/v1` requires a bearer token; `/health` is public.

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/loans",
            post(handlers::create_loan).get(handlers::list_loans),
        )
        .route("/loans/mine", get(handlers::my_loans))
        .route("/loans/{id}", get(handlers::get_loan))
        .route("/loans/{id}/approve", post(handlers::approve_loan))
        .route("/loans/{id}/disburse", post(handlers::disburse_loan))
        .route("/loans/{id}/investments", get(handlers::loan_investments))
        .route("/investments", post(handlers::submit_investment))
        .route("/investments/mine", get(handlers::my_investments))
        .layer(from_fn_with_state(state.clone(), auth::jwt_auth_middleware));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then finish in-flight requests
pub async fn run_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
