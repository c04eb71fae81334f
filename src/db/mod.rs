//! Database connection management

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Tables used by [`crate::store::PgStore`]. Every statement is idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS borrowers_tb (
    borrower_id UUID PRIMARY KEY,
    user_id     UUID NOT NULL UNIQUE,
    full_name   TEXT NOT NULL,
    email       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS investors_tb (
    investor_id    UUID PRIMARY KEY,
    user_id        UUID NOT NULL UNIQUE,
    full_name      TEXT NOT NULL,
    email          TEXT NOT NULL,
    total_invested NUMERIC(30, 8) NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS loans_tb (
    loan_id              UUID PRIMARY KEY,
    borrower_id          UUID NOT NULL REFERENCES borrowers_tb (borrower_id),
    principal_amount     NUMERIC(30, 8) NOT NULL,
    invested_amount      NUMERIC(30, 8) NOT NULL DEFAULT 0,
    remaining_investment NUMERIC(30, 8) NOT NULL,
    rate                 NUMERIC(12, 8) NOT NULL,
    roi                  NUMERIC(12, 8) NOT NULL,
    total_interest       NUMERIC(30, 8) NOT NULL,
    state                SMALLINT NOT NULL,
    created_at           TIMESTAMPTZ NOT NULL,
    updated_at           TIMESTAMPTZ NOT NULL,
    CONSTRAINT loans_capacity_chk CHECK (
        remaining_investment >= 0
        AND invested_amount + remaining_investment = principal_amount
    )
);
CREATE INDEX IF NOT EXISTS loans_state_idx ON loans_tb (state);
CREATE INDEX IF NOT EXISTS loans_borrower_idx ON loans_tb (borrower_id);

CREATE TABLE IF NOT EXISTS investments_tb (
    investment_id UUID PRIMARY KEY,
    loan_id       UUID NOT NULL REFERENCES loans_tb (loan_id),
    investor_id   UUID NOT NULL REFERENCES investors_tb (investor_id),
    amount        NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
    status        TEXT NOT NULL,
    agreement_ref TEXT,
    created_at    TIMESTAMPTZ NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS investments_loan_idx ON investments_tb (loan_id);
CREATE INDEX IF NOT EXISTS investments_investor_idx ON investments_tb (investor_id);

CREATE TABLE IF NOT EXISTS approvals_tb (
    approval_id  UUID PRIMARY KEY,
    loan_id      UUID NOT NULL UNIQUE REFERENCES loans_tb (loan_id),
    validator_id UUID NOT NULL,
    proof_ref    TEXT NOT NULL,
    approved_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS disbursements_tb (
    disbursement_id UUID PRIMARY KEY,
    loan_id         UUID NOT NULL UNIQUE REFERENCES loans_tb (loan_id),
    officer_id      UUID NOT NULL,
    agreement_ref   TEXT NOT NULL,
    disbursed_at    TIMESTAMPTZ NOT NULL
);
"#;

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create missing tables and indexes
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Database schema ready");
        Ok(())
    }
}
