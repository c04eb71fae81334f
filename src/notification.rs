//! Outbound notification delivery
//!
//! Failures here are reported to the caller and never become settlement
//! failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::LoanId;

/// One agreement letter addressed to one investor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementNotice {
    pub recipient: String,
    pub display_name: String,
    pub document_ref: String,
    pub loan_id: LoanId,
}

#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Delivery failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notice: &AgreementNotice) -> Result<(), NotifyError>;
}

/// Writes the notice to the log; the default when no webhook is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notice: &AgreementNotice) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notice.recipient,
            loan_id = %notice.loan_id,
            document_ref = %notice.document_ref,
            "Agreement letter ready"
        );
        Ok(())
    }
}

/// POSTs each notice as JSON; any non-2xx status is a failure
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, notice: &AgreementNotice) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(format!("HTTP {}", status.as_u16())));
        }
        Ok(())
    }
}
