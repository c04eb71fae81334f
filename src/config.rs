use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    /// Borrower/investor profiles upserted at startup (profile management is external)
    #[serde(default)]
    pub seed_profiles: Vec<ProfileSeed>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Borrower,
    Investor,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProfileSeed {
    pub kind: ProfileKind,
    /// Profile identity (borrower or investor id)
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// HS256 secret shared with the token issuer
    pub jwt_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub max_connections: u32,
    /// Upper bound on waiting for a loan row lock
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            postgres_url: None,
            max_connections: 20,
            lock_timeout_ms: 2000,
        }
    }
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportConfig {
    /// Journal directory; `None` keeps events in memory only
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,
    pub partitions: usize,
    pub redelivery_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            journal_dir: None,
            partitions: 16,
            redelivery_backoff_ms: 200,
        }
    }
}

impl TransportConfig {
    pub fn redelivery_backoff(&self) -> Duration {
        Duration::from_millis(self.redelivery_backoff_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    pub workers: usize,
    /// How long an idle worker waits for new events before re-checking shutdown
    pub poll_interval_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationConfig {
    pub document_base_url: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            document_base_url: "https://documents.local/agreements".to_string(),
            webhook_url: None,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        if config.transport.partitions == 0 {
            anyhow::bail!("transport.partitions must be at least 1");
        }
        if config.settlement.workers == 0 {
            anyhow::bail!("settlement.workers must be at least 1");
        }
        if config.storage.backend == StorageBackend::Postgres
            && config.storage.postgres_url.is_none()
        {
            anyhow::bail!("storage.postgres_url is required for the postgres backend");
        }
        Ok(config)
    }
}
