use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Raw operations and blocks
/// - Account, post and comment projections
/// - Per-account operation history
/// - Stream checkpoints
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    #[serde(default = "default_postgres_host")]
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    #[serde(default = "default_postgres_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_postgres_database")]
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_user() -> String {
    "postgres".to_string()
}

fn default_postgres_database() -> String {
    "steemdata".to_string()
}

fn default_pool_size() -> usize {
    16
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: default_postgres_host(),
            port: default_postgres_port(),
            user: default_postgres_user(),
            password: String::new(),
            database: default_postgres_database(),
            pool_size: default_pool_size(),
        }
    }
}

/// Steem JSON-RPC node configuration.
///
/// Nodes are tried in order; a transient failure rotates to the next one.
#[derive(Debug, Deserialize, Clone)]
pub struct LedgerSettings {
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Attempts per RPC call before a transient error is surfaced
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// How long to wait for a new irreversible block when at the head
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_nodes() -> Vec<String> {
    vec!["https://api.steemit.com".to_string()]
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Raw block ingestion settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    /// Gap (in blocks) above which blocks are fetched in batches instead of streamed
    #[serde(default = "default_catchup_threshold")]
    pub catchup_threshold: u64,
    #[serde(default = "default_catchup_batch_size")]
    pub catchup_batch_size: usize,
    /// Log a checkpoint line every N blocks
    #[serde(default = "default_progress_log_every")]
    pub progress_log_every: u64,
    /// How many blocks below a broken link are reconciled before retrying
    #[serde(default = "default_heal_depth")]
    pub heal_depth: u64,
}

fn default_catchup_threshold() -> u64 {
    100
}

fn default_catchup_batch_size() -> usize {
    100
}

fn default_progress_log_every() -> u64 {
    10
}

fn default_heal_depth() -> u64 {
    20
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            catchup_threshold: default_catchup_threshold(),
            catchup_batch_size: default_catchup_batch_size(),
            progress_log_every: default_progress_log_every(),
            heal_depth: default_heal_depth(),
        }
    }
}

/// How refresh work produced by the dispatcher is delivered.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Run refreshers in the ingesting process
    #[default]
    Inline,
    /// Publish refresh tasks to the task queue
    Queue,
}

/// Entity refresh settings.
#[derive(Debug, Deserialize, Clone)]
pub struct RefreshSettings {
    /// Maximum refreshers in flight per batch
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// A full account refresh is skipped if the last one is younger than this
    #[serde(default = "default_full_refresh_min_age_secs")]
    pub full_refresh_min_age_secs: u64,
    #[serde(default = "default_history_batch_size")]
    pub history_batch_size: u32,
    /// Upper bound on ancestors walked for a single comment
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,
    /// Accounts are only refreshed from blocks younger than this
    #[serde(default = "default_recent_account_days")]
    pub recent_account_days: u64,
    #[serde(default = "default_missing_post_ttl_secs")]
    pub missing_post_ttl_secs: u64,
    #[serde(default)]
    pub delivery: DeliveryMode,
}

fn default_max_workers() -> usize {
    50
}

fn default_full_refresh_min_age_secs() -> u64 {
    3_600
}

fn default_history_batch_size() -> u32 {
    200
}

fn default_max_chain_depth() -> usize {
    256
}

fn default_recent_account_days() -> u64 {
    10
}

fn default_missing_post_ttl_secs() -> u64 {
    600
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            full_refresh_min_age_secs: default_full_refresh_min_age_secs(),
            history_batch_size: default_history_batch_size(),
            max_chain_depth: default_max_chain_depth(),
            recent_account_days: default_recent_account_days(),
            missing_post_ttl_secs: default_missing_post_ttl_secs(),
            delivery: DeliveryMode::default(),
        }
    }
}

/// Window of the `scrape_comments` worker.
#[derive(Debug, Deserialize, Clone)]
pub struct CommentsSettings {
    /// Blocks read per pass
    #[serde(default = "default_comments_batch_size")]
    pub batch_size: u64,
}

fn default_comments_batch_size() -> u64 {
    250
}

impl Default for CommentsSettings {
    fn default() -> Self {
        Self {
            batch_size: default_comments_batch_size(),
        }
    }
}

/// Window of the `post_processing` worker.
#[derive(Debug, Deserialize, Clone)]
pub struct PostProcessingSettings {
    /// Blocks read per pass
    #[serde(default = "default_post_processing_batch_size")]
    pub batch_size: u64,
}

fn default_post_processing_batch_size() -> u64 {
    100
}

impl Default for PostProcessingSettings {
    fn default() -> Self {
        Self {
            batch_size: default_post_processing_batch_size(),
        }
    }
}

/// Supervisor restart policy.
#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorSettings {
    /// Sleep after a worker failure before restarting it
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    /// Sleep after a worker pass that returned normally
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_idle_ms() -> u64 {
    500
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff_secs(),
            idle_ms: default_idle_ms(),
        }
    }
}

/// Periodic operation audit.
#[derive(Debug, Deserialize, Clone)]
pub struct AuditSettings {
    #[serde(default = "default_audit_interval_secs")]
    pub interval_secs: u64,
    /// Number of blocks below the operations checkpoint validated per run
    #[serde(default = "default_audit_window_blocks")]
    pub window_blocks: u64,
}

fn default_audit_interval_secs() -> u64 {
    3_600
}

fn default_audit_window_blocks() -> u64 {
    1_200
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_audit_interval_secs(),
            window_blocks: default_audit_window_blocks(),
        }
    }
}

/// Redpanda (Kafka-compatible) task queue configuration.
///
/// When enabled and `refresh.delivery` is `queue`, refresh tasks are
/// published here and executed by the `process_refresh_tasks` worker.
#[derive(Debug, Deserialize, Clone)]
pub struct RedpandaSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[serde(default = "default_redpanda_brokers")]
    pub brokers: String,
    #[serde(default = "default_redpanda_topic")]
    pub topic: String,
    #[serde(default = "default_redpanda_group_id")]
    pub group_id: String,
}

fn default_redpanda_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_redpanda_topic() -> String {
    "steemsync.refresh".to_string()
}

fn default_redpanda_group_id() -> String {
    "steemsync-refreshers".to_string()
}

/// Root application configuration.
///
/// Loaded from an optional `config.yaml` (or `.toml`/`.json`) in the working
/// directory, overridden by `STEEMSYNC__SECTION__KEY` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub comments: CommentsSettings,
    #[serde(default)]
    pub post_processing: PostProcessingSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub redpanda: Option<RedpandaSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            postgres: PostgresSettings::default(),
            ledger: LedgerSettings::default(),
            ingest: IngestSettings::default(),
            refresh: RefreshSettings::default(),
            comments: CommentsSettings::default(),
            post_processing: PostProcessingSettings::default(),
            supervisor: SupervisorSettings::default(),
            audit: AuditSettings::default(),
            redpanda: None,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("STEEMSYNC")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ledger.nodes")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Rejects settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.nodes.is_empty() {
            return Err(ConfigError::Message(
                "ledger.nodes must list at least one node".to_string(),
            ));
        }
        for node in &self.ledger.nodes {
            Url::parse(node)
                .map_err(|e| ConfigError::Message(format!("invalid ledger node {node}: {e}")))?;
        }
        if self.refresh.max_workers == 0 {
            return Err(ConfigError::Message(
                "refresh.max_workers must be greater than zero".to_string(),
            ));
        }
        if self.refresh.delivery == DeliveryMode::Queue
            && !self.redpanda.as_ref().is_some_and(|r| r.enabled)
        {
            return Err(ConfigError::Message(
                "refresh.delivery = queue requires an enabled redpanda section".to_string(),
            ));
        }
        Ok(())
    }
}
