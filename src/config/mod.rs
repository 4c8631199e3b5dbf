mod config;

pub use config::{
    AuditSettings, CommentsSettings, DeliveryMode, IngestSettings, LedgerSettings,
    PostProcessingSettings, PostgresSettings, RedpandaSettings, RefreshSettings, Settings,
    SupervisorSettings,
};
