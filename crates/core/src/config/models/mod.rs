pub mod app_config;
pub mod dispatch;
pub mod integrations;
pub mod matching;
pub mod outreach;

pub use app_config::AppConfig;
pub use dispatch::{CommitConfig, DispatchConfig};
pub use integrations::{IntegrationsConfig, ObservabilityConfig, ServerConfig};
pub use matching::MatchingConfig;
pub use outreach::{BackoffConfig, MessageTemplates, OutreachConfig};
