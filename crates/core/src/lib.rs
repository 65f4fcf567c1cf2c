pub mod config;
pub mod errors;
pub mod logging;

pub use config::{
    AppConfig, BackoffConfig, CommitConfig, DispatchConfig, IntegrationsConfig, MatchingConfig,
    MessageTemplates, ObservabilityConfig, OutreachConfig, ServerConfig,
};
pub use errors::{DispatchError, DispatchResult};
pub use logging::init_logging;
