pub mod gateway;
pub mod http;
pub mod intent;
pub mod notifier;
pub mod observability;
pub mod reply_bus;
pub mod scheduling;

pub use gateway::RestOutreachGateway;
pub use http::{HttpClient, Upstream};
pub use intent::{KeywordIntentClassifier, RestIntentClassifier};
pub use notifier::{LogEscalationNotifier, WebhookEscalationNotifier};
pub use observability::init_metrics;
pub use reply_bus::InboundReplyBus;
pub use scheduling::RestSchedulingSystem;
