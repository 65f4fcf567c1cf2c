pub mod gaps;
pub mod health;
pub mod webhooks;
