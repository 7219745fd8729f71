//! Application layer: run orchestration and the use cases built on top of it.

pub mod cancellation;
pub mod comparison;
pub mod conversation;
pub mod event_bus;
pub mod orchestrator;
pub mod qa;
pub mod service;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_support;

pub use orchestrator::{RunHandle, RunOrchestrator};
pub use service::AppService;
pub use webhooks::WebhookDispatcher;
