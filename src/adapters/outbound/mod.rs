//! Outbound adapters implement the ports the application drives.

pub mod agent_flow;
pub mod clock;
pub mod http;
pub mod memory;
pub mod persistence;
pub mod simulated_user;
pub mod templating;
pub mod webhook_delivery;
