//! Inbound adapters translate external stimuli (CLI/HTTP) into `RunService` calls.

pub mod cli;
pub mod server;
