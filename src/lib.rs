//! Task relay — per-project task scheduler in front of an external agent CLI.

pub mod channels;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod rules;
pub mod scheduler;
pub mod workspace;
