#![forbid(unsafe_code)]

//! Crash-safe, multi-process store for agent sessions and queued operator
//! messages, driven by agent lifecycle hooks.

pub mod config;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod lock;
pub mod models;
pub mod persistence;
pub mod quality_loop;

pub use config::DashboardConfig;
pub use errors::{AppError, Result};
