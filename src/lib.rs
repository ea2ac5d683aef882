//! # chain-monitor
//!
//! Continuous health monitoring and alerting for a blockchain testnet.
//!
//! A fixed battery of probe operations is sampled on every tick, the results
//! are evaluated against persisted alert rules with per-rule cooldowns, fired
//! alerts are fanned out to delivery channels, and a time-bounded history
//! feeds periodic trend reports.

pub mod config;
pub mod error;
pub mod logging;
pub mod monitoring;

pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use monitoring::MonitoringLoop;
