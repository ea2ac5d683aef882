//! Alerts Module
//!
//! ルール駆動のアラートシステム

mod alert;
mod channel;
mod condition;
mod manager;
mod rule;
mod store;

pub use alert::{Alert, AlertSeverity};
pub use channel::{
    daily_log_path, deliver_all, AlertChannel, AlertSink, ChannelDispatcher, ChannelKind,
    ConsoleSink, DispatchReport, FileSink,
};
pub use condition::{
    read_log_tail, AlertCondition, Comparison, CompiledPattern, PatternMatch,
    LOG_TAIL_LINES,
};
pub use manager::{read_daily_logs, AlertManager, AlertStats, FiredAlert};
pub use rule::{AlertRule, RuleCategory};
pub use store::{default_rules, RuleHandle, RuleStore};
