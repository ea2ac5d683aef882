//! ヘルス監視・アラートエンジン
//!
//! プローブによるサンプリング、ルール駆動のアラート、履歴とトレンド分析、
//! それらを束ねる監視ループを提供します。

pub mod alerts;
pub mod history;
pub mod metrics;
pub mod persist;
pub mod probe;
pub mod report;
pub mod runner;
pub mod trend;

pub use alerts::{Alert, AlertManager, AlertRule, AlertSeverity, RuleCategory, RuleStore};
pub use history::HistoryStore;
pub use metrics::{MetricSnapshot, MetricValue};
pub use probe::{HealthCheckRecord, HealthStatus, Probe, ProbeSampler};
pub use report::{MonitoringReport, StatusSnapshot};
pub use runner::{LoopState, MonitoringLoop, TickOutcome};
pub use trend::{TrendAnalyzer, TrendConfig, TrendDirection, Trends};
