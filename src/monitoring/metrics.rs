//! メトリクス型定義

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// よく使うメトリクス名
pub mod names {
    pub const STATUS: &str = "status";
    pub const RESPONSE_TIME: &str = "response_time";
    pub const ERROR_RATE: &str = "error_rate";
    pub const FAILED_PROBES: &str = "failed_probes";
    pub const TOTAL_PROBES: &str = "total_probes";
    pub const MEMORY_USAGE: &str = "memory_usage";
    pub const DEPLOYMENT_STATUS: &str = "deployment_status";
    pub const SECURITY_AUDIT_STATUS: &str = "security_audit_status";
}

/// メトリクス値（数値またはテキスト）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{}", n),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

/// 1ティック分のメトリクス
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    values: BTreeMap<String, MetricValue>,
}

impl MetricSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values.get(name)
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = (String, MetricValue)>) {
        self.values.extend(other);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// ホストのメモリ使用率（%）
pub fn host_memory_usage() -> Option<f64> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return None;
    }
    Some(system.used_memory() as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_value_json() {
        let number: MetricValue = serde_json::from_str("42").unwrap();
        assert_eq!(number, MetricValue::Number(42.0));

        let text: MetricValue = serde_json::from_str(r#""failed""#).unwrap();
        assert_eq!(text, MetricValue::Text("failed".to_string()));
        assert_eq!(text.to_string(), "failed");
    }

    #[test]
    fn test_snapshot_insert_and_get() {
        let mut snapshot = MetricSnapshot::new();
        snapshot.insert(names::STATUS, "degraded");
        snapshot.insert(names::ERROR_RATE, 25.0);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get(names::ERROR_RATE),
            Some(&MetricValue::Number(25.0))
        );
        assert!(snapshot.get(names::MEMORY_USAGE).is_none());
    }
}
