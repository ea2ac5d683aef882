//! Alert Types

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// アラート深刻度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// レベル名を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// アラート
///
/// 作成後は `resolved` / `resolved_at` 以外は変更されない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// アラートID
    pub id: String,
    /// 発火元ルールID
    pub rule_id: String,
    /// タイトル
    pub title: String,
    /// メッセージ
    pub message: String,
    /// 深刻度（発火時点のルールからコピー）
    pub severity: AlertSeverity,
    /// タイムスタンプ
    pub timestamp: DateTime<Utc>,
    /// 構造化メタデータ
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// 解決済みフラグ
    #[serde(default)]
    pub resolved: bool,
    /// 解決時刻
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// 新しいアラートを作成
    pub fn new(
        rule_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: AlertSeverity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.into(),
            title: title.into(),
            message: message.into(),
            severity,
            timestamp,
            metadata: BTreeMap::new(),
            resolved: false,
            resolved_at: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// アラートを解決（一度だけ）
    pub fn resolve(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.resolved {
            return Err(Error::AlertAlreadyResolved(self.id.clone()));
        }
        self.resolved = true;
        self.resolved_at = Some(at);
        Ok(())
    }
}
