//! Alert Rule Types

use super::alert::AlertSeverity;
use super::channel::AlertChannel;
use super::condition::AlertCondition;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ルールカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    Health,
    Performance,
    ErrorLog,
    Security,
    Deployment,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 5] = [
        RuleCategory::Health,
        RuleCategory::Performance,
        RuleCategory::ErrorLog,
        RuleCategory::Security,
        RuleCategory::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Health => "health",
            RuleCategory::Performance => "performance",
            RuleCategory::ErrorLog => "error-log",
            RuleCategory::Security => "security",
            RuleCategory::Deployment => "deployment",
        }
    }

    /// このカテゴリがログパターン条件を要求するか
    pub fn expects_pattern(&self) -> bool {
        matches!(self, RuleCategory::ErrorLog)
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// アラートルール
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    /// ルールID（再起動をまたいで不変）
    pub id: String,
    /// ルール名
    pub name: String,
    /// カテゴリ
    pub category: RuleCategory,
    /// 条件
    pub condition: AlertCondition,
    /// 深刻度
    pub severity: AlertSeverity,
    /// 有効フラグ
    pub enabled: bool,
    /// 配信チャネル（順序あり）
    #[serde(default)]
    pub channels: Vec<AlertChannel>,
    /// クールダウン（秒）。0 は常に再発火可能
    #[serde(default)]
    pub cooldown_secs: u64,
    /// 最終発火時刻。発火パスのみが更新する
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// 新しいアラートルールを作成
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: RuleCategory,
        condition: AlertCondition,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            condition,
            severity,
            enabled: true,
            channels: Vec::new(),
            cooldown_secs: 0,
            last_triggered: None,
        }
    }

    pub fn with_channels(mut self, channels: Vec<AlertChannel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = cooldown.num_seconds().max(0) as u64;
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }

    /// クールダウンを考慮して発火可能か判定
    ///
    /// `[last_triggered, last_triggered + cooldown)` の間は false。
    pub fn may_fire(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.cooldown_secs == 0 {
            return true;
        }
        match self.last_triggered {
            None => true,
            Some(last) => now - last >= self.cooldown(),
        }
    }

    /// 発火を記録
    pub(crate) fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_triggered = Some(now);
    }

    /// 条件の種類がカテゴリと整合しているか
    pub fn condition_matches_category(&self) -> bool {
        self.condition.is_pattern() == self.category.expects_pattern()
    }
}
