//! Alert Rule Store
//!
//! ルール集合の読み込み・保存。読み込みに失敗した場合は組み込みのデフォルトルールで起動し、
//! 直ちにそれを書き戻す。

use super::alert::AlertSeverity;
use super::channel::AlertChannel;
use super::condition::{AlertCondition, Comparison};
use super::rule::{AlertRule, RuleCategory};
use crate::error::Result;
use crate::monitoring::metrics::names;
use crate::monitoring::persist;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 永続化されるルール文書
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulesDocument {
    rules: Vec<AlertRule>,
    last_updated: DateTime<Utc>,
}

/// ルールへのハンドル
///
/// `id` と `category` は不変。`last_triggered` の更新はルールごとのロック下で行う。
#[derive(Debug, Clone)]
pub struct RuleHandle {
    pub id: String,
    pub category: RuleCategory,
    pub rule: Arc<Mutex<AlertRule>>,
}

/// ルールストア
pub struct RuleStore {
    path: PathBuf,
    rules: Vec<RuleHandle>,
    /// 評価対象外のルールと元の位置。保存時にそのまま書き戻す
    skipped: Vec<(usize, AlertRule)>,
}

impl RuleStore {
    /// ルールファイルを開く。欠落・破損時はデフォルトルールで初期化して保存する
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let rules = match Self::read_rules(&path).await {
            Ok(rules) => {
                tracing::info!(path = %path.display(), count = rules.len(), "Loaded alert rules");
                rules
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Alert rules unavailable, bootstrapping defaults"
                );
                let defaults = default_rules();
                if let Err(e) = Self::write_rules(&path, &defaults).await {
                    tracing::error!(path = %path.display(), error = %e, "Failed to persist default rules");
                }
                defaults
            }
        };

        Self::from_rules(path, rules)
    }

    /// メモリ上のルールからストアを作成
    pub fn from_rules(path: impl Into<PathBuf>, rules: Vec<AlertRule>) -> Self {
        let mut seen = HashSet::new();
        let mut handles = Vec::with_capacity(rules.len());
        let mut skipped = Vec::new();

        for (position, rule) in rules.into_iter().enumerate() {
            if !seen.insert(rule.id.clone()) {
                tracing::warn!(rule_id = %rule.id, "Duplicate rule id, skipping");
                skipped.push((position, rule));
                continue;
            }
            if let Some(e) = rule.channels.iter().find_map(|c| c.validate().err()) {
                tracing::warn!(rule_id = %rule.id, error = %e, "Invalid channel configuration, skipping rule");
                skipped.push((position, rule));
                continue;
            }
            handles.push(RuleHandle {
                id: rule.id.clone(),
                category: rule.category,
                rule: Arc::new(Mutex::new(rule)),
            });
        }

        Self {
            path: path.into(),
            rules: handles,
            skipped,
        }
    }

    /// ルールファイルを読み込む
    pub async fn read_rules(path: &Path) -> Result<Vec<AlertRule>> {
        let document: RulesDocument = persist::read_json(path).await?;
        Ok(document.rules)
    }

    /// ルールファイルを書き込む
    pub async fn write_rules(path: &Path, rules: &[AlertRule]) -> Result<()> {
        let document = RulesDocument {
            rules: rules.to_vec(),
            last_updated: Utc::now(),
        };
        persist::write_json(path, &document).await
    }

    /// 現在のルール集合を保存。スキップしたルールも元の位置で書き戻す
    pub async fn save(&self) -> Result<()> {
        let mut rules = self.snapshot().await;
        for (position, rule) in &self.skipped {
            rules.insert((*position).min(rules.len()), rule.clone());
        }
        Self::write_rules(&self.path, &rules).await
    }

    /// 全ルールのコピー
    pub async fn snapshot(&self) -> Vec<AlertRule> {
        let mut rules = Vec::with_capacity(self.rules.len());
        for handle in &self.rules {
            rules.push(handle.rule.lock().await.clone());
        }
        rules
    }

    /// カテゴリ別のルール
    pub fn rules_by_category(&self, category: RuleCategory) -> Vec<RuleHandle> {
        self.rules
            .iter()
            .filter(|h| h.category == category)
            .cloned()
            .collect()
    }

    /// 評価対象外になったルール
    pub fn skipped(&self) -> impl Iterator<Item = &AlertRule> {
        self.skipped.iter().map(|(_, rule)| rule)
    }

    pub fn handles(&self) -> &[RuleHandle] {
        &self.rules
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// 組み込みのデフォルトルール
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "critical-health-down",
            "Testnet is down",
            RuleCategory::Health,
            AlertCondition::threshold(names::STATUS, Comparison::Eq, "down"),
            AlertSeverity::Critical,
        )
        .with_channels(vec![
            AlertChannel::console(),
            AlertChannel::file("critical-alerts.log"),
        ])
        .with_cooldown(Duration::minutes(5)),
        AlertRule::new(
            "degraded-health",
            "Testnet is degraded",
            RuleCategory::Health,
            AlertCondition::threshold(names::STATUS, Comparison::Eq, "degraded"),
            AlertSeverity::Medium,
        )
        .with_channels(vec![AlertChannel::console()])
        .with_cooldown(Duration::minutes(15)),
        AlertRule::new(
            "high-response-time",
            "High response time",
            RuleCategory::Performance,
            AlertCondition::threshold(names::RESPONSE_TIME, Comparison::Gt, 5000.0),
            AlertSeverity::High,
        )
        .with_channels(vec![
            AlertChannel::console(),
            AlertChannel::file("performance-alerts.log"),
        ])
        .with_cooldown(Duration::minutes(10)),
        AlertRule::new(
            "high-memory",
            "High memory usage",
            RuleCategory::Performance,
            AlertCondition::threshold(names::MEMORY_USAGE, Comparison::Gt, 90.0),
            AlertSeverity::Medium,
        )
        .with_channels(vec![AlertChannel::console()])
        .with_cooldown(Duration::minutes(15)),
        AlertRule::new(
            "deployment-failed",
            "Deployment failed",
            RuleCategory::Deployment,
            AlertCondition::threshold(names::DEPLOYMENT_STATUS, Comparison::Eq, "failed"),
            AlertSeverity::High,
        )
        .with_channels(vec![
            AlertChannel::console(),
            AlertChannel::file("deployment-alerts.log"),
        ])
        .with_cooldown(Duration::minutes(30)),
        AlertRule::new(
            "security-audit-fail",
            "Security audit failed",
            RuleCategory::Security,
            AlertCondition::threshold(names::SECURITY_AUDIT_STATUS, Comparison::Eq, "fail"),
            AlertSeverity::Critical,
        )
        .with_channels(vec![
            AlertChannel::console(),
            AlertChannel::file("critical-alerts.log"),
        ])
        .with_cooldown(Duration::minutes(60)),
    ]
}
