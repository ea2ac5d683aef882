//! Alert Manager Implementation

use super::alert::{Alert, AlertSeverity};
use super::channel::{AlertChannel, ChannelDispatcher, DispatchReport};
use super::condition::{AlertCondition, CompiledPattern};
use super::rule::{AlertRule, RuleCategory};
use super::store::{RuleHandle, RuleStore};
use crate::error::{Error, Result};
use crate::monitoring::metrics::MetricSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;

/// 発火したアラートと配信先
#[derive(Debug, Clone)]
pub struct FiredAlert {
    pub alert: Alert,
    pub channels: Vec<AlertChannel>,
}

/// アラートマネージャー
pub struct AlertManager {
    /// ルールストア
    store: RuleStore,
    /// 配信ディスパッチャー
    dispatcher: ChannelDispatcher,
    /// ルールIDごとのコンパイル済みパターン
    patterns: HashMap<String, CompiledPattern>,
    /// アラートログ（作成順）
    alerts: RwLock<Vec<Alert>>,
}

impl AlertManager {
    /// 新しいアラートマネージャーを作成
    ///
    /// パターン条件はここで一度だけコンパイルする。不正なパターンのルールは評価時にスキップされる。
    pub async fn new(store: RuleStore, dispatcher: ChannelDispatcher) -> Self {
        let mut patterns = HashMap::new();
        for handle in store.handles() {
            let rule = handle.rule.lock().await;
            if let AlertCondition::Pattern { pattern } = &rule.condition {
                match CompiledPattern::compile(pattern) {
                    Ok(compiled) => {
                        patterns.insert(rule.id.clone(), compiled);
                    }
                    Err(e) => {
                        tracing::warn!(rule_id = %rule.id, error = %e, "Invalid log pattern");
                    }
                }
            }
        }

        Self {
            store,
            dispatcher,
            patterns,
            alerts: RwLock::new(Vec::new()),
        }
    }

    pub fn rule_store(&self) -> &RuleStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &ChannelDispatcher {
        &self.dispatcher
    }

    /// 全カテゴリのルールを並行評価し、発火したアラートを返す
    pub async fn evaluate(
        &self,
        snapshot: &MetricSnapshot,
        log_tail: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Vec<FiredAlert> {
        let evaluations = RuleCategory::ALL
            .iter()
            .map(|category| self.evaluate_category(*category, snapshot, log_tail, now));

        let fired: Vec<FiredAlert> = futures::future::join_all(evaluations)
            .await
            .into_iter()
            .flatten()
            .collect();

        if !fired.is_empty() {
            let mut alerts = self.alerts.write().await;
            alerts.extend(fired.iter().map(|f| f.alert.clone()));
        }

        fired
    }

    /// 1カテゴリ分の評価
    async fn evaluate_category(
        &self,
        category: RuleCategory,
        snapshot: &MetricSnapshot,
        log_tail: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Vec<FiredAlert> {
        let mut fired = Vec::new();

        for handle in self.store.rules_by_category(category) {
            if let Some(alert) = self.try_fire(&handle, snapshot, log_tail, now).await {
                fired.push(alert);
            }
        }

        fired
    }

    /// 発火判定と `last_triggered` の更新を同一ロック下で行う
    async fn try_fire(
        &self,
        handle: &RuleHandle,
        snapshot: &MetricSnapshot,
        log_tail: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Option<FiredAlert> {
        let mut rule = handle.rule.lock().await;

        if !rule.may_fire(now) {
            return None;
        }
        if !rule.condition_matches_category() {
            tracing::warn!(
                rule_id = %rule.id,
                category = %rule.category,
                "Condition type does not match rule category, skipping"
            );
            return None;
        }

        let alert = self.check_condition(&rule, snapshot, log_tail, now)?;
        rule.mark_fired(now);

        tracing::info!(
            rule_id = %rule.id,
            alert_id = %alert.id,
            severity = alert.severity.as_str(),
            "Alert fired"
        );

        Some(FiredAlert {
            alert,
            channels: rule.channels.clone(),
        })
    }

    fn check_condition(
        &self,
        rule: &AlertRule,
        snapshot: &MetricSnapshot,
        log_tail: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        match &rule.condition {
            AlertCondition::Threshold {
                metric,
                operator,
                value,
            } => {
                let observed = match snapshot.get(metric) {
                    Some(observed) => observed,
                    None => {
                        tracing::trace!(rule_id = %rule.id, metric = %metric, "Metric not sampled");
                        return None;
                    }
                };
                if !operator.evaluate(observed, value) {
                    return None;
                }

                let message = format!(
                    "{} {} {} (observed: {})",
                    metric,
                    operator.as_str(),
                    value,
                    observed
                );
                Some(
                    Alert::new(&rule.id, &rule.name, message, rule.severity, now)
                        .with_metadata("category", rule.category.as_str().into())
                        .with_metadata("metric", metric.as_str().into())
                        .with_metadata("observed", serde_json::json!(observed))
                        .with_metadata("threshold", serde_json::json!(value)),
                )
            }
            AlertCondition::Pattern { pattern } => {
                let lines = log_tail?;
                let compiled = self.patterns.get(&rule.id)?;
                let found = compiled.scan(lines)?;

                let message = format!(
                    "{} log line(s) matched pattern '{}'",
                    found.match_count, pattern
                );
                Some(
                    Alert::new(&rule.id, &rule.name, message, rule.severity, now)
                        .with_metadata("category", rule.category.as_str().into())
                        .with_metadata("matchCount", serde_json::json!(found.match_count))
                        .with_metadata("matchedLines", serde_json::json!(found.recent_lines)),
                )
            }
        }
    }

    /// 発火したアラートを配信し、日別ログへ記録
    pub async fn dispatch(&self, fired: &[FiredAlert]) -> Vec<DispatchReport> {
        let mut reports = Vec::with_capacity(fired.len());

        for item in fired {
            let report = self.dispatcher.dispatch(&item.alert, &item.channels).await;
            if let Err(e) = self.dispatcher.append_daily_log(&item.alert).await {
                tracing::error!(alert_id = %item.alert.id, error = %e, "Failed to append alert log");
            }
            reports.push(report);
        }

        reports
    }

    /// アラートを解決（一度だけ）
    pub async fn resolve(&self, alert_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;
        alert.resolve(at)
    }

    /// 直近のアラート（新しい順）
    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let alerts = self.alerts.read().await;
        alerts.iter().rev().take(limit).cloned().collect()
    }

    /// 未解決のアラート
    pub async fn active_alerts(&self) -> Vec<Alert> {
        let alerts = self.alerts.read().await;
        alerts.iter().filter(|a| !a.resolved).cloned().collect()
    }

    /// 統計情報を取得
    pub async fn statistics(&self) -> AlertStats {
        let alerts = self.alerts.read().await;
        AlertStats::from_alerts(&alerts)
    }

    /// ルールの最終発火時刻を保存
    pub async fn save_rules(&self) -> Result<()> {
        self.store.save().await
    }
}

/// アラート統計
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total_count: usize,
    pub active_count: usize,
    pub resolved_count: usize,
    pub by_severity: BTreeMap<AlertSeverity, usize>,
}

impl AlertStats {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let mut stats = AlertStats {
            total_count: alerts.len(),
            ..Default::default()
        };
        for alert in alerts {
            if alert.resolved {
                stats.resolved_count += 1;
            } else {
                stats.active_count += 1;
            }
            *stats.by_severity.entry(alert.severity).or_insert(0) += 1;
        }
        stats
    }
}

/// 日別アラートログ（alerts-YYYY-MM-DD.log）を読み込む
pub async fn read_daily_logs(alerts_dir: &Path, since: DateTime<Utc>) -> Result<Vec<Alert>> {
    let mut alerts = Vec::new();
    if !alerts_dir.exists() {
        return Ok(alerts);
    }

    let mut entries = tokio::fs::read_dir(alerts_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.starts_with("alerts-") && name.ends_with(".log")) {
            continue;
        }
        let content = tokio::fs::read_to_string(entry.path()).await?;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Alert>(line) {
                Ok(alert) if alert.timestamp >= since => alerts.push(alert),
                Ok(_) => {}
                Err(e) => tracing::warn!(file = %name, error = %e, "Skipping malformed alert line"),
            }
        }
    }

    alerts.sort_by_key(|a| a.timestamp);
    Ok(alerts)
}
