//! Monitoring Loop
//!
//! 固定間隔でティックを回す協調スケジューラー。1ティックの順序は
//! サンプリング → ルール評価 → 配信 → 履歴追記 → 永続化 → （N ティックごと）剪定・レポート。
//! ティック内のエラーはログに記録するだけで、ループの状態は変えない。

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::monitoring::alerts::{read_log_tail, AlertManager, ChannelDispatcher, RuleStore};
use crate::monitoring::history::HistoryStore;
use crate::monitoring::metrics::{host_memory_usage, names, MetricSnapshot, MetricValue};
use crate::monitoring::persist;
use crate::monitoring::probe::{HealthCheckRecord, ProbeSampler};
use crate::monitoring::report::{MonitoringReport, ReportPeriod, StatusSnapshot};
use crate::monitoring::trend::TrendAnalyzer;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// レポートに含める直近アラート数
const REPORT_RECENT_ALERTS: usize = 20;

/// ループ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// 1ティックの結果
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub tick: u64,
    pub record: HealthCheckRecord,
    pub fired_alerts: usize,
    pub pruned: usize,
    pub report_path: Option<PathBuf>,
}

/// 監視ループ
pub struct MonitoringLoop {
    config: MonitorConfig,
    sampler: ProbeSampler,
    alerts: AlertManager,
    history: HistoryStore,
    analyzer: TrendAnalyzer,
    /// 外部コラボレーターから注入されたメトリクス
    signals: BTreeMap<String, MetricValue>,
    host_metrics: bool,
    state: LoopState,
    tick_count: u64,
    started_at: Option<DateTime<Utc>>,
}

impl MonitoringLoop {
    pub fn new(
        config: MonitorConfig,
        sampler: ProbeSampler,
        alerts: AlertManager,
        history: HistoryStore,
    ) -> Self {
        let analyzer = TrendAnalyzer::new(config.trend.clone());
        Self {
            config,
            sampler,
            alerts,
            history,
            analyzer,
            signals: BTreeMap::new(),
            host_metrics: true,
            state: LoopState::Idle,
            tick_count: 0,
            started_at: None,
        }
    }

    /// 設定から各コンポーネントを組み立てる
    pub async fn from_config(config: MonitorConfig) -> Result<Self> {
        config.validate()?;

        let store = RuleStore::open(&config.paths.rules_file).await;
        let dispatcher = ChannelDispatcher::new(&config.paths.alerts_dir);
        let alerts = AlertManager::new(store, dispatcher).await;
        let history =
            HistoryStore::load(&config.paths.history_file, config.retention(), Utc::now()).await;
        let sampler = ProbeSampler::from_specs(&config.probes.battery, config.probe_timeout());

        tracing::info!(
            probes = sampler.probe_count(),
            rules = alerts.rule_store().len(),
            history = history.len(),
            interval_secs = config.schedule.interval_secs,
            "Monitoring loop configured"
        );

        Ok(Self::new(config, sampler, alerts, history))
    }

    /// ホストメモリ使用率の収集を切り替える
    pub fn with_host_metrics(mut self, enabled: bool) -> Self {
        self.host_metrics = enabled;
        self
    }

    /// 外部シグナル（deployment_status 等）を設定
    pub fn set_signal(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.signals.insert(name.into(), value.into());
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn alert_manager(&self) -> &AlertManager {
        &self.alerts
    }

    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.tick_at(Utc::now()).await
    }

    /// 時刻 `now` で1ティック実行する
    ///
    /// `Stopped` 状態からは実行できない。`Idle` なら `Running` に遷移する。
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        match self.state {
            LoopState::Stopped => {
                return Err(Error::InvalidState("monitoring loop is stopped".into()))
            }
            LoopState::Idle => self.start(now),
            LoopState::Running => {}
        }

        let record = self.sampler.sample_at(now).await;
        let snapshot = self.build_snapshot(&record).await;
        let log_tail = self.read_log_tail().await;

        let fired = self.alerts.evaluate(&snapshot, log_tail.as_deref(), now).await;
        self.alerts.dispatch(&fired).await;

        self.history.append(record.clone());
        self.persist_tick(&record).await;
        self.tick_count += 1;

        let mut pruned = 0;
        if self.tick_count % self.config.schedule.prune_every_ticks == 0 {
            pruned = self.history.prune(self.config.retention(), now);
            if pruned > 0 {
                tracing::debug!(pruned, "Health history pruned");
            }
        }

        let mut report_path = None;
        if self.tick_count % self.config.schedule.report_every_ticks == 0 {
            match self.write_report(now).await {
                Ok(path) => report_path = Some(path),
                Err(e) => tracing::error!(error = %e, "Failed to write monitoring report"),
            }
        }

        tracing::info!(
            tick = self.tick_count,
            status = record.status.as_str(),
            latency_ms = record.latency_ms,
            error_rate = record.error_rate_pct,
            fired = fired.len(),
            "Tick completed"
        );

        Ok(TickOutcome {
            tick: self.tick_count,
            record,
            fired_alerts: fired.len(),
            pruned,
            report_path,
        })
    }

    /// キャンセルされるまでティックを回し、最後にスナップショットとレポートを書き出す
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        match self.state {
            LoopState::Stopped => {
                return Err(Error::InvalidState("monitoring loop is stopped".into()))
            }
            LoopState::Idle => self.start(Utc::now()),
            LoopState::Running => {}
        }

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stop requested, leaving monitoring loop");
                    break;
                }
                _ = interval.tick() => {}
            }

            // ティックは select の外で実行し、進行中のプローブを中断しない
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Tick failed");
            }
        }

        self.stop(Utc::now()).await;
        Ok(())
    }

    /// 最終スナップショットとレポートを書き出して `Stopped` に遷移
    pub async fn stop(&mut self, now: DateTime<Utc>) {
        if self.state == LoopState::Stopped {
            return;
        }

        if let Some(latest) = self.history.latest().cloned() {
            self.persist_tick(&latest).await;
            if let Err(e) = self.write_report(now).await {
                tracing::error!(error = %e, "Failed to write final report");
            }
        }

        self.state = LoopState::Stopped;
        tracing::info!(ticks = self.tick_count, "Monitoring loop stopped");
    }

    /// 現在の履歴とアラートログからレポートを組み立てる
    pub async fn report(&self, now: DateTime<Utc>) -> MonitoringReport {
        let history = self.history.all();
        let trends = self.analyzer.analyze(&history);
        let recent = self.alerts.recent_alerts(REPORT_RECENT_ALERTS).await;
        MonitoringReport::build(
            &history,
            recent,
            trends,
            ReportPeriod::covering(&history, now),
            now,
        )
    }

    async fn write_report(&self, now: DateTime<Utc>) -> Result<PathBuf> {
        self.report(now)
            .await
            .save(&self.config.paths.reports_dir)
            .await
    }

    fn start(&mut self, now: DateTime<Utc>) {
        self.state = LoopState::Running;
        self.started_at = Some(now);
        tracing::info!("Monitoring loop started");
    }

    async fn build_snapshot(&self, record: &HealthCheckRecord) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::new();
        snapshot.insert(names::STATUS, record.status.as_str());
        snapshot.insert(names::RESPONSE_TIME, record.latency_ms);
        snapshot.insert(names::ERROR_RATE, record.error_rate_pct);
        snapshot.insert(names::FAILED_PROBES, record.failed_probes() as u64);
        snapshot.insert(names::TOTAL_PROBES, record.operations.len() as u64);

        if self.host_metrics {
            if let Some(memory) = host_memory_usage() {
                snapshot.insert(names::MEMORY_USAGE, memory);
            }
        }

        snapshot.extend(self.read_signals_file().await);
        snapshot.extend(self.signals.clone());
        snapshot
    }

    async fn read_signals_file(&self) -> BTreeMap<String, MetricValue> {
        let Some(path) = &self.config.paths.signals_file else {
            return BTreeMap::new();
        };
        if !path.exists() {
            return BTreeMap::new();
        }

        match persist::read_json::<BTreeMap<String, MetricValue>>(path).await {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable signals file");
                BTreeMap::new()
            }
        }
    }

    async fn read_log_tail(&self) -> Option<Vec<String>> {
        let path = self.config.paths.log_file.as_ref()?;
        match read_log_tail(path).await {
            Ok(lines) => Some(lines),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Log tail unavailable");
                None
            }
        }
    }

    /// 履歴・現在状態・ルールを保存。失敗はログのみ
    async fn persist_tick(&self, latest: &HealthCheckRecord) {
        if let Err(e) = self.history.save().await {
            tracing::error!(error = %e, "Failed to save health history");
        }

        let started_at = self.started_at.unwrap_or(latest.timestamp);
        let snapshot = StatusSnapshot::new(latest, &self.history.all(), started_at);
        if let Err(e) = snapshot.save(&self.config.paths.status_file).await {
            tracing::error!(error = %e, "Failed to save status snapshot");
        }

        if let Err(e) = self.alerts.save_rules().await {
            tracing::error!(error = %e, "Failed to save alert rules");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::alerts::{AlertCondition, AlertRule, AlertSeverity, Comparison, RuleCategory};
    use crate::monitoring::probe::{HealthStatus, Probe};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::path::Path;
    use tempfile::tempdir;

    struct StaticProbe {
        name: String,
        ok: bool,
    }

    #[async_trait]
    impl Probe for StaticProbe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self) -> Result<()> {
            if self.ok {
                Ok(())
            } else {
                Err(Error::Probe {
                    probe: self.name.clone(),
                    message: "unreachable".into(),
                })
            }
        }
    }

    fn test_config(dir: &Path) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.paths.data_dir = dir.to_path_buf();
        config.paths.alerts_dir = dir.join("alerts");
        config.paths.reports_dir = dir.join("reports");
        config.paths.rules_file = dir.join("alert-rules.json");
        config.paths.history_file = dir.join("health-history.json");
        config.paths.status_file = dir.join("current-status.json");
        config.schedule.report_every_ticks = 3;
        config.schedule.prune_every_ticks = 1;
        config
    }

    async fn build(dir: &Path, outcomes: &[bool], rules: Vec<AlertRule>) -> MonitoringLoop {
        let config = test_config(dir);
        let probes = outcomes
            .iter()
            .enumerate()
            .map(|(i, ok)| -> Box<dyn Probe> {
                Box::new(StaticProbe {
                    name: format!("probe-{}", i),
                    ok: *ok,
                })
            })
            .collect();
        let sampler = ProbeSampler::new(probes, std::time::Duration::from_secs(1));
        let store = RuleStore::from_rules(&config.paths.rules_file, rules);
        let alerts = AlertManager::new(store, ChannelDispatcher::new(&config.paths.alerts_dir)).await;
        let history = HistoryStore::new(&config.paths.history_file);
        MonitoringLoop::new(config, sampler, alerts, history).with_host_metrics(false)
    }

    #[tokio::test]
    async fn test_tick_persists_history_and_status() {
        let dir = tempdir().unwrap();
        let mut monitor = build(dir.path(), &[true, true], vec![]).await;
        assert_eq!(monitor.state(), LoopState::Idle);

        let outcome = monitor.tick_at(Utc::now()).await.unwrap();
        assert_eq!(monitor.state(), LoopState::Running);
        assert_eq!(outcome.record.status, HealthStatus::Healthy);
        assert_eq!(monitor.history().len(), 1);
        assert!(dir.path().join("health-history.json").exists());
        assert!(dir.path().join("current-status.json").exists());
        assert!(dir.path().join("alert-rules.json").exists());
    }

    #[tokio::test]
    async fn test_report_every_n_ticks() {
        let dir = tempdir().unwrap();
        let mut monitor = build(dir.path(), &[true], vec![]).await;
        let start = Utc::now();

        let mut reports = Vec::new();
        for i in 0..3 {
            let outcome = monitor.tick_at(start + Duration::minutes(i)).await.unwrap();
            reports.push(outcome.report_path);
        }

        assert!(reports[0].is_none());
        assert!(reports[1].is_none());
        assert!(reports[2].as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn test_signal_drives_deployment_rule() {
        let dir = tempdir().unwrap();
        let rule = AlertRule::new(
            "deployment-failed",
            "Deployment failed",
            RuleCategory::Deployment,
            AlertCondition::threshold(names::DEPLOYMENT_STATUS, Comparison::Eq, "failed"),
            AlertSeverity::High,
        );
        let mut monitor = build(dir.path(), &[true], vec![rule]).await;

        let quiet = monitor.tick_at(Utc::now()).await.unwrap();
        assert_eq!(quiet.fired_alerts, 0);

        monitor.set_signal(names::DEPLOYMENT_STATUS, "FAILED");
        let fired = monitor.tick_at(Utc::now()).await.unwrap();
        assert_eq!(fired.fired_alerts, 1);
    }

    #[tokio::test]
    async fn test_signals_file_is_read_each_tick() {
        let dir = tempdir().unwrap();
        let rule = AlertRule::new(
            "security-audit-fail",
            "Security audit failed",
            RuleCategory::Security,
            AlertCondition::threshold(names::SECURITY_AUDIT_STATUS, Comparison::Eq, "fail"),
            AlertSeverity::Critical,
        );
        let mut monitor = build(dir.path(), &[true], vec![rule]).await;
        let signals = dir.path().join("signals.json");
        monitor.config.paths.signals_file = Some(signals.clone());

        assert_eq!(monitor.tick_at(Utc::now()).await.unwrap().fired_alerts, 0);

        std::fs::write(&signals, r#"{"security_audit_status": "fail"}"#).unwrap();
        assert_eq!(monitor.tick_at(Utc::now()).await.unwrap().fired_alerts, 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_stop_loop() {
        let dir = tempdir().unwrap();
        let mut monitor = build(dir.path(), &[false], vec![]).await;
        // 親がファイルなので書き込みは必ず失敗する
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        monitor.config.paths.status_file = blocker.join("status.json");

        monitor.tick_at(Utc::now()).await.unwrap();
        monitor.tick_at(Utc::now()).await.unwrap();
        assert_eq!(monitor.state(), LoopState::Running);
        assert_eq!(monitor.tick_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let dir = tempdir().unwrap();
        let mut monitor = build(dir.path(), &[true], vec![]).await;
        monitor.tick_at(Utc::now()).await.unwrap();

        monitor.stop(Utc::now()).await;
        assert_eq!(monitor.state(), LoopState::Stopped);
        assert!(std::fs::read_dir(dir.path().join("reports")).unwrap().count() >= 1);

        assert!(matches!(
            monitor.tick_at(Utc::now()).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            monitor.run(CancellationToken::new()).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_run_exits_on_cancel() {
        let dir = tempdir().unwrap();
        let mut monitor = build(dir.path(), &[true], vec![]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        monitor.run(cancel).await.unwrap();
        assert_eq!(monitor.state(), LoopState::Stopped);
    }
}
