//! Monitoring Reports
//!
//! 履歴とアラートログから導出されるレポートと、外部ポーリング用の現在状態スナップショット。

use crate::error::Result;
use crate::monitoring::alerts::Alert;
use crate::monitoring::persist;
use crate::monitoring::probe::{HealthCheckRecord, HealthStatus};
use crate::monitoring::trend::{uptime_pct, TrendDirection, Trends};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 稼働率の下限（%）
pub const MIN_UPTIME_PCT: f64 = 99.0;
/// 平均レイテンシの上限（ms）
pub const MAX_AVG_LATENCY_MS: f64 = 5000.0;
/// 平均エラー率の上限（%）
pub const MAX_AVG_ERROR_RATE_PCT: f64 = 5.0;

/// レポート対象期間
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportPeriod {
    /// 履歴の先頭・末尾から期間を決める。空なら `now` の一点
    pub fn covering(history: &[HealthCheckRecord], now: DateTime<Utc>) -> Self {
        Self {
            start: history.first().map(|r| r.timestamp).unwrap_or(now),
            end: history.last().map(|r| r.timestamp).unwrap_or(now),
        }
    }
}

/// 集計値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub uptime_pct: f64,
    pub avg_latency_ms: f64,
    pub avg_error_rate_pct: f64,
    pub total_checks: usize,
    pub failed_checks: usize,
}

impl ReportSummary {
    pub fn from_history(history: &[HealthCheckRecord]) -> Self {
        let total = history.len();
        let (avg_latency_ms, avg_error_rate_pct) = if total == 0 {
            (0.0, 0.0)
        } else {
            let latency: f64 = history.iter().map(|r| r.latency_ms as f64).sum();
            let errors: f64 = history.iter().map(|r| r.error_rate_pct).sum();
            (latency / total as f64, errors / total as f64)
        };

        Self {
            uptime_pct: uptime_pct(history),
            avg_latency_ms,
            avg_error_rate_pct,
            total_checks: total,
            failed_checks: history
                .iter()
                .filter(|r| r.status == HealthStatus::Down)
                .count(),
        }
    }
}

/// 監視レポート（導出値、保存は出力のみ）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringReport {
    pub generated_at: DateTime<Utc>,
    pub period: ReportPeriod,
    pub summary: ReportSummary,
    pub trends: Trends,
    pub recent_alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
}

impl MonitoringReport {
    pub fn build(
        history: &[HealthCheckRecord],
        recent_alerts: Vec<Alert>,
        trends: Trends,
        period: ReportPeriod,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let summary = ReportSummary::from_history(history);
        let recommendations = recommendations(&summary, &trends);

        Self {
            generated_at,
            period,
            summary,
            trends,
            recent_alerts,
            recommendations,
        }
    }

    /// `report-<timestamp>.json` として保存し、パスを返す
    pub async fn save(&self, reports_dir: &Path) -> Result<PathBuf> {
        let path = reports_dir.join(format!(
            "report-{}.json",
            self.generated_at.format("%Y%m%dT%H%M%SZ")
        ));
        persist::write_json(&path, self).await?;
        tracing::info!(path = %path.display(), "Monitoring report saved");
        Ok(path)
    }
}

fn recommendations(summary: &ReportSummary, trends: &Trends) -> Vec<String> {
    let mut out = Vec::new();

    if summary.total_checks > 0 && summary.uptime_pct < MIN_UPTIME_PCT {
        out.push(format!(
            "Uptime is {:.2}% (below {}%): investigate availability of the probed services",
            summary.uptime_pct, MIN_UPTIME_PCT
        ));
    }
    if summary.avg_latency_ms > MAX_AVG_LATENCY_MS {
        out.push(format!(
            "Average latency is {:.0}ms: investigate RPC endpoint latency",
            summary.avg_latency_ms
        ));
    }
    if summary.avg_error_rate_pct > MAX_AVG_ERROR_RATE_PCT {
        out.push(format!(
            "Average error rate is {:.1}%: investigate failing probe operations",
            summary.avg_error_rate_pct
        ));
    }

    let degrading = [
        ("Latency", trends.latency_trend),
        ("Error rate", trends.error_trend),
        ("Uptime", trends.uptime_trend),
    ];
    for (label, direction) in degrading {
        if direction == TrendDirection::Degrading {
            out.push(format!("{} trend is degrading", label));
        }
    }

    if out.is_empty() {
        out.push("All systems nominal".to_string());
    }
    out
}

/// 現在状態スナップショット（毎ティック上書き）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub uptime: f64,
    pub total_checks: usize,
    pub monitoring_duration_ms: i64,
}

impl StatusSnapshot {
    pub fn new(
        latest: &HealthCheckRecord,
        history: &[HealthCheckRecord],
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: latest.timestamp,
            status: latest.status,
            uptime: uptime_pct(history),
            total_checks: history.len(),
            monitoring_duration_ms: (latest.timestamp - started_at).num_milliseconds().max(0),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        persist::write_json(path, self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn history(error_rates: &[f64], latency_ms: u64) -> Vec<HealthCheckRecord> {
        let start = Utc::now();
        error_rates
            .iter()
            .enumerate()
            .map(|(i, rate)| {
                HealthCheckRecord::new(start + Duration::minutes(i as i64), latency_ms, *rate)
            })
            .collect()
    }

    #[test]
    fn test_summary_counts_down_records_as_failed() {
        let records = history(&[0.0, 25.0, 100.0, 0.0], 200);
        let summary = ReportSummary::from_history(&records);

        assert_eq!(summary.total_checks, 4);
        assert_eq!(summary.failed_checks, 1);
        assert_eq!(summary.uptime_pct, 75.0);
        assert_eq!(summary.avg_error_rate_pct, 31.25);
        assert_eq!(summary.avg_latency_ms, 200.0);
    }

    #[test]
    fn test_healthy_history_is_nominal() {
        let records = history(&[0.0; 20], 300);
        let period = ReportPeriod::covering(&records, Utc::now());
        let report = MonitoringReport::build(&records, vec![], Trends::stable(), period, Utc::now());

        assert_eq!(report.recommendations, vec!["All systems nominal".to_string()]);
        assert_eq!(report.period.start, records[0].timestamp);
    }

    #[test]
    fn test_recommendations_for_unhealthy_history() {
        let records = history(&[100.0, 0.0, 0.0, 0.0], 6000);
        let trends = Trends {
            latency_trend: TrendDirection::Degrading,
            ..Trends::stable()
        };
        let report = MonitoringReport::build(
            &records,
            vec![],
            trends,
            ReportPeriod::covering(&records, Utc::now()),
            Utc::now(),
        );

        let text = report.recommendations.join("\n");
        assert!(text.contains("availability"));
        assert!(text.contains("latency"));
        assert!(text.contains("failing probe"));
        assert!(text.contains("Latency trend is degrading"));
        assert!(!text.contains("nominal"));
    }

    #[tokio::test]
    async fn test_report_and_snapshot_are_written() {
        let dir = tempdir().unwrap();
        let records = history(&[0.0, 50.0], 100);
        let now = records[1].timestamp;

        let report = MonitoringReport::build(
            &records,
            vec![],
            Trends::stable(),
            ReportPeriod::covering(&records, now),
            now,
        );
        let path = report.save(dir.path()).await.unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("report-"));

        let snapshot = StatusSnapshot::new(&records[1], &records, records[0].timestamp);
        assert_eq!(snapshot.status, HealthStatus::Down);
        assert_eq!(snapshot.monitoring_duration_ms, 60_000);

        let status_path = dir.path().join("status.json");
        snapshot.save(&status_path).await.unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&status_path).unwrap()).unwrap();
        assert_eq!(json["totalChecks"], 2);
        assert_eq!(json["status"], "down");
        assert_eq!(json["monitoringDurationMs"], 60_000);
    }
}
