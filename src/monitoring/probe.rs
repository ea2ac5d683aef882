//! Probe Sampler
//!
//! 外部オペレーション（到達性確認・書き込み・読み取り）を順に実行し、
//! レイテンシとエラー率からヘルス状態を導出する。

use crate::config::ProbeSpec;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

/// ヘルス状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    /// エラー率（%）から状態を導出
    pub fn from_error_rate(error_rate_pct: f64) -> Self {
        if error_rate_pct <= 0.0 {
            HealthStatus::Healthy
        } else if error_rate_pct < 50.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        }
    }
}

/// 1プローブの実行結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// ヘルスチェック記録（作成後は不変）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckRecord {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub error_rate_pct: f64,
    #[serde(default)]
    pub operations: BTreeMap<String, ProbeOutcome>,
}

impl HealthCheckRecord {
    /// プローブ結果から記録を作成
    pub fn from_outcomes(
        timestamp: DateTime<Utc>,
        latency_ms: u64,
        outcomes: Vec<(String, ProbeOutcome)>,
    ) -> Self {
        let total = outcomes.len();
        let failed = outcomes.iter().filter(|(_, o)| !o.success).count();
        let error_rate_pct = if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64 * 100.0
        };

        Self {
            timestamp,
            status: HealthStatus::from_error_rate(error_rate_pct),
            latency_ms,
            error_rate_pct,
            operations: outcomes.into_iter().collect(),
        }
    }

    /// 集計済みの値から記録を作成
    pub fn new(timestamp: DateTime<Utc>, latency_ms: u64, error_rate_pct: f64) -> Self {
        Self {
            timestamp,
            status: HealthStatus::from_error_rate(error_rate_pct),
            latency_ms,
            error_rate_pct,
            operations: BTreeMap::new(),
        }
    }

    pub fn failed_probes(&self) -> usize {
        self.operations.values().filter(|o| !o.success).count()
    }
}

/// 外部オペレーション
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    /// 実行して成功/失敗を返す
    async fn execute(&self) -> Result<()>;
}

/// 外部CLIを実行するプローブ（終了コード0で成功）
pub struct CommandProbe {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Probe for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<()> {
        // タイムアウトで future が破棄されたら子プロセスも終了させる
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Probe {
                probe: self.name.clone(),
                message: format!("failed to spawn {}: {}", self.program, e),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| output.status.to_string());
        Err(Error::Probe {
            probe: self.name.clone(),
            message: detail,
        })
    }
}

/// HTTP GETプローブ（2xxで成功）
pub struct HttpProbe {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<()> {
        self.client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Probe {
                probe: self.name.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// プローブサンプラー
pub struct ProbeSampler {
    probes: Vec<Box<dyn Probe>>,
    timeout: Duration,
}

impl ProbeSampler {
    pub fn new(probes: Vec<Box<dyn Probe>>, timeout: Duration) -> Self {
        Self { probes, timeout }
    }

    /// 設定のプローブ定義から生成
    pub fn from_specs(specs: &[ProbeSpec], timeout: Duration) -> Self {
        let client = reqwest::Client::new();
        let probes = specs
            .iter()
            .map(|spec| -> Box<dyn Probe> {
                match spec {
                    ProbeSpec::Command {
                        name,
                        program,
                        args,
                    } => Box::new(CommandProbe::new(name, program, args.clone())),
                    ProbeSpec::Http { name, url } => {
                        Box::new(HttpProbe::new(name, url, client.clone()))
                    }
                }
            })
            .collect();

        Self::new(probes, timeout)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    pub async fn sample(&self) -> HealthCheckRecord {
        self.sample_at(Utc::now()).await
    }

    /// 全プローブを順に実行。1つの失敗で残りを中断しない
    pub async fn sample_at(&self, timestamp: DateTime<Utc>) -> HealthCheckRecord {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(self.probes.len());

        for probe in &self.probes {
            let probe_started = Instant::now();
            let result = match tokio::time::timeout(self.timeout, probe.execute()).await {
                Ok(result) => result,
                Err(_) => Err(Error::ProbeTimeout {
                    probe: probe.name().to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };
            let latency_ms = probe_started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(()) => {
                    tracing::debug!(probe = probe.name(), latency_ms, "Probe succeeded");
                    ProbeOutcome {
                        success: true,
                        latency_ms,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(probe = probe.name(), latency_ms, error = %e, "Probe failed");
                    ProbeOutcome {
                        success: false,
                        latency_ms,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push((probe.name().to_string(), outcome));
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        HealthCheckRecord::from_outcomes(timestamp, latency_ms, outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeProbe {
        name: &'static str,
        fail: bool,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Probe for FakeProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(Error::Probe {
                    probe: self.name.to_string(),
                    message: "rpc error".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn fake(name: &'static str, fail: bool, calls: &Arc<AtomicUsize>) -> Box<dyn Probe> {
        Box::new(FakeProbe {
            name,
            fail,
            delay: Duration::from_millis(1),
            calls: calls.clone(),
        })
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(HealthStatus::from_error_rate(0.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_error_rate(0.1), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(49.9), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(50.0), HealthStatus::Down);
        assert_eq!(HealthStatus::from_error_rate(100.0), HealthStatus::Down);
    }

    #[test]
    fn test_status_matches_error_rate_for_all_ratios() {
        for total in 1..=8usize {
            for failed in 0..=total {
                let outcomes = (0..total)
                    .map(|i| {
                        (
                            format!("p{}", i),
                            ProbeOutcome {
                                success: i >= failed,
                                latency_ms: 1,
                                error: None,
                            },
                        )
                    })
                    .collect();
                let record = HealthCheckRecord::from_outcomes(Utc::now(), 1, outcomes);

                assert_eq!(
                    record.status == HealthStatus::Healthy,
                    record.error_rate_pct == 0.0
                );
                assert_eq!(
                    record.status == HealthStatus::Down,
                    record.error_rate_pct >= 50.0
                );
            }
        }
    }

    #[tokio::test]
    async fn test_partial_failure_runs_all_probes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sampler = ProbeSampler::new(
            vec![
                fake("reachability", false, &calls),
                fake("register", true, &calls),
                fake("list", false, &calls),
                fake("escrow", false, &calls),
            ],
            Duration::from_secs(1),
        );

        let record = sampler.sample().await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(record.error_rate_pct, 25.0);
        assert_eq!(record.status, HealthStatus::Degraded);
        assert_eq!(record.failed_probes(), 1);
        assert!(!record.operations["register"].success);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow: Box<dyn Probe> = Box::new(FakeProbe {
            name: "slow",
            fail: false,
            delay: Duration::from_millis(500),
            calls: calls.clone(),
        });
        let sampler = ProbeSampler::new(
            vec![slow, fake("fast", false, &calls)],
            Duration::from_millis(50),
        );

        let record = sampler.sample().await;
        assert_eq!(record.error_rate_pct, 50.0);
        assert_eq!(record.status, HealthStatus::Down);
        let error = record.operations["slow"].error.as_deref().unwrap();
        assert!(error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_command_probe_exit_status() {
        let ok = CommandProbe::new("true", "sh", vec!["-c".into(), "exit 0".into()]);
        assert!(ok.execute().await.is_ok());

        let failing = CommandProbe::new(
            "false",
            "sh",
            vec!["-c".into(), "echo boom >&2; exit 3".into()],
        );
        match failing.execute().await {
            Err(Error::Probe { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_probe_failure() {
        let probe = CommandProbe::new("missing", "definitely-not-a-real-binary-xyz", vec![]);
        assert!(matches!(probe.execute().await, Err(Error::Probe { .. })));
    }
}
