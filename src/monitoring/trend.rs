//! Trend Detection
//!
//! 直近ウィンドウと一つ前のウィンドウの平均を比較し、レイテンシ・エラー率・稼働率の傾向を判定する。
//! 判定は比率バンドで行うため、ベースラインの大きさに依存しない。

use crate::error::{Error, Result};
use crate::monitoring::probe::{HealthCheckRecord, HealthStatus};
use serde::{Deserialize, Serialize};

/// トレンド判定パラメータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// 各ウィンドウの記録数
    pub window_size: usize,
    /// 判定に必要な最小サンプル数（各ウィンドウ）
    pub min_samples: usize,
    /// recent / older がこれ以下なら improving（レイテンシ・エラー率）
    pub improving_ratio: f64,
    /// recent / older がこれ以上なら degrading（レイテンシ・エラー率）
    pub degrading_ratio: f64,
    /// 稼働率の比率バンド（±）
    pub uptime_band: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            min_samples: 10,
            improving_ratio: 0.9,
            degrading_ratio: 1.1,
            uptime_band: 0.01,
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.min_samples == 0 {
            return Err(Error::Config(
                "trend.window_size and trend.min_samples must be > 0".into(),
            ));
        }
        if self.min_samples > self.window_size {
            return Err(Error::Config(
                "trend.min_samples must not exceed trend.window_size".into(),
            ));
        }
        if !(self.improving_ratio < 1.0 && self.degrading_ratio > 1.0) {
            return Err(Error::Config(
                "trend ratios must satisfy improving_ratio < 1 < degrading_ratio".into(),
            ));
        }
        if !(self.uptime_band > 0.0 && self.uptime_band < 1.0) {
            return Err(Error::Config("trend.uptime_band must be in (0, 1)".into()));
        }
        Ok(())
    }
}

/// トレンド方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

/// 3指標のトレンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trends {
    pub latency_trend: TrendDirection,
    pub error_trend: TrendDirection,
    pub uptime_trend: TrendDirection,
}

impl Trends {
    pub fn stable() -> Self {
        Self {
            latency_trend: TrendDirection::Stable,
            error_trend: TrendDirection::Stable,
            uptime_trend: TrendDirection::Stable,
        }
    }

    pub fn any_degrading(&self) -> bool {
        [self.latency_trend, self.error_trend, self.uptime_trend].contains(&TrendDirection::Degrading)
    }
}

/// トレンド分析器
pub struct TrendAnalyzer {
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    /// 履歴（古い順）からトレンドを判定
    pub fn analyze(&self, history: &[HealthCheckRecord]) -> Trends {
        let m = self.config.window_size;
        let recent_start = history.len().saturating_sub(m);
        let older_start = recent_start.saturating_sub(m);
        let recent = &history[recent_start..];
        let older = &history[older_start..recent_start];

        if recent.len() < self.config.min_samples || older.len() < self.config.min_samples {
            return Trends::stable();
        }

        let latency = |w: &[HealthCheckRecord]| mean(w.iter().map(|r| r.latency_ms as f64));
        let errors = |w: &[HealthCheckRecord]| mean(w.iter().map(|r| r.error_rate_pct));

        Trends {
            latency_trend: self.lower_is_better(latency(older), latency(recent)),
            error_trend: self.lower_is_better(errors(older), errors(recent)),
            uptime_trend: self.higher_is_better(uptime_pct(older), uptime_pct(recent)),
        }
    }

    fn lower_is_better(&self, older: f64, recent: f64) -> TrendDirection {
        if older <= 0.0 {
            return if recent > 0.0 {
                TrendDirection::Degrading
            } else {
                TrendDirection::Stable
            };
        }

        let ratio = recent / older;
        if ratio <= self.config.improving_ratio {
            TrendDirection::Improving
        } else if ratio >= self.config.degrading_ratio {
            TrendDirection::Degrading
        } else {
            TrendDirection::Stable
        }
    }

    fn higher_is_better(&self, older: f64, recent: f64) -> TrendDirection {
        if older <= 0.0 {
            return if recent > 0.0 {
                TrendDirection::Improving
            } else {
                TrendDirection::Stable
            };
        }

        let ratio = recent / older;
        if ratio >= 1.0 + self.config.uptime_band {
            TrendDirection::Improving
        } else if ratio <= 1.0 - self.config.uptime_band {
            TrendDirection::Degrading
        } else {
            TrendDirection::Stable
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// down でない記録の割合（%）
pub fn uptime_pct(records: &[HealthCheckRecord]) -> f64 {
    if records.is_empty() {
        return 100.0;
    }
    let up = records
        .iter()
        .filter(|r| r.status != HealthStatus::Down)
        .count();
    up as f64 / records.len() as f64 * 100.0
}
