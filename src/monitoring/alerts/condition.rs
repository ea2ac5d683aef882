//! Alert Condition Types
//!
//! 条件評価は純粋関数。型の不一致は `false` として扱い、呼び出し側へエラーを伝播しない。

use crate::error::Result;
use crate::monitoring::metrics::MetricValue;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// ログ末尾から走査する最大行数
pub const LOG_TAIL_LINES: usize = 100;

/// メタデータとして添付する一致行の数
pub const MATCHED_LINES_KEPT: usize = 3;

/// アラート条件
///
/// 閾値条件（メトリクス比較）またはパターン条件（ログ一致）のいずれか一方。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertCondition {
    /// メトリクス比較
    Threshold {
        metric: String,
        operator: Comparison,
        value: MetricValue,
    },
    /// ログパターン一致（大文字小文字を区別しない）
    Pattern { pattern: String },
}

impl AlertCondition {
    pub fn threshold(metric: impl Into<String>, operator: Comparison, value: impl Into<MetricValue>) -> Self {
        AlertCondition::Threshold {
            metric: metric.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        AlertCondition::Pattern {
            pattern: pattern.into(),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, AlertCondition::Pattern { .. })
    }
}

/// 比較演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// より大きい
    Gt,
    /// より小さい
    Lt,
    /// 等しい
    Eq,
    /// 等しくない
    Ne,
    /// 部分文字列を含む
    Contains,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Gt => "gt",
            Comparison::Lt => "lt",
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Contains => "contains",
        }
    }

    /// 観測値と閾値を比較
    pub fn evaluate(&self, observed: &MetricValue, expected: &MetricValue) -> bool {
        use MetricValue::{Number, Text};

        match (self, observed, expected) {
            (Comparison::Gt, Number(a), Number(b)) => a > b,
            (Comparison::Lt, Number(a), Number(b)) => a < b,
            (Comparison::Eq, Number(a), Number(b)) => (a - b).abs() < f64::EPSILON,
            (Comparison::Ne, Number(a), Number(b)) => (a - b).abs() >= f64::EPSILON,
            (Comparison::Eq, Text(a), Text(b)) => a.to_lowercase() == b.to_lowercase(),
            (Comparison::Ne, Text(a), Text(b)) => a.to_lowercase() != b.to_lowercase(),
            (Comparison::Contains, Text(a), Text(b)) => {
                a.to_lowercase().contains(&b.to_lowercase())
            }
            _ => {
                tracing::warn!(
                    operator = self.as_str(),
                    observed = %observed,
                    expected = %expected,
                    "Operand type mismatch, condition evaluates to false"
                );
                false
            }
        }
    }
}

/// コンパイル済みログパターン
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    regex: Regex,
}

/// パターン一致結果
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub match_count: usize,
    /// 新しい順ではなくログ出現順で直近の一致行
    pub recent_lines: Vec<String>,
}

impl CompiledPattern {
    /// パターンを一度だけコンパイル
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { regex })
    }

    /// ログ末尾の各行と照合
    pub fn scan<S: AsRef<str>>(&self, lines: &[S]) -> Option<PatternMatch> {
        let start = lines.len().saturating_sub(LOG_TAIL_LINES);
        let matched: Vec<&str> = lines[start..]
            .iter()
            .map(|l| l.as_ref())
            .filter(|l| self.regex.is_match(l))
            .collect();

        if matched.is_empty() {
            return None;
        }

        let keep_from = matched.len().saturating_sub(MATCHED_LINES_KEPT);
        Some(PatternMatch {
            match_count: matched.len(),
            recent_lines: matched[keep_from..].iter().map(|l| l.to_string()).collect(),
        })
    }
}

/// ファイル末尾の最大 `LOG_TAIL_LINES` 行を読む
pub async fn read_log_tail(path: &std::path::Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_comparisons() {
        let v = |n: f64| MetricValue::Number(n);
        assert!(Comparison::Gt.evaluate(&v(10.0), &v(5.0)));
        assert!(!Comparison::Gt.evaluate(&v(5.0), &v(10.0)));
        assert!(Comparison::Lt.evaluate(&v(5.0), &v(10.0)));
        assert!(Comparison::Eq.evaluate(&v(50.0), &v(50.0)));
        assert!(Comparison::Ne.evaluate(&v(49.0), &v(50.0)));
    }

    #[test]
    fn test_text_comparisons_are_case_insensitive() {
        let t = |s: &str| MetricValue::Text(s.to_string());
        assert!(Comparison::Eq.evaluate(&t("DOWN"), &t("down")));
        assert!(Comparison::Ne.evaluate(&t("healthy"), &t("down")));
        assert!(Comparison::Contains.evaluate(&t("Deployment FAILED at slot 9"), &t("failed")));
        assert!(!Comparison::Contains.evaluate(&t("ok"), &t("failed")));
    }

    #[test]
    fn test_text_operators_share_unicode_case_folding() {
        let t = |s: &str| MetricValue::Text(s.to_string());
        assert!(Comparison::Eq.evaluate(&t("ÉCHEC"), &t("échec")));
        assert!(!Comparison::Ne.evaluate(&t("ÉCHEC"), &t("échec")));
        assert!(Comparison::Contains.evaluate(&t("audit ÉCHEC"), &t("échec")));
    }

    #[test]
    fn test_type_mismatch_is_false() {
        let number = MetricValue::Number(100.0);
        let text = MetricValue::Text("down".to_string());
        assert!(!Comparison::Gt.evaluate(&text, &number));
        assert!(!Comparison::Eq.evaluate(&number, &text));
        assert!(!Comparison::Ne.evaluate(&number, &text));
        assert!(!Comparison::Contains.evaluate(&number, &text));
    }

    #[test]
    fn test_condition_json_shapes() {
        let threshold: AlertCondition =
            serde_json::from_str(r#"{"metric":"status","operator":"eq","value":"down"}"#).unwrap();
        assert_eq!(
            threshold,
            AlertCondition::threshold("status", Comparison::Eq, "down")
        );

        let numeric: AlertCondition =
            serde_json::from_str(r#"{"metric":"response_time","operator":"gt","value":5000}"#)
                .unwrap();
        assert_eq!(
            numeric,
            AlertCondition::threshold("response_time", Comparison::Gt, 5000.0)
        );

        let pattern: AlertCondition = serde_json::from_str(r#"{"pattern":"panic|error"}"#).unwrap();
        assert!(pattern.is_pattern());
    }

    #[test]
    fn test_pattern_scan_keeps_recent_three() {
        let pattern = CompiledPattern::compile("error").unwrap();
        let lines = vec![
            "ERROR first",
            "info ok",
            "Error second",
            "error third",
            "warn",
            "error fourth",
        ];

        let found = pattern.scan(&lines).unwrap();
        assert_eq!(found.match_count, 4);
        assert_eq!(
            found.recent_lines,
            vec!["Error second", "error third", "error fourth"]
        );
    }

    #[test]
    fn test_pattern_scan_only_reads_bounded_tail() {
        let pattern = CompiledPattern::compile("fatal").unwrap();
        let mut lines = vec!["fatal: old".to_string()];
        lines.extend((0..LOG_TAIL_LINES).map(|i| format!("line {}", i)));

        assert!(pattern.scan(&lines).is_none());
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(CompiledPattern::compile("(unclosed").is_err());
    }

    #[tokio::test]
    async fn test_read_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let content: String = (0..150).map(|i| format!("line {}\n", i)).collect();
        tokio::fs::write(&path, content).await.unwrap();

        let tail = read_log_tail(&path).await.unwrap();
        assert_eq!(tail.len(), LOG_TAIL_LINES);
        assert_eq!(tail[0], "line 50");
        assert_eq!(tail[LOG_TAIL_LINES - 1], "line 149");
    }
}
