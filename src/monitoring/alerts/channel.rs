//! Alert Channels
//!
//! 配信チャネルと、チャネルごとに障害を隔離するディスパッチャー。

use super::alert::{Alert, AlertSeverity};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

/// 配信チャネル定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertChannel {
    #[serde(flatten)]
    pub kind: ChannelKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// チャネル種別ごとの型付き設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ChannelKind {
    Console,
    File {
        filename: String,
    },
    Webhook {
        url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Slack {
        webhook_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Email {
        recipients: Vec<String>,
    },
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Console => "console",
            ChannelKind::File { .. } => "file",
            ChannelKind::Webhook { .. } => "webhook",
            ChannelKind::Slack { .. } => "slack",
            ChannelKind::Email { .. } => "email",
        }
    }
}

impl AlertChannel {
    pub fn console() -> Self {
        Self {
            kind: ChannelKind::Console,
            enabled: true,
        }
    }

    pub fn file(filename: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::File {
                filename: filename.into(),
            },
            enabled: true,
        }
    }

    pub fn webhook(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            kind: ChannelKind::Webhook {
                url: url.into(),
                timeout_secs,
            },
            enabled: true,
        }
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            ChannelKind::Console => Ok(()),
            ChannelKind::File { filename } => {
                let path = Path::new(filename);
                let plain = path.components().count() == 1
                    && matches!(path.components().next(), Some(std::path::Component::Normal(_)));
                if filename.is_empty() || !plain {
                    return Err(Error::Config(format!(
                        "file channel needs a plain file name, got '{}'",
                        filename
                    )));
                }
                Ok(())
            }
            ChannelKind::Webhook { url, timeout_secs }
            | ChannelKind::Slack {
                webhook_url: url,
                timeout_secs,
            } => {
                reqwest::Url::parse(url)
                    .map_err(|e| Error::Config(format!("invalid channel url '{}': {}", url, e)))?;
                if *timeout_secs == 0 {
                    return Err(Error::Config("channel timeout must be > 0".into()));
                }
                Ok(())
            }
            ChannelKind::Email { recipients } => {
                if recipients.is_empty() {
                    return Err(Error::Config("email channel needs recipients".into()));
                }
                Ok(())
            }
        }
    }
}

/// アラート配信先
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// チャネル種別名（ログ用）
    fn kind(&self) -> &str;

    /// アラートを配信
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// 標準出力
pub struct ConsoleSink;

#[async_trait]
impl AlertSink for ConsoleSink {
    fn kind(&self) -> &str {
        "console"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let marker = match alert.severity {
            AlertSeverity::Critical => "🚨",
            AlertSeverity::High => "❗",
            AlertSeverity::Medium => "⚠️ ",
            AlertSeverity::Low => "ℹ️ ",
        };
        println!(
            "{} [{}] {} - {} ({})",
            marker,
            alert.severity.as_str().to_uppercase(),
            alert.title,
            alert.message,
            alert.timestamp.to_rfc3339()
        );
        Ok(())
    }
}

/// アラートディレクトリ配下のファイルへJSON行を追記
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(alerts_dir: &Path, filename: &str) -> Self {
        Self {
            path: alerts_dir.join(filename),
        }
    }
}

#[async_trait]
impl AlertSink for FileSink {
    fn kind(&self) -> &str {
        "file"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        append_json_line(&self.path, alert).await
    }
}

/// Webhook（JSON POST、リトライなし）
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn kind(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        self.client
            .post(&self.url)
            .timeout(self.timeout)
            .json(alert)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Slack Incoming Webhook
pub struct SlackSink {
    client: reqwest::Client,
    webhook_url: String,
    timeout: Duration,
}

#[async_trait]
impl AlertSink for SlackSink {
    fn kind(&self) -> &str {
        "slack"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let payload = serde_json::json!({
            "text": format!(
                "*[{}]* {}\n{}",
                alert.severity.as_str().to_uppercase(),
                alert.title,
                alert.message
            ),
        });
        self.client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// メール（SMTP未接続のためログのみ）
pub struct EmailSink {
    recipients: Vec<String>,
}

#[async_trait]
impl AlertSink for EmailSink {
    fn kind(&self) -> &str {
        "email"
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        tracing::info!(
            alert_id = %alert.id,
            recipients = ?self.recipients,
            "Email delivery has no transport configured, skipping"
        );
        Ok(())
    }
}

/// 配信結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// 配信に成功したチャネル種別
    pub delivered: Vec<String>,
    /// 失敗したチャネル種別とエラー内容
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// チャネルディスパッチャー
pub struct ChannelDispatcher {
    alerts_dir: PathBuf,
    client: reqwest::Client,
}

impl ChannelDispatcher {
    pub fn new(alerts_dir: impl Into<PathBuf>) -> Self {
        Self {
            alerts_dir: alerts_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn alerts_dir(&self) -> &Path {
        &self.alerts_dir
    }

    /// チャネル定義から配信先を生成
    pub fn sink_for(&self, kind: &ChannelKind) -> Arc<dyn AlertSink> {
        match kind {
            ChannelKind::Console => Arc::new(ConsoleSink),
            ChannelKind::File { filename } => Arc::new(FileSink::new(&self.alerts_dir, filename)),
            ChannelKind::Webhook { url, timeout_secs } => Arc::new(WebhookSink {
                client: self.client.clone(),
                url: url.clone(),
                timeout: Duration::from_secs(*timeout_secs),
            }),
            ChannelKind::Slack {
                webhook_url,
                timeout_secs,
            } => Arc::new(SlackSink {
                client: self.client.clone(),
                webhook_url: webhook_url.clone(),
                timeout: Duration::from_secs(*timeout_secs),
            }),
            ChannelKind::Email { recipients } => Arc::new(EmailSink {
                recipients: recipients.clone(),
            }),
        }
    }

    /// 有効なチャネルへアラートを配信
    pub async fn dispatch(&self, alert: &Alert, channels: &[AlertChannel]) -> DispatchReport {
        let sinks: Vec<Arc<dyn AlertSink>> = channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| self.sink_for(&c.kind))
            .collect();

        deliver_all(alert, &sinks).await
    }

    /// 日別アラートログへ追記
    pub async fn append_daily_log(&self, alert: &Alert) -> Result<()> {
        let path = daily_log_path(&self.alerts_dir, alert.timestamp);
        append_json_line(&path, alert).await
    }
}

/// 各配信先へ順に配信する。1つの失敗は他の配信を妨げない。
pub async fn deliver_all(alert: &Alert, sinks: &[Arc<dyn AlertSink>]) -> DispatchReport {
    let mut report = DispatchReport::default();

    for sink in sinks {
        match sink.deliver(alert).await {
            Ok(()) => report.delivered.push(sink.kind().to_string()),
            Err(e) => {
                tracing::error!(
                    channel = sink.kind(),
                    alert_id = %alert.id,
                    error = %e,
                    "Alert delivery failed"
                );
                report.failed.push((sink.kind().to_string(), e.to_string()));
            }
        }
    }

    report
}

/// 日別アラートログのパス
pub fn daily_log_path(alerts_dir: &Path, at: DateTime<Utc>) -> PathBuf {
    alerts_dir.join(format!("alerts-{}.log", at.format("%Y-%m-%d")))
}

async fn append_json_line(path: &Path, alert: &Alert) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(alert)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| Error::persistence(path, e))?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct RecordingSink {
        name: &'static str,
        received: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn kind(&self) -> &str {
            self.name
        }

        async fn deliver(&self, _alert: &Alert) -> Result<()> {
            if self.fail {
                return Err(Error::channel(self.name, "connection refused"));
            }
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_alert() -> Alert {
        Alert::new("rule", "Title", "Message", AlertSeverity::High, Utc::now())
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_siblings() {
        let first = Arc::new(RecordingSink {
            name: "first",
            received: AtomicUsize::new(0),
            fail: false,
        });
        let broken = Arc::new(RecordingSink {
            name: "broken",
            received: AtomicUsize::new(0),
            fail: true,
        });
        let third = Arc::new(RecordingSink {
            name: "third",
            received: AtomicUsize::new(0),
            fail: false,
        });
        let sinks: Vec<Arc<dyn AlertSink>> = vec![
            first.clone() as Arc<dyn AlertSink>,
            broken.clone() as Arc<dyn AlertSink>,
            third.clone() as Arc<dyn AlertSink>,
        ];

        let report = deliver_all(&sample_alert(), &sinks).await;

        assert_eq!(first.received.load(Ordering::SeqCst), 1);
        assert_eq!(third.received.load(Ordering::SeqCst), 1);
        assert_eq!(report.delivered, vec!["first", "third"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
    }

    #[tokio::test]
    async fn test_file_channel_appends_json_lines() {
        let dir = tempdir().unwrap();
        let alerts_dir = dir.path().join("nested/alerts");
        let dispatcher = ChannelDispatcher::new(&alerts_dir);
        let channels = vec![AlertChannel::file("critical-alerts.log")];

        dispatcher.dispatch(&sample_alert(), &channels).await;
        let report = dispatcher.dispatch(&sample_alert(), &channels).await;
        assert!(report.all_delivered());

        let content = std::fs::read_to_string(alerts_dir.join("critical-alerts.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Alert = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.rule_id, "rule");
    }

    #[tokio::test]
    async fn test_disabled_channels_are_skipped() {
        let dir = tempdir().unwrap();
        let dispatcher = ChannelDispatcher::new(dir.path());
        let mut channel = AlertChannel::file("skipped.log");
        channel.enabled = false;

        let report = dispatcher.dispatch(&sample_alert(), &[channel]).await;
        assert!(report.delivered.is_empty());
        assert!(!dir.path().join("skipped.log").exists());
    }

    #[tokio::test]
    async fn test_daily_log_path() {
        let dir = tempdir().unwrap();
        let dispatcher = ChannelDispatcher::new(dir.path());
        let alert = sample_alert();

        dispatcher.append_daily_log(&alert).await.unwrap();
        let expected = daily_log_path(dir.path(), alert.timestamp);
        assert!(expected.exists());
        assert!(expected
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("alerts-"));
    }

    #[test]
    fn test_channel_json_shape() {
        let channel: AlertChannel =
            serde_json::from_str(r#"{"type":"webhook","url":"https://hooks.example.com/a"}"#)
                .unwrap();
        assert!(channel.enabled);
        assert_eq!(
            channel.kind,
            ChannelKind::Webhook {
                url: "https://hooks.example.com/a".to_string(),
                timeout_secs: 10
            }
        );

        let json = serde_json::to_value(AlertChannel::console()).unwrap();
        assert_eq!(json["type"], "console");
    }

    #[test]
    fn test_channel_validation() {
        assert!(AlertChannel::file("critical-alerts.log").validate().is_ok());
        assert!(AlertChannel::file("../escape.log").validate().is_err());
        assert!(AlertChannel::file("").validate().is_err());
        assert!(AlertChannel::webhook("not a url", 5).validate().is_err());
        assert!(AlertChannel::webhook("https://example.com/hook", 0)
            .validate()
            .is_err());
    }
}
