use crate::config::{LogRetentionConfig, LogSettings};
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "chain-monitor";

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error)
    pub level: String,
    /// ログディレクトリ
    pub log_dir: PathBuf,
    /// ファイルローテーション設定
    pub rotation: LogRotation,
    /// ログ保持ポリシー
    pub retention: LogRetention,
    /// コンソール出力有効
    pub console_enabled: bool,
    /// ファイル出力有効
    pub file_enabled: bool,
    /// JSON形式で出力
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogRotation {
    /// 日次ローテーション
    Daily,
    /// 時間毎ローテーション
    Hourly,
    /// ローテーションなし
    Never,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogRetention {
    /// アプリケーションは削除しない（OS/ログ管理ツール任せ）
    External,
    /// 指定日数後に自動削除
    Days(u32),
    /// 最大ファイル数を保持
    Count(u32),
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            rotation: LogRotation::Daily,
            retention: LogRetention::External,
            console_enabled: true,
            file_enabled: false,
            json: false,
        }
    }
}

impl LogConfig {
    /// 設定からログ設定を作成
    pub fn from_settings(settings: &LogSettings) -> Self {
        Self {
            level: settings.level.clone(),
            log_dir: settings.dir.clone(),
            rotation: parse_rotation(&settings.rotation),
            retention: parse_retention_config(&settings.retention),
            console_enabled: settings.console,
            file_enabled: settings.file,
            json: settings.json,
        }
    }

    /// ログレベルを上書き
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// ログシステムを初期化
///
/// ファイル出力が有効な場合は `WorkerGuard` を返す。呼び出し側はプロセス終了まで保持すること。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let guard = match (config.console_enabled, config.file_enabled) {
        (_, true) => {
            fs::create_dir_all(&config.log_dir)?;
            let file_appender = match config.rotation {
                LogRotation::Daily => rolling::daily(&config.log_dir, LOG_FILE_PREFIX),
                LogRotation::Hourly => rolling::hourly(&config.log_dir, LOG_FILE_PREFIX),
                LogRotation::Never => rolling::never(&config.log_dir, LOG_FILE_PREFIX),
            };
            let (writer, guard) = non_blocking(file_appender);

            let builder = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_ansi(false);

            match (config.console_enabled, config.json) {
                (true, true) => builder.json().with_writer(std::io::stderr.and(writer)).init(),
                (true, false) => builder.with_writer(std::io::stderr.and(writer)).init(),
                (false, true) => builder.json().with_writer(writer).init(),
                (false, false) => builder.with_writer(writer).init(),
            }
            Some(guard)
        }
        (true, false) => {
            let builder = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr);
            if config.json {
                builder.json().init();
            } else {
                builder.init();
            }
            None
        }
        (false, false) => {
            // 最低限のコンソール出力
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::WARN)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    };

    tracing::debug!(
        level = %config.level,
        log_dir = %config.log_dir.display(),
        console = config.console_enabled,
        file = config.file_enabled,
        "Logging initialized"
    );

    if config.file_enabled {
        if let Err(e) = apply_retention_policy(config) {
            tracing::warn!(error = %e, "Failed to apply log retention policy");
        }
    }

    Ok(guard)
}

/// ログ保持ポリシーを適用
fn apply_retention_policy(config: &LogConfig) -> Result<()> {
    match &config.retention {
        LogRetention::External => Ok(()),
        LogRetention::Days(days) => cleanup_old_logs_by_age(&config.log_dir, *days),
        LogRetention::Count(max_count) => cleanup_old_logs_by_count(&config.log_dir, *max_count),
    }
}

/// 日数ベースでログファイルを削除
fn cleanup_old_logs_by_age(log_dir: &Path, max_days: u32) -> Result<()> {
    use std::time::{Duration, SystemTime};

    let cutoff_time = SystemTime::now() - Duration::from_secs(max_days as u64 * 24 * 60 * 60);
    let mut removed_count = 0;

    for (path, modified) in list_log_files(log_dir)? {
        if modified < cutoff_time {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove log file");
            } else {
                removed_count += 1;
            }
        }
    }

    if removed_count > 0 {
        tracing::info!(removed_count, max_days, "Removed expired log files");
    }

    Ok(())
}

/// ファイル数ベースでログファイルを削除
fn cleanup_old_logs_by_count(log_dir: &Path, max_count: u32) -> Result<()> {
    let mut log_files = list_log_files(log_dir)?;

    // 更新日時でソート（新しい順）
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed_count = 0;
    for (path, _) in log_files.iter().skip(max_count as usize) {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove log file");
        } else {
            removed_count += 1;
        }
    }

    if removed_count > 0 {
        tracing::info!(removed_count, max_count, "Removed surplus log files");
    }

    Ok(())
}

fn list_log_files(log_dir: &Path) -> Result<Vec<(PathBuf, std::time::SystemTime)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if is_log_file(&path) {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                files.push((path, modified));
            }
        }
    }
    Ok(files)
}

/// ログファイルかどうかを判定
fn is_log_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| name.starts_with(LOG_FILE_PREFIX))
            .unwrap_or(false)
}

fn parse_rotation(value: &str) -> LogRotation {
    match value {
        "hourly" => LogRotation::Hourly,
        "never" => LogRotation::Never,
        _ => LogRotation::Daily,
    }
}

/// 設定からログ保持ポリシーを解析
fn parse_retention_config(config: &LogRetentionConfig) -> LogRetention {
    match config.policy.as_deref() {
        Some("days") => LogRetention::Days(config.days.unwrap_or(30)),
        Some("count") => LogRetention::Count(config.count.unwrap_or(10)),
        _ => LogRetention::External, // デフォルトは外部管理
    }
}
