use crate::error::{Error, Result};
use crate::monitoring::trend::TrendConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 監視エンジン全体の設定
///
/// 各コンポーネントはこの構造体（またはその一部）をコンストラクタで受け取る。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub probes: ProbesConfig,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub log: LogSettings,
}

/// 永続化パス設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub alerts_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub rules_file: PathBuf,
    pub history_file: PathBuf,
    pub status_file: PathBuf,
    /// error-log ルールが走査するログファイル
    pub log_file: Option<PathBuf>,
    /// 外部コラボレーターが書き込むシグナルファイル（JSONオブジェクト）
    pub signals_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("monitoring");
        Self {
            alerts_dir: data_dir.join("alerts"),
            reports_dir: data_dir.join("reports"),
            rules_file: data_dir.join("alert-rules.json"),
            history_file: data_dir.join("health-history.json"),
            status_file: data_dir.join("current-status.json"),
            log_file: None,
            signals_file: None,
            data_dir,
        }
    }
}

/// ティックスケジュール設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// ティック間隔（秒）
    pub interval_secs: u64,
    /// 何ティックごとにレポートを生成するか
    pub report_every_ticks: u64,
    /// 何ティックごとに履歴を剪定するか
    pub prune_every_ticks: u64,
    /// 履歴の保持期間（時間）
    pub retention_hours: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            report_every_ticks: 60,
            prune_every_ticks: 10,
            retention_hours: 24,
        }
    }
}

/// プローブ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbesConfig {
    /// 各プローブのタイムアウト（秒）
    pub timeout_secs: u64,
    /// 実行順に並んだプローブ一覧
    pub battery: Vec<ProbeSpec>,
}

impl Default for ProbesConfig {
    fn default() -> Self {
        let command = |name: &str, args: &[&str]| ProbeSpec::Command {
            name: name.to_string(),
            program: "chain-cli".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        };

        Self {
            timeout_secs: 30,
            battery: vec![
                command("program-reachability", &["program", "status"]),
                command("agent-registration", &["agent", "register", "--dry-run"]),
                command("agent-listing", &["agent", "list", "--limit", "1"]),
                command("escrow-creation", &["escrow", "create", "--dry-run"]),
            ],
        }
    }
}

/// プローブ定義
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeSpec {
    /// 外部CLIを実行し終了コードで判定
    Command {
        name: String,
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// HTTP GETで到達性を判定
    Http { name: String, url: String },
}

impl ProbeSpec {
    pub fn name(&self) -> &str {
        match self {
            ProbeSpec::Command { name, .. } | ProbeSpec::Http { name, .. } => name,
        }
    }
}

/// ログ設定（文字列ベース、logging モジュールで解釈）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSettings {
    pub level: String,
    pub dir: PathBuf,
    /// daily | hourly | never
    pub rotation: String,
    pub console: bool,
    pub file: bool,
    pub json: bool,
    #[serde(default)]
    pub retention: LogRetentionConfig,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
            rotation: "daily".to_string(),
            console: true,
            file: false,
            json: false,
            retention: LogRetentionConfig::default(),
        }
    }
}

/// ログ保持ポリシー設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogRetentionConfig {
    /// external | days | count
    pub policy: Option<String>,
    pub days: Option<u32>,
    pub count: Option<u32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            schedule: ScheduleConfig::default(),
            probes: ProbesConfig::default(),
            trend: TrendConfig::default(),
            log: LogSettings::default(),
        }
    }
}

const CONFIG_SEARCH_PATHS: &[&str] = &["chain-monitor.toml", "config/chain-monitor.toml"];

impl MonitorConfig {
    /// 設定ファイルから読み込み、環境変数で上書き
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        // デフォルト値を設定
        settings = settings.add_source(config::Config::try_from(&MonitorConfig::default())?);

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                settings = settings.add_source(config::File::from(path));
            }
            None => {
                if let Some(found) = CONFIG_SEARCH_PATHS
                    .iter()
                    .map(Path::new)
                    .find(|p| p.exists())
                {
                    tracing::debug!(path = %found.display(), "Loading config file");
                    settings = settings.add_source(config::File::from(found));
                }
            }
        }

        // 環境変数で上書き (CHAIN_MONITOR__SCHEDULE__INTERVAL_SECS 等)
        settings = settings.add_source(
            config::Environment::with_prefix("CHAIN_MONITOR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: MonitorConfig = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<()> {
        if self.schedule.interval_secs == 0 {
            return Err(Error::Config("schedule.interval_secs must be > 0".into()));
        }
        if self.schedule.report_every_ticks == 0 || self.schedule.prune_every_ticks == 0 {
            return Err(Error::Config(
                "schedule.report_every_ticks and schedule.prune_every_ticks must be > 0".into(),
            ));
        }
        if self.probes.battery.is_empty() {
            return Err(Error::Config("probes.battery must not be empty".into()));
        }
        let mut names = std::collections::HashSet::new();
        for probe in &self.probes.battery {
            if !names.insert(probe.name()) {
                return Err(Error::Config(format!(
                    "duplicate probe name: {}",
                    probe.name()
                )));
            }
        }
        if self.probes.timeout_secs == 0 {
            return Err(Error::Config("probes.timeout_secs must be > 0".into()));
        }
        self.trend.validate()
    }

    /// 必要なディレクトリを作成
    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = [
            Some(self.paths.data_dir.as_path()),
            Some(self.paths.alerts_dir.as_path()),
            Some(self.paths.reports_dir.as_path()),
            self.paths.rules_file.parent(),
            self.paths.history_file.parent(),
            self.paths.status_file.parent(),
        ];

        for dir in dirs.into_iter().flatten() {
            if dir.as_os_str().is_empty() {
                continue;
            }
            std::fs::create_dir_all(dir).map_err(|e| Error::persistence(dir, e))?;
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probes.timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.schedule.retention_hours as i64)
    }

    /// サンプル設定ファイルを生成
    pub fn generate_sample_config(path: &Path) -> Result<()> {
        let toml_content = toml::to_string_pretty(&MonitorConfig::default())
            .map_err(|e| Error::Config(e.to_string()))?;

        let sample_content = format!(
            r#"# chain-monitor configuration
#
# Save as chain-monitor.toml. Every key can be overridden from the
# environment, e.g. CHAIN_MONITOR__SCHEDULE__INTERVAL_SECS=30

{}"#,
            toml_content
        );

        std::fs::write(path, sample_content).map_err(|e| Error::persistence(path, e))?;
        Ok(())
    }
}
