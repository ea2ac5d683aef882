//! ヘルスチェック履歴（追記専用・保持期間で剪定）

use crate::error::Result;
use crate::monitoring::persist;
use crate::monitoring::probe::HealthCheckRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// 履歴ストア
pub struct HistoryStore {
    path: PathBuf,
    records: VecDeque<HealthCheckRecord>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: VecDeque::new(),
        }
    }

    /// 永続化された履歴を読み込み、保持期間外を剪定する
    pub async fn load(path: impl Into<PathBuf>, retention: Duration, now: DateTime<Utc>) -> Self {
        let mut store = Self::new(path);

        if store.path.exists() {
            match persist::read_json::<Vec<HealthCheckRecord>>(&store.path).await {
                Ok(records) => store.records = records.into(),
                Err(e) => {
                    tracing::warn!(
                        path = %store.path.display(),
                        error = %e,
                        "Health history unreadable, starting empty"
                    );
                }
            }
        }

        let removed = store.prune(retention, now);
        tracing::debug!(
            path = %store.path.display(),
            records = store.len(),
            removed,
            "Health history loaded"
        );
        store
    }

    /// 記録を追記
    pub fn append(&mut self, record: HealthCheckRecord) {
        self.records.push_back(record);
    }

    /// `now - retention` より古い記録を削除し、削除件数を返す
    pub fn prune(&mut self, retention: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - retention;
        let before = self.records.len();
        self.records.retain(|r| r.timestamp >= cutoff);
        before - self.records.len()
    }

    /// 直近 n 件（古い順）
    pub fn window(&self, n: usize) -> Vec<HealthCheckRecord> {
        let start = self.records.len().saturating_sub(n);
        self.records.iter().skip(start).cloned().collect()
    }

    /// 全件（古い順）
    pub fn all(&self) -> Vec<HealthCheckRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&HealthCheckRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 履歴を丸ごと書き換える
    pub async fn save(&self) -> Result<()> {
        let records: Vec<&HealthCheckRecord> = self.records.iter().collect();
        persist::write_json(&self.path, &records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record_at(timestamp: DateTime<Utc>) -> HealthCheckRecord {
        HealthCheckRecord::new(timestamp, 120, 0.0)
    }

    #[test]
    fn test_prune_by_retention() {
        let now = Utc::now();
        let mut store = HistoryStore::new("unused.json");
        store.append(record_at(now - Duration::hours(2)));
        store.append(record_at(now - Duration::minutes(30)));
        store.append(record_at(now - Duration::minutes(5)));

        let removed = store.prune(Duration::hours(1), now);

        assert_eq!(removed, 1);
        let remaining: Vec<DateTime<Utc>> = store.all().iter().map(|r| r.timestamp).collect();
        assert_eq!(
            remaining,
            vec![now - Duration::minutes(30), now - Duration::minutes(5)]
        );
    }

    #[test]
    fn test_window_returns_most_recent() {
        let now = Utc::now();
        let mut store = HistoryStore::new("unused.json");
        for i in 0..5 {
            store.append(record_at(now + Duration::minutes(i)));
        }

        let window = store.window(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].timestamp, now + Duration::minutes(3));
        assert_eq!(window[1].timestamp, now + Duration::minutes(4));
        assert_eq!(store.window(10).len(), 5);
    }

    #[tokio::test]
    async fn test_save_and_load_prunes_expired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let now = Utc::now();

        let mut store = HistoryStore::new(&path);
        store.append(record_at(now - Duration::hours(48)));
        store.append(record_at(now - Duration::hours(1)));
        store.save().await.unwrap();

        let loaded = HistoryStore::load(&path, Duration::hours(24), now).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.latest().unwrap().timestamp, now - Duration::hours(1));
    }

    #[tokio::test]
    async fn test_corrupt_history_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "[{").unwrap();

        let loaded = HistoryStore::load(&path, Duration::hours(24), Utc::now()).await;
        assert!(loaded.is_empty());
    }
}
