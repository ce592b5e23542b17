//! ファイルに保存するキー/値ストア
//!
//! ブラウザの localStorage に相当する永続状態（選択リスト・現在地・会話履歴・
//! ログイン往復の一時キー）を1つのJSONファイルに置く。書き込みのたびに保存する。

use crate::error::Result;
use itinerary_common::persist::{self, keys};
use itinerary_common::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// 状態ファイルの構造
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
    /// バージョン（互換性チェック用）
    version: u32,
    entries: BTreeMap<String, String>,
}

impl StateFile {
    const CURRENT_VERSION: u32 = 1;
}

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    /// 状態ファイルを開く（存在しない・壊れている場合は空から始める）
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::read(&path).unwrap_or_default();
        log::debug!("状態ファイル {} ({} キー)", path.display(), entries.len());
        Self { path, entries }
    }

    fn read(path: &Path) -> Option<BTreeMap<String, String>> {
        let file = File::open(path).ok()?;
        let reader = BufReader::new(file);
        match serde_json::from_reader::<_, StateFile>(reader) {
            Ok(state) if state.version == StateFile::CURRENT_VERSION => Some(state.entries),
            Ok(_) => {
                log::warn!("状態ファイルのバージョン不一致、空から始めます");
                None
            }
            Err(e) => {
                log::warn!("状態ファイルの読み込みに失敗: {}", e);
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = StateFile {
            version: StateFile::CURRENT_VERSION,
            entries: self.entries.clone(),
        };
        let file = File::create(&self.path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &state)?;
        Ok(())
    }

    /// 全キーを削除
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }

    /// 状態の要約（`itinerary state --show`）
    pub fn summary(&self) -> StateSummary {
        StateSummary {
            location: self.get(keys::CURRENT_LOCATION),
            selection: persist::load_selection(self).len(),
            history: persist::load_history(self).len(),
            transient: keys::TRANSIENT
                .iter()
                .filter(|key| self.entries.contains_key(**key))
                .count(),
        }
    }

    fn persist(&self) -> itinerary_common::Result<()> {
        self.save()
            .map_err(|e| itinerary_common::Error::Storage(e.to_string()))
    }
}

/// 保存済み状態の件数
#[derive(Debug, Clone, PartialEq)]
pub struct StateSummary {
    pub location: Option<String>,
    pub selection: usize,
    pub history: usize,
    pub transient: usize,
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> itinerary_common::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&mut self, key: &str) -> itinerary_common::Result<()> {
        if self.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("state.json"));
        assert!(store.entries().is_empty());
    }

    #[test]
    fn test_set_persists_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut store = FileStore::open(&path);
        store.set(keys::CURRENT_LOCATION, "Lecce").unwrap();

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get(keys::CURRENT_LOCATION).as_deref(), Some("Lecce"));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileStore::open(&path);
        assert!(store.entries().is_empty());
    }

    #[test]
    fn test_summary_counts_transient() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("state.json"));
        store.set(keys::SAVE_AFTER_LOGIN, "1").unwrap();
        store.set(keys::PENDING_SEARCH, "hotel a Lecce").unwrap();
        let summary = store.summary();
        assert_eq!(summary.transient, 2);
        assert_eq!(summary.selection, 0);
        assert_eq!(summary.location, None);
    }
}
