//! 永続化（キー・バリューストア）
//!
//! ブラウザでは localStorage / sessionStorage、CLIではJSONファイルが実装を提供する。
//! コアはこのトレイト越しにのみ永続化する。

use crate::error::Result;
use crate::location::sanitize_stored_location;
use crate::types::{Activity, ChatTurn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// 永続化キー
pub mod keys {
    pub const CURRENT_LOCATION: &str = "sitesense_current_location";
    pub const MANUAL_SELECTION: &str = "manual_selection";
    pub const MESSAGE_HISTORY: &str = "message_history";

    pub const PENDING_SEARCH: &str = "pending_search";
    pub const PENDING_ITINERARY_PAYLOAD: &str = "pending_itinerary_payload";
    pub const SAVE_AFTER_LOGIN: &str = "save_after_login";
    pub const RETURN_TO_SELECTION: &str = "return_to_selection";
    pub const RESTORE_RESULTS: &str = "restore_results";

    /// ログイン往復で使う一時キー（まとめて削除する）
    pub const TRANSIENT: [&str; 5] = [
        PENDING_SEARCH,
        PENDING_ITINERARY_PAYLOAD,
        SAVE_AFTER_LOGIN,
        RETURN_TO_SELECTION,
        RESTORE_RESULTS,
    ];
}

/// 文字列キー・バリューストア
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// JSONとして読み込む（壊れた値は無視して None）
pub fn load_json<T: DeserializeOwned, S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("保存値の読込に失敗 ({}): {}", key, e);
            None
        }
    }
}

pub fn save_json<T: Serialize + ?Sized, S: KeyValueStore + ?Sized>(
    store: &mut S,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// 保存済み選択（1件ずつ読み、壊れたレコードだけを捨てる）
pub fn load_selection<S: KeyValueStore + ?Sized>(store: &S) -> Vec<Activity> {
    let records: Vec<serde_json::Value> = load_json(store, keys::MANUAL_SELECTION).unwrap_or_default();
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<Activity>(record) {
            Ok(activity) => Some(activity),
            Err(e) => {
                log::warn!("選択レコードを読めないため除外: {}", e);
                None
            }
        })
        .collect()
}

pub fn save_selection<S: KeyValueStore + ?Sized>(store: &mut S, selection: &[Activity]) -> Result<()> {
    save_json(store, keys::MANUAL_SELECTION, selection)
}

/// 保存済みロケーション（不正値は削除して None）
pub fn load_location<S: KeyValueStore + ?Sized>(store: &mut S) -> Option<String> {
    let raw = store.get(keys::CURRENT_LOCATION);
    let location = sanitize_stored_location(raw.as_deref());
    if raw.is_some() && location.is_none() {
        log::info!("保存済みロケーションが不正なため削除: {:?}", raw);
        if let Err(e) = store.remove(keys::CURRENT_LOCATION) {
            log::warn!("ロケーション削除に失敗: {}", e);
        }
    }
    location
}

pub fn save_location<S: KeyValueStore + ?Sized>(store: &mut S, location: Option<&str>) -> Result<()> {
    match location {
        Some(loc) => store.set(keys::CURRENT_LOCATION, loc),
        None => store.remove(keys::CURRENT_LOCATION),
    }
}

pub fn load_history<S: KeyValueStore + ?Sized>(store: &S) -> Vec<ChatTurn> {
    load_json(store, keys::MESSAGE_HISTORY).unwrap_or_default()
}

pub fn save_history<S: KeyValueStore + ?Sized>(store: &mut S, history: &[ChatTurn]) -> Result<()> {
    save_json(store, keys::MESSAGE_HISTORY, history)
}

/// 一時キーをまとめて削除
pub fn clear_transient<S: KeyValueStore + ?Sized>(store: &mut S) -> Result<()> {
    for key in keys::TRANSIENT {
        store.remove(key)?;
    }
    Ok(())
}

/// メモリ上のストア（テスト・CLIのリプレイ用）
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// set / remove の呼び出し回数
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self { entries, writes: 0 }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.writes += 1;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.writes += 1;
        self.entries.remove(key);
        Ok(())
    }
}
