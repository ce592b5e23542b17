use crate::error::{AppError, Result};
use itinerary_common::cache_sync::DEFAULT_DEBOUNCE_MS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// バックエンドURLの環境変数
pub const BASE_URL_ENV: &str = "SITESENSE_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    /// キャッシュ同期のデバウンス (ms)
    pub debounce_ms: u64,
    /// リプレイ時のチャンクサイズ（バイト）
    pub chunk_size: usize,
    pub timeout_seconds: u64,
    /// ログイン済みブラウザから写したセッションCookie（`session=...`）
    pub session_cookie: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default_config())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| AppError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("sitesense").join("config.json"))
    }

    /// 状態ファイル（選択リスト・現在地・会話履歴）の既定パス
    pub fn state_path() -> Result<PathBuf> {
        let data = dirs::data_dir()
            .ok_or_else(|| AppError::Config("データディレクトリが見つかりません".into()))?;
        Ok(data.join("sitesense").join("state.json"))
    }

    fn default_config() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            chunk_size: 64,
            timeout_seconds: 30,
            session_cookie: None,
        }
    }

    /// 実際に使うバックエンドURL
    pub fn base_url(&self) -> String {
        // 環境変数を優先
        match std::env::var(BASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => self.base_url.clone(),
        }
    }

    /// 空文字なら削除
    pub fn set_session_cookie(&mut self, cookie: &str) -> Result<()> {
        let cookie = cookie.trim();
        self.session_cookie = (!cookie.is_empty()).then(|| cookie.to_string());
        self.save()
    }

    pub fn set_base_url(&mut self, url: &str) -> Result<()> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::Config(format!("URLが不正です: {}", url)));
        }
        self.base_url = url.trim_end_matches('/').to_string();
        self.save()
    }
}
