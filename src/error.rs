use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] itinerary_common::Error),

    #[error("通信エラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error("サーバーエラー: HTTP {0}")]
    ServerStatus(u16),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ファイルが見つかりません: {0}")]
    FileNotFound(String),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("入力エラー: {0}")]
    Dialog(#[from] dialoguer::Error),

    #[error("現在地が設定されていません。先に `itinerary search` で都市を含む検索をしてください")]
    MissingLocation,
}

pub type Result<T> = std::result::Result<T, AppError>;
