//! SiteSense 旅程検索 CLI
//!
//! 共通コア（`itinerary_common`）をネイティブ環境で動かす:
//! HTTPのストリーミング応答・ファイル保存の状態・端末への描画。

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod interactive;
pub mod program;
pub mod runner;
pub mod storage;
pub mod terminal;
