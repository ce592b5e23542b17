use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "itinerary")]
#[command(about = "旅程検索ストリームのクライアント（ライブ検索・リプレイ・選択管理）", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 状態ファイル（デフォルト: データディレクトリ/sitesense/state.json）
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// バックエンドに問い合わせて検索
    Search {
        /// 問い合わせ文
        #[arg(required = true)]
        query: Vec<String>,

        /// 前回の会話を続ける
        #[arg(short = 'c', long = "continue")]
        continue_conversation: bool,

        /// 検索後に対話メニューを開く
        #[arg(short, long)]
        interactive: bool,
    },

    /// 記録済みのNDJSONストリームを再生
    Replay {
        /// NDJSONファイル
        #[arg(required = true)]
        file: PathBuf,

        /// チャンクサイズ（バイト、デフォルト: 設定値）
        #[arg(long)]
        chunk_size: Option<usize>,

        /// 検索文として扱う問い合わせ（デフォルト: ファイル名）
        #[arg(short, long)]
        query: Option<String>,

        /// 再生後に対話メニューを開く
        #[arg(short, long)]
        interactive: bool,
    },

    /// 保存済みの状態を表示・削除
    State {
        /// 状態を表示
        #[arg(long)]
        show: bool,

        /// ログイン往復の一時キーを削除
        #[arg(long)]
        clear: bool,

        /// 選択リスト・現在地・会話履歴をすべてリセット
        #[arg(long)]
        reset: bool,
    },

    /// 現在の都市の選択と提案をバックエンドに保存
    SaveCache,

    /// 保存済みプログラム（旅程）を操作
    Program {
        #[command(subcommand)]
        action: ProgramAction,
    },

    /// 設定を管理
    Config {
        /// バックエンドURLを設定
        #[arg(long)]
        set_base_url: Option<String>,

        /// ログイン済みのセッションCookieを設定（空文字で削除）
        #[arg(long)]
        set_session_cookie: Option<String>,

        /// 現在の設定を表示
        #[arg(long)]
        show: bool,
    },
}

#[derive(Subcommand)]
pub enum ProgramAction {
    /// 現在の選択を旅程として保存（未ログインなら退避）
    Save,
    /// ログイン後に退避した旅程を保存
    Resume,
    /// 保存済みプログラムを読み込んで選択を置き換える
    Load {
        /// プログラムID
        id: String,
    },
    /// 保存済みプログラムを現在の選択で更新
    Update {
        /// プログラムID
        id: String,
    },
    /// 保存済みプログラムを削除
    Delete {
        /// プログラムID
        id: String,
    },
}
