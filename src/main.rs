use clap::Parser;
use itinerary_common::{AppContext, ContextConfig};
use sitesense_itinerary::{cli, client, config, error, interactive, program, runner, storage, terminal};
use cli::{Cli, Commands, ProgramAction};
use client::ApiClient;
use config::Config;
use error::{AppError, Result};
use runner::StreamEnd;
use storage::FileStore;
use terminal::TerminalFrontend;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut config = Config::load()?;

    let state_path = match cli.state {
        Some(path) => path,
        None => Config::state_path()?,
    };

    match cli.command {
        Commands::Search { query, continue_conversation, interactive } => {
            let query = query.join(" ");
            println!("🔎 itinerary - 検索\n");

            let client = ApiClient::new(&config)?;
            let mut ctx = open_context(&state_path, &config);
            let mut frontend = TerminalFrontend::new();
            if continue_conversation {
                ctx.set_conversation_mode(true, &mut frontend);
            }

            let end = runner::run_search(&mut ctx, &mut frontend, &client, &query).await?;
            report_end(&end, &frontend);
            runner::flush_sync(&mut ctx, &mut frontend, &client).await?;

            if interactive {
                interactive::run_menu(&mut ctx, &mut frontend, Some(&client)).await?;
            }
        }

        Commands::Replay { file, chunk_size, query, interactive } => {
            println!("⏯ itinerary - リプレイ\n");
            if !file.exists() {
                return Err(AppError::FileNotFound(file.display().to_string()));
            }
            let content = std::fs::read(&file)?;
            let query = query.unwrap_or_else(|| {
                file.file_stem()
                    .map(|stem| stem.to_string_lossy().replace(['_', '-'], " "))
                    .unwrap_or_default()
            });
            let chunk_size = chunk_size.unwrap_or(config.chunk_size);

            let mut ctx = open_context(&state_path, &config);
            let mut frontend = TerminalFrontend::new();
            let end = runner::replay(&mut ctx, &mut frontend, &query, &content, chunk_size).await?;
            runner::apply_reorder(&mut ctx, &mut frontend)?;
            report_end(&end, &frontend);
            if let StreamEnd::Resubmit(next) = &end {
                println!("↻ 再検索の要求: {} (リプレイでは送信しません)", next);
            }

            if interactive {
                interactive::run_menu(&mut ctx, &mut frontend, None).await?;
            }
        }

        Commands::State { show, clear, reset } => {
            if reset {
                let mut ctx = open_context(&state_path, &config);
                ctx.reset(&mut TerminalFrontend::new())?;
                println!("✔ 状態をリセットしました");
            } else if clear {
                let mut ctx = open_context(&state_path, &config);
                ctx.clear_transient()?;
                println!("✔ 一時キーを削除しました");
            }

            if show || !(clear || reset) {
                let store = FileStore::open(&state_path);
                let summary = store.summary();
                println!("状態ファイル: {}", store.path().display());
                println!("  現在地:     {}", summary.location.as_deref().unwrap_or("(未設定)"));
                println!("  選択:       {}件", summary.selection);
                println!("  会話履歴:   {}件", summary.history);
                println!("  一時キー:   {}件", summary.transient);
            }
        }

        Commands::SaveCache => {
            let client = ApiClient::new(&config)?;
            let mut ctx = open_context(&state_path, &config);
            if ctx.location().is_none() {
                return Err(AppError::MissingLocation);
            }
            let mut frontend = TerminalFrontend::new();
            if runner::save_cache_now(&mut ctx, &mut frontend, &client).await? {
                println!("✅ {}", ctx.location().unwrap_or_default());
            }
        }

        Commands::Program { action } => {
            let client = ApiClient::new(&config)?;
            let mut ctx = open_context(&state_path, &config);
            let mut frontend = TerminalFrontend::new();
            match action {
                ProgramAction::Save => {
                    let result = program::save_itinerary(&mut ctx, &client).await?;
                    interactive::report_save(&result);
                }
                ProgramAction::Resume => match program::resume_pending_save(&mut ctx, &client).await? {
                    Some(result) => interactive::report_save(&result),
                    None => println!("退避した旅程はありません"),
                },
                ProgramAction::Load { id } => {
                    if program::load_program(&mut ctx, &mut frontend, &client, &id).await? {
                        runner::apply_reorder(&mut ctx, &mut frontend)?;
                        println!(
                            "✅ {} ({}件)",
                            ctx.location().unwrap_or("-"),
                            ctx.store().selection().len()
                        );
                    }
                }
                ProgramAction::Update { id } => {
                    let result = program::update_program(&mut ctx, &client, &id).await?;
                    interactive::report_save(&result);
                }
                ProgramAction::Delete { id } => {
                    let result = program::delete_program(&client, &id).await?;
                    interactive::report_save(&result);
                }
            }
        }

        Commands::Config { set_base_url, set_session_cookie, show } => {
            if let Some(url) = set_base_url {
                config.set_base_url(&url)?;
                println!("✔ バックエンドURLを設定しました");
            }
            if let Some(cookie) = set_session_cookie {
                config.set_session_cookie(&cookie)?;
                println!("✔ セッションCookieを設定しました");
            }

            if show {
                println!("設定ファイル: {}", Config::config_path()?.display());
                println!("バックエンドURL: {}", config.base_url());
                println!("デバウンス: {}ms", config.debounce_ms);
                println!("チャンクサイズ: {}バイト", config.chunk_size);
                println!("タイムアウト: {}秒", config.timeout_seconds);
                println!("セッションCookie: {}", if config.session_cookie.is_some() { "設定済み" } else { "なし" });
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn open_context(state_path: &std::path::Path, config: &Config) -> AppContext<FileStore> {
    let store = FileStore::open(state_path);
    AppContext::new(
        store,
        ContextConfig {
            sync_debounce_ms: config.debounce_ms,
        },
    )
}

fn report_end(end: &StreamEnd, frontend: &TerminalFrontend) {
    match end {
        StreamEnd::Finished if frontend.errors().is_empty() => println!("\n✅ 検索完了"),
        StreamEnd::Finished => println!("\n⚠ 検索完了（エラー {}件）", frontend.errors().len()),
        StreamEnd::Resubmit(_) | StreamEnd::Stopped => println!("\n⏹ ストリームを打ち切りました"),
        StreamEnd::Aborted => println!("\n⏹ 中断しました"),
        StreamEnd::Failed => println!("\n❌ 検索に失敗しました"),
    }
}
