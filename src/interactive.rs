//! 対話メニュー
//!
//! 検索結果を見ながら選択・選択解除・ページ移動を行う。

use crate::client::ApiClient;
use crate::error::Result;
use crate::program;
use crate::runner::{self, now_ms};
use crate::terminal::TerminalFrontend;
use dialoguer::Input;
use itinerary_common::{
    Activity, AppContext, CategoryHints, KeyValueStore, ResultPage, SelectionOrigin,
};

/// メニュー操作
#[derive(Debug, Clone, PartialEq)]
pub enum MenuAction {
    /// 選択リストと提案を一覧表示
    List,
    /// ページへ移動
    Page(ResultPage),
    /// 提案の n 番目を選択（1始まり）
    Select(usize),
    /// 選択の n 番目を解除（1始まり）
    Deselect(usize),
    /// 選択の n 番目の詳細を取得
    Details(usize),
    /// 都市キャッシュを今すぐ保存
    SaveCache,
    /// 選択を旅程として保存
    SaveItinerary,
    /// 続けて問い合わせ
    Search(String),
    /// 終了
    Quit,
    /// 解釈できない入力
    Invalid(String),
}

const PROMPT: &str = "操作 (l:一覧 p <ページ> s <番号>:選択 d <番号>:解除 i <番号>:詳細 c:保存 v:旅程保存 q:終了 / それ以外は問い合わせ)";

/// 入力行を操作に変換
pub fn parse_menu_action(input: &str) -> MenuAction {
    let trimmed = input.trim();
    let (command, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (trimmed, ""),
    };

    let index = |arg: &str| match arg.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    };

    match (command, arg) {
        ("" | "l", "") => MenuAction::List,
        ("q" | "Q", "") => MenuAction::Quit,
        ("c", "") => MenuAction::SaveCache,
        ("v", "") => MenuAction::SaveItinerary,
        ("p", page) => page
            .parse::<ResultPage>()
            .map(MenuAction::Page)
            .unwrap_or_else(MenuAction::Invalid),
        ("s", n) if !n.is_empty() => index(n).map_or_else(|| invalid_index(n), MenuAction::Select),
        ("d", n) if !n.is_empty() => index(n).map_or_else(|| invalid_index(n), MenuAction::Deselect),
        ("i", n) if !n.is_empty() => index(n).map_or_else(|| invalid_index(n), MenuAction::Details),
        _ => MenuAction::Search(trimmed.to_string()),
    }
}

fn invalid_index(arg: &str) -> MenuAction {
    MenuAction::Invalid(format!("番号が不正です: {:?}", arg))
}

/// 対話メニューを実行（`client` がなければオフライン）
pub async fn run_menu<S: KeyValueStore>(
    ctx: &mut AppContext<S>,
    frontend: &mut TerminalFrontend,
    client: Option<&ApiClient>,
) -> Result<()> {
    print_overview(ctx);

    loop {
        let input: String = Input::new()
            .with_prompt(PROMPT)
            .allow_empty(true)
            .interact_text()?;

        match parse_menu_action(&input) {
            MenuAction::List => print_overview(ctx),
            MenuAction::Page(page) => {
                ctx.user_navigate(page, frontend, now_ms());
                println!("→ {}", page.title());
            }
            MenuAction::Select(n) => match ctx.store().suggestions().get(n - 1).cloned() {
                Some(activity) => {
                    let origin = if ctx.pages().current() == ResultPage::Suggestions {
                        SelectionOrigin::SuggestionsPage
                    } else {
                        SelectionOrigin::SuggestionPool
                    };
                    if !ctx.select(activity, origin, frontend, now_ms())? {
                        println!("  → 選択済みです");
                    }
                }
                None => println!("  → 提案 {} はありません", n),
            },
            MenuAction::Deselect(n) => match ctx.store().selection().get(n - 1).cloned() {
                Some(activity) => {
                    let id = activity.id().unwrap_or_default().to_string();
                    let hints = CategoryHints::explicit(activity.category.as_label());
                    ctx.deselect(&id, hints, frontend, now_ms())?;
                }
                None => println!("  → 選択 {} はありません", n),
            },
            MenuAction::Details(n) => {
                let Some(client) = client else {
                    println!("  → オフラインでは詳細を取得できません");
                    continue;
                };
                match ctx.store().selection().get(n - 1).cloned() {
                    Some(activity) => show_details(client, activity).await,
                    None => println!("  → 選択 {} はありません", n),
                }
            }
            MenuAction::SaveCache => match client {
                Some(client) => {
                    runner::save_cache_now(ctx, frontend, client).await?;
                }
                None => println!("  → オフラインでは保存できません"),
            },
            MenuAction::SaveItinerary => match client {
                Some(client) => {
                    let result = program::save_itinerary(ctx, client).await?;
                    report_save(&result);
                }
                None => println!("  → オフラインでは保存できません"),
            },
            MenuAction::Search(query) => match client {
                Some(client) => {
                    runner::run_search(ctx, frontend, client, &query).await?;
                    runner::flush_sync(ctx, frontend, client).await?;
                }
                None => println!("  → オフラインでは検索できません"),
            },
            MenuAction::Quit => break,
            MenuAction::Invalid(message) => println!("  → {}", message),
        }
        runner::apply_reorder(ctx, frontend)?;
    }

    if let Some(client) = client {
        runner::flush_sync(ctx, frontend, client).await?;
    }
    Ok(())
}

fn print_overview<S: KeyValueStore>(ctx: &AppContext<S>) {
    println!(
        "\n📍 {}  |  {}",
        ctx.location().unwrap_or("-"),
        ctx.pages().current().title()
    );
    println!("⭐ La nostra selezione ({})", ctx.store().selection().len());
    for (i, activity) in ctx.store().selection().iter().enumerate() {
        println!("  {}. {}", i + 1, describe(activity));
    }
    println!("💡 Altri suggerimenti ({})", ctx.store().suggestions().len());
    for (i, activity) in ctx.store().suggestions().iter().enumerate() {
        println!("  {}. {}", i + 1, describe(activity));
    }
    println!();
}

/// 保存・更新・削除の結果を表示
pub fn report_save(result: &program::SaveResult) {
    match result {
        program::SaveResult::NothingSelected => {
            println!("  → 保存する前に少なくとも1件選択してください")
        }
        program::SaveResult::LoginRequired(url) => {
            println!("  → ログインが必要です: {}", url);
            println!("    ログイン後に `itinerary config --set-session-cookie` と `itinerary program resume` を実行");
        }
        program::SaveResult::Saved => println!("  ✅ 完了しました"),
        program::SaveResult::Rejected(error) => println!("  ❌ サーバーが拒否しました: {}", error),
    }
}

fn describe(activity: &Activity) -> String {
    let mut line = format!("{} {}", activity.category.icon(), activity.name);
    if let Some(rating) = activity.rating {
        line.push_str(&format!(" ★{:.1}", rating));
    }
    if !activity.address.is_empty() {
        line.push_str(&format!(" - {}", activity.address));
    }
    line
}

async fn show_details(client: &ApiClient, mut activity: Activity) {
    let Some(id) = activity.id().map(str::to_string) else {
        return;
    };
    match client.place_details(&id).await {
        Ok(details) => {
            if let Some(error) = &details.error {
                println!("  → {}", error);
                return;
            }
            details.enrich(&mut activity);
            println!("  {}", describe(&activity));
            if let Some(phone) = &details.formatted_phone_number {
                println!("  ☎ {}", phone);
            }
            if let Some(website) = &details.website {
                println!("  🔗 {}", website);
            }
            if let Some(hours) = &details.opening_hours {
                for line in &hours.weekday_text {
                    println!("  🕒 {}", line);
                }
            }
            println!("  🗺 {}", activity.maps_url());
        }
        Err(e) => println!("  → 詳細の取得に失敗: {}", e),
    }
}
