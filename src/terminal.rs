//! 端末向けフロントエンド
//!
//! コアからの描画要求を標準出力に書き出す。ステータス行は indicatif のスピナー、
//! 距離順の並べ替え要求は直線距離で解決して後から適用する。

use indicatif::{ProgressBar, ProgressStyle};
use itinerary_common::sanitize::{content_preview, extract_cards};
use itinerary_common::{
    normalize_category, Activity, CardPlacement, CategoryResults, ChatMessage, Coordinates,
    Frontend, PageEffect, ResultPage, SyncNotice, ToolPayload,
};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct TerminalFrontend {
    spinner: Option<ProgressBar>,
    errors: Vec<String>,
    pending_reorder: Option<(Coordinates, Vec<Activity>)>,
}

impl TerminalFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// ストリーム受信中のスピナーを表示
    pub fn start_spinner(&mut self, message: &str) {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message(message.to_string());
        self.spinner = Some(spinner);
    }

    pub fn finish_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    /// 表示したエラー
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// 未処理の並べ替え要求を取り出し、距離順のID列にする
    pub fn take_reorder(&mut self) -> Option<Vec<String>> {
        let (origin, selection) = self.pending_reorder.take()?;
        Some(order_by_distance(origin, &selection))
    }

    fn line(&self, text: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(text),
            None => println!("{}", text),
        }
    }
}

impl Frontend for TerminalFrontend {
    fn status(&mut self, text: &str) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(text.to_string()),
            None => println!("… {}", text),
        }
    }

    fn error(&mut self, message: &str) {
        self.line(&format!("❌ {}", message));
        self.errors.push(message.to_string());
    }

    fn intro_content(&mut self, html: &str) {
        self.line(&format!("\n📝 {}\n", content_preview(html)));
    }

    fn category_section(&mut self, page: ResultPage, category: &str, results: &CategoryResults) {
        let count = match results {
            CategoryResults::Html(html) => extract_cards(html, Some(category)).len(),
            CategoryResults::Records(records) => records.len(),
        };
        let icon = normalize_category(category).map(|c| c.icon()).unwrap_or("•");
        self.line(&format!("{} {}: {}件 → {}", icon, category, count, page.title()));
    }

    fn map_payload(&mut self, payload: &ToolPayload, selection: &[Activity]) {
        log::debug!(
            "地図ペイロード {} ({} カテゴリ, 選択 {} 件)",
            payload.tool_name,
            payload.categories.len(),
            selection.len()
        );
    }

    fn chat_message(&mut self, message: &ChatMessage) {
        let who = if message.is_user { "🙋" } else { "🤖" };
        self.line(&format!("{} {}", who, message.text));
    }

    fn clear_containers(&mut self) {
        log::debug!("結果表示をクリア");
    }

    fn location_changed(&mut self, location: &str) {
        self.line(&format!("📍 {}", location));
    }

    fn conversation_mode(&mut self, active: bool) {
        log::info!("会話モード: {}", if active { "ON" } else { "OFF" });
    }

    fn page_effect(&mut self, page: ResultPage, effect: &PageEffect) {
        match effect {
            PageEffect::ShowOverlay { label, .. } => self.line(&format!("⏳ {}...", label)),
            PageEffect::RevealMap => self.line("🗺  地図を表示"),
            other => log::debug!("{}: {:?}", page, other),
        }
    }

    fn place_suggestion(&mut self, activity: &Activity, placement: CardPlacement) {
        match placement {
            CardPlacement::Section(category) => {
                self.line(&format!("↩ {} → {}", activity.name, category.section_title()))
            }
            CardPlacement::Fallback => self.line(&format!("↩ {} → {}", activity.name, ResultPage::Suggestions.title())),
            CardPlacement::Queued => log::debug!("提案ページ未表示のため保留: {}", activity.name),
            CardPlacement::Duplicate => {}
        }
    }

    fn remove_suggestion(&mut self, place_id: &str) {
        log::debug!("提案カードを削除: {}", place_id);
    }

    fn selection_changed(&mut self, selection: &[Activity]) {
        self.line(&format!("⭐ 選択 {}件", selection.len()));
    }

    fn request_reorder(&mut self, origin: Coordinates, selection: &[Activity]) {
        self.pending_reorder = Some((origin, selection.to_vec()));
    }

    fn sync_notice(&mut self, notice: &SyncNotice) {
        let mark = if notice.ok { "✅" } else { "⚠" };
        self.line(&format!("{} {}", mark, notice.message));
    }
}

/// 2点間の大円距離 (km)
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// 起点からの距離が近い順のID列（座標のないものは末尾）
pub fn order_by_distance(origin: Coordinates, selection: &[Activity]) -> Vec<String> {
    let mut ranked: Vec<(f64, &str)> = selection
        .iter()
        .filter_map(|activity| {
            let id = activity.id()?;
            let distance = if activity.has_coordinates() {
                distance_km(origin, activity.position())
            } else {
                f64::INFINITY
            };
            Some((distance, id))
        })
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    ranked.into_iter().map(|(_, id)| id.to_string()).collect()
}
