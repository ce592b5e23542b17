//! 画面の状態（Leptosシグナル）とコアからの描画要求

use crate::bridge;
use itinerary_common::category::display_name;
use itinerary_common::sanitize::extract_cards;
use itinerary_common::{
    normalize_category, Activity, CardPlacement, Category, CategoryResults, ChatMessage,
    Coordinates, Frontend, PageEffect, ResultPage, SyncNotice, ToolPayload,
};
use leptos::prelude::*;

/// カテゴリ欄（選択ページ・提案ページ）
#[derive(Debug, Clone, PartialEq)]
pub struct SectionView {
    pub page: ResultPage,
    pub key: String,
    pub title: String,
    pub cards: Vec<Activity>,
}

/// 画面に出すもの一式
#[derive(Clone, Copy)]
pub struct ViewSignals {
    pub status: RwSignal<Option<String>>,
    pub errors: RwSignal<Vec<String>>,
    pub intro_html: RwSignal<String>,
    pub sections: RwSignal<Vec<SectionView>>,
    pub chat: RwSignal<Vec<ChatMessage>>,
    pub location: RwSignal<Option<String>>,
    pub conversation: RwSignal<bool>,
    pub page: RwSignal<ResultPage>,
    pub overlay: RwSignal<Option<&'static str>>,
    pub selection: RwSignal<Vec<Activity>>,
    pub notice: RwSignal<Option<SyncNotice>>,
    pub searching: RwSignal<bool>,
}

impl ViewSignals {
    pub fn new() -> Self {
        Self {
            status: RwSignal::new(None),
            errors: RwSignal::new(Vec::new()),
            intro_html: RwSignal::new(String::new()),
            sections: RwSignal::new(Vec::new()),
            chat: RwSignal::new(Vec::new()),
            location: RwSignal::new(None),
            conversation: RwSignal::new(false),
            page: RwSignal::new(ResultPage::Intro),
            overlay: RwSignal::new(None),
            selection: RwSignal::new(Vec::new()),
            notice: RwSignal::new(None),
            searching: RwSignal::new(false),
        }
    }
}

/// コアの [`Frontend`] をシグナル更新に変換する
pub struct BrowserView {
    signals: ViewSignals,
    map_dirty: bool,
    pending_reorder: Option<(Coordinates, Vec<Activity>)>,
}

impl BrowserView {
    pub fn new(signals: ViewSignals) -> Self {
        Self {
            signals,
            map_dirty: false,
            pending_reorder: None,
        }
    }

    pub fn signals(&self) -> ViewSignals {
        self.signals
    }

    /// 地図の再描画が必要か（取り出すとリセット）
    pub fn take_map_dirty(&mut self) -> bool {
        std::mem::take(&mut self.map_dirty)
    }

    pub fn take_reorder(&mut self) -> Option<(Coordinates, Vec<Activity>)> {
        self.pending_reorder.take()
    }

    fn upsert_section(&self, section: SectionView) {
        self.signals.sections.update(|sections| {
            match sections
                .iter_mut()
                .find(|s| s.page == section.page && s.key == section.key)
            {
                Some(existing) => *existing = section,
                None => sections.push(section),
            }
        });
    }
}

fn section_cards(category: &str, results: &CategoryResults) -> Vec<Activity> {
    match results {
        CategoryResults::Html(html) => extract_cards(html, Some(category)),
        CategoryResults::Records(records) => records
            .iter()
            .filter_map(|record| Activity::from_record(record, Some(category)))
            .collect(),
    }
}

impl Frontend for BrowserView {
    fn status(&mut self, text: &str) {
        self.signals.status.set(Some(text.to_string()));
    }

    fn error(&mut self, message: &str) {
        let message = message.to_string();
        self.signals.errors.update(|errors| errors.push(message));
    }

    fn intro_content(&mut self, html: &str) {
        self.signals.intro_html.set(html.to_string());
    }

    fn category_section(&mut self, page: ResultPage, category: &str, results: &CategoryResults) {
        let title = match page {
            ResultPage::Selection => page.title().to_string(),
            _ => normalize_category(category)
                .map(|c| c.section_title().to_string())
                .unwrap_or_else(|| display_name(category)),
        };
        self.upsert_section(SectionView {
            page,
            key: category.to_string(),
            title,
            cards: section_cards(category, results),
        });
    }

    fn map_payload(&mut self, payload: &ToolPayload, _selection: &[Activity]) {
        log::debug!("地図ペイロード: {}", payload.tool_name);
        self.map_dirty = true;
    }

    fn chat_message(&mut self, message: &ChatMessage) {
        let message = message.clone();
        self.signals.chat.update(|chat| chat.push(message));
    }

    fn clear_containers(&mut self) {
        self.signals.intro_html.set(String::new());
        self.signals.sections.set(Vec::new());
        self.signals.errors.set(Vec::new());
    }

    fn location_changed(&mut self, location: &str) {
        self.signals.location.set(Some(location.to_string()));
    }

    fn conversation_mode(&mut self, active: bool) {
        self.signals.conversation.set(active);
    }

    fn page_effect(&mut self, _page: ResultPage, effect: &PageEffect) {
        match effect {
            PageEffect::ShowOverlay { label, .. } => self.signals.overlay.set(Some(*label)),
            PageEffect::HideOverlay => self.signals.overlay.set(None),
            PageEffect::RevealMap | PageEffect::ResizeMap => {
                self.map_dirty = true;
                bridge::refresh();
            }
            PageEffect::DrainPending | PageEffect::RequestCacheSync => {}
        }
    }

    fn place_suggestion(&mut self, activity: &Activity, placement: CardPlacement) {
        let category = match placement {
            CardPlacement::Section(category) => category,
            CardPlacement::Fallback => Category::Unclassified,
            CardPlacement::Queued | CardPlacement::Duplicate => return,
        };
        let activity = activity.clone();
        self.signals.sections.update(|sections| {
            let target = sections.iter_mut().find(|s| {
                s.page == ResultPage::Suggestions
                    && normalize_category(&s.key).unwrap_or_default() == category
            });
            match target {
                Some(section) => section.cards.push(activity),
                None => sections.push(SectionView {
                    page: ResultPage::Suggestions,
                    key: category.as_label().to_string(),
                    title: category.section_title().to_string(),
                    cards: vec![activity],
                }),
            }
        });
    }

    fn remove_suggestion(&mut self, place_id: &str) {
        self.signals.sections.update(|sections| {
            for section in sections.iter_mut().filter(|s| s.page == ResultPage::Suggestions) {
                section.cards.retain(|card| !card.has_id(place_id));
            }
        });
    }

    fn selection_changed(&mut self, selection: &[Activity]) {
        self.signals.selection.set(selection.to_vec());
        self.map_dirty = true;
    }

    fn request_reorder(&mut self, origin: Coordinates, selection: &[Activity]) {
        self.pending_reorder = Some((origin, selection.to_vec()));
    }

    fn sync_notice(&mut self, notice: &SyncNotice) {
        self.signals.notice.set(Some(notice.clone()));
    }
}
