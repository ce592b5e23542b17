//! 結果ビューのページ遷移
//!
//! `Intro → Selection → Suggestions → Map`
//!
//! - ユーザー操作による遷移が一度でもあれば自由に移動できる
//! - それまでは Intro 以外への遷移を黙って拒否する
//! - ページ進入時の副作用は [`PageEffect`] として返す
//!
//! 提案ページのカテゴリ欄がまだ描画されていないときのカード再配置は
//! [`SuggestionPlacements`] に保留し、ページ進入・新しいカテゴリ結果の到着時に流す。

use crate::category::Category;
use crate::observe::{SubscriptionId, Subscribers};
use crate::types::{Activity, ResultPage};
use std::collections::HashSet;

pub const SELECTION_OVERLAY_LABEL: &str = "carica selezione";
pub const SUGGESTIONS_OVERLAY_LABEL: &str = "carica altri suggerimenti";

/// 遷移のきっかけ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationTrigger {
    /// ナビゲーションボタンなどの明示操作
    User,
    /// スクロール送り・処理の流れによる自動遷移
    Auto,
}

/// ページ進入時の副作用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEffect {
    ShowOverlay {
        page: ResultPage,
        label: &'static str,
    },
    HideOverlay,
    DrainPending,
    RequestCacheSync,
    RevealMap,
    ResizeMap,
}

/// ページ内容の状態（オーバーレイ表示の判定用）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageContent {
    pub selection_empty: bool,
    pub suggestions_empty: bool,
}

/// 購読者への遷移通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageChange {
    pub from: ResultPage,
    pub to: ResultPage,
    pub trigger: NavigationTrigger,
}

#[derive(Debug, Default)]
pub struct PageStateMachine {
    current: ResultPage,
    user_navigated: bool,
    overlay: Option<ResultPage>,
    subscribers: Subscribers<PageChange>,
}

impl PageStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ResultPage {
        self.current
    }

    pub fn user_navigated(&self) -> bool {
        self.user_navigated
    }

    pub fn overlay(&self) -> Option<ResultPage> {
        self.overlay
    }

    pub fn mark_user_navigated(&mut self) {
        self.user_navigated = true;
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&PageChange) + 'static) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// 遷移ガード
    pub fn can_navigate(&self, target: ResultPage) -> bool {
        self.user_navigated || target == ResultPage::Intro
    }

    /// 「次のページ」
    pub fn next_page(&self) -> Option<ResultPage> {
        self.current.next()
    }

    /// ユーザー操作による遷移（以後は自由に移動可能）
    pub fn user_navigate(&mut self, target: ResultPage, content: PageContent) -> Vec<PageEffect> {
        self.mark_user_navigated();
        self.enter(target, NavigationTrigger::User, content)
    }

    /// ガード付きの遷移。拒否時は `None`（状態は変わらない）
    pub fn navigate(&mut self, target: ResultPage, content: PageContent) -> Option<Vec<PageEffect>> {
        if !self.can_navigate(target) {
            log::debug!("ページ遷移を拒否: {} → {}", self.current, target);
            return None;
        }
        Some(self.enter(target, NavigationTrigger::Auto, content))
    }

    fn enter(&mut self, target: ResultPage, trigger: NavigationTrigger, content: PageContent) -> Vec<PageEffect> {
        let from = self.current;
        self.current = target;

        let mut effects = Vec::new();
        let overlay = match target {
            ResultPage::Selection if content.selection_empty => Some(SELECTION_OVERLAY_LABEL),
            ResultPage::Suggestions if content.suggestions_empty => Some(SUGGESTIONS_OVERLAY_LABEL),
            _ => None,
        };
        match overlay {
            Some(label) => {
                self.overlay = Some(target);
                effects.push(PageEffect::ShowOverlay { page: target, label });
            }
            None => {
                if self.overlay.take().is_some()
                    || !matches!(target, ResultPage::Selection | ResultPage::Suggestions)
                {
                    effects.push(PageEffect::HideOverlay);
                }
            }
        }

        match target {
            ResultPage::Selection => effects.push(PageEffect::RequestCacheSync),
            ResultPage::Suggestions => {
                effects.push(PageEffect::DrainPending);
                effects.push(PageEffect::RequestCacheSync);
            }
            ResultPage::Map => {
                effects.push(PageEffect::RevealMap);
                effects.push(PageEffect::ResizeMap);
            }
            ResultPage::Intro => {}
        }

        if from != target {
            log::debug!("ページ遷移: {} → {} ({:?})", from, target, trigger);
            self.subscribers.notify(&PageChange { from, to: target, trigger });
        }
        effects
    }

    /// ページの内容が届いた: そのページのオーバーレイなら隠す
    pub fn content_arrived(&mut self, page: ResultPage) -> Option<PageEffect> {
        if self.overlay == Some(page) {
            self.overlay = None;
            return Some(PageEffect::HideOverlay);
        }
        None
    }

    /// 新しい検索・セッションリセット
    pub fn reset(&mut self) -> Vec<PageEffect> {
        let from = self.current;
        self.current = ResultPage::Intro;
        self.user_navigated = false;
        let mut effects = Vec::new();
        if self.overlay.take().is_some() {
            effects.push(PageEffect::HideOverlay);
        }
        if from != ResultPage::Intro {
            self.subscribers.notify(&PageChange {
                from,
                to: ResultPage::Intro,
                trigger: NavigationTrigger::Auto,
            });
        }
        effects
    }
}

/// 提案ページへのカード配置先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPlacement {
    /// 該当カテゴリ欄
    Section(Category),
    /// 「Altri suggerimenti」欄
    Fallback,
    /// 提案ページ未描画のため保留
    Queued,
    /// 既に配置済み
    Duplicate,
}

/// 提案ページのカテゴリ欄の描画状況と保留キュー
#[derive(Debug, Default)]
pub struct SuggestionPlacements {
    page_ready: bool,
    sections: HashSet<Category>,
    placed: HashSet<String>,
    pending: Vec<Activity>,
}

impl SuggestionPlacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_ready(&self) -> bool {
        self.page_ready
    }

    pub fn pending(&self) -> &[Activity] {
        &self.pending
    }

    pub fn has_section(&self, category: Category) -> bool {
        self.sections.contains(&category)
    }

    /// 提案ページが描画された
    pub fn mark_page_ready(&mut self) {
        self.page_ready = true;
    }

    /// カテゴリ欄が描画された（提案ページも描画済みとみなす）
    pub fn mark_section_rendered(&mut self, category: Category) {
        self.page_ready = true;
        if category.is_classified() {
            self.sections.insert(category);
        }
    }

    /// サーバ描画のカードを配置済みとして記録
    pub fn record_placed(&mut self, place_id: &str) {
        self.placed.insert(place_id.to_string());
    }

    /// カードが提案ページから取り除かれた
    pub fn card_removed(&mut self, place_id: &str) {
        self.placed.remove(place_id);
        self.pending.retain(|a| !a.has_id(place_id));
    }

    fn target_for(&self, activity: &Activity) -> Option<CardPlacement> {
        if self.sections.contains(&activity.category) {
            Some(CardPlacement::Section(activity.category))
        } else if self.page_ready {
            Some(CardPlacement::Fallback)
        } else {
            None
        }
    }

    /// カードを配置（できなければ保留）
    pub fn place(&mut self, activity: Activity) -> CardPlacement {
        let Some(id) = activity.id().map(str::to_string) else {
            return CardPlacement::Duplicate;
        };
        if self.placed.contains(&id) {
            return CardPlacement::Duplicate;
        }
        match self.target_for(&activity) {
            Some(placement) => {
                self.placed.insert(id);
                placement
            }
            None => {
                if !self.pending.iter().any(|a| a.has_id(&id)) {
                    log::debug!("提案ページ未描画のため保留: {}", id);
                    self.pending.push(activity);
                }
                CardPlacement::Queued
            }
        }
    }

    /// 保留中のカードを配置できる分だけ取り出す（配置済みIDは捨てる）
    pub fn drain(&mut self) -> Vec<(Activity, CardPlacement)> {
        let pending = std::mem::take(&mut self.pending);
        let mut placed = Vec::new();
        for activity in pending {
            let Some(id) = activity.id().map(str::to_string) else {
                continue;
            };
            if self.placed.contains(&id) {
                continue;
            }
            match self.target_for(&activity) {
                Some(placement) => {
                    self.placed.insert(id);
                    placed.push((activity, placement));
                }
                None => self.pending.push(activity),
            }
        }
        placed
    }

    /// 新しい検索で提案ページが空になった
    pub fn clear(&mut self) {
        self.page_ready = false;
        self.sections.clear();
        self.placed.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn empty() -> PageContent {
        PageContent {
            selection_empty: true,
            suggestions_empty: true,
        }
    }

    fn filled() -> PageContent {
        PageContent::default()
    }

    #[test]
    fn test_navigation_guard() {
        let mut pages = PageStateMachine::new();
        assert_eq!(pages.navigate(ResultPage::Selection, filled()), None);
        assert_eq!(pages.current(), ResultPage::Intro);

        // Intro は常に到達可能
        assert!(pages.navigate(ResultPage::Intro, filled()).is_some());

        pages.user_navigate(ResultPage::Selection, filled());
        assert_eq!(pages.current(), ResultPage::Selection);
        for target in [ResultPage::Map, ResultPage::Intro, ResultPage::Suggestions] {
            assert!(pages.navigate(target, filled()).is_some());
            assert_eq!(pages.current(), target);
        }
    }

    #[test]
    fn test_selection_entry_effects() {
        let mut pages = PageStateMachine::new();
        let effects = pages.user_navigate(ResultPage::Selection, empty());
        assert_eq!(
            effects,
            vec![
                PageEffect::ShowOverlay {
                    page: ResultPage::Selection,
                    label: SELECTION_OVERLAY_LABEL
                },
                PageEffect::RequestCacheSync
            ]
        );
        assert_eq!(pages.overlay(), Some(ResultPage::Selection));
    }

    #[test]
    fn test_suggestions_entry_drains_and_syncs() {
        let mut pages = PageStateMachine::new();
        let effects = pages.user_navigate(ResultPage::Suggestions, filled());
        assert!(effects.contains(&PageEffect::DrainPending));
        assert!(effects.contains(&PageEffect::RequestCacheSync));
        assert!(!effects.iter().any(|e| matches!(e, PageEffect::ShowOverlay { .. })));
    }

    #[test]
    fn test_leaving_overlay_page_hides_overlay() {
        let mut pages = PageStateMachine::new();
        pages.user_navigate(ResultPage::Suggestions, empty());
        let effects = pages.user_navigate(ResultPage::Map, empty());
        assert_eq!(
            effects,
            vec![PageEffect::HideOverlay, PageEffect::RevealMap, PageEffect::ResizeMap]
        );
        assert_eq!(pages.overlay(), None);
    }

    #[test]
    fn test_overlay_hides_when_content_arrives() {
        let mut pages = PageStateMachine::new();
        pages.user_navigate(ResultPage::Selection, empty());
        assert_eq!(pages.content_arrived(ResultPage::Suggestions), None);
        assert_eq!(pages.content_arrived(ResultPage::Selection), Some(PageEffect::HideOverlay));
        assert_eq!(pages.content_arrived(ResultPage::Selection), None);
    }

    #[test]
    fn test_next_page() {
        let mut pages = PageStateMachine::new();
        assert_eq!(pages.next_page(), Some(ResultPage::Selection));
        pages.user_navigate(ResultPage::Map, filled());
        assert_eq!(pages.next_page(), None);
    }

    #[test]
    fn test_page_change_notifications() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut pages = PageStateMachine::new();
        pages.subscribe(move |c| sink.borrow_mut().push((c.from, c.to)));

        pages.navigate(ResultPage::Map, filled());
        pages.user_navigate(ResultPage::Map, filled());
        pages.user_navigate(ResultPage::Map, filled());
        pages.reset();

        assert_eq!(
            *seen.borrow(),
            vec![
                (ResultPage::Intro, ResultPage::Map),
                (ResultPage::Map, ResultPage::Intro)
            ]
        );
        assert!(!pages.user_navigated());
    }

    fn cat_act(id: &str, category: Category) -> Activity {
        let mut a = Activity::new(id, id);
        a.category = category;
        a
    }

    #[test]
    fn test_place_queues_until_page_ready() {
        let mut placements = SuggestionPlacements::new();
        assert_eq!(placements.place(cat_act("w1", Category::Wine)), CardPlacement::Queued);
        assert_eq!(placements.place(cat_act("w1", Category::Wine)), CardPlacement::Queued);
        assert_eq!(placements.pending().len(), 1);

        placements.mark_section_rendered(Category::Wine);
        let drained = placements.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1, CardPlacement::Section(Category::Wine));
        assert!(placements.pending().is_empty());
    }

    #[test]
    fn test_place_fallback_section() {
        let mut placements = SuggestionPlacements::new();
        placements.mark_section_rendered(Category::Lodging);
        assert_eq!(placements.place(cat_act("d1", Category::Sweets)), CardPlacement::Fallback);
        assert_eq!(
            placements.place(cat_act("h1", Category::Lodging)),
            CardPlacement::Section(Category::Lodging)
        );
        assert_eq!(placements.place(cat_act("h1", Category::Lodging)), CardPlacement::Duplicate);
    }

    #[test]
    fn test_drain_suppresses_duplicates() {
        let mut placements = SuggestionPlacements::new();
        placements.place(cat_act("a", Category::Dining));
        // サーバ描画で同じカードが先に届いた
        placements.record_placed("a");
        placements.mark_page_ready();
        assert!(placements.drain().is_empty());
        assert!(placements.pending().is_empty());
    }

    #[test]
    fn test_card_removed_allows_replacement() {
        let mut placements = SuggestionPlacements::new();
        placements.mark_page_ready();
        assert_eq!(placements.place(cat_act("a", Category::Dining)), CardPlacement::Fallback);
        placements.card_removed("a");
        assert_eq!(placements.place(cat_act("a", Category::Dining)), CardPlacement::Fallback);
    }

    #[test]
    fn test_clear() {
        let mut placements = SuggestionPlacements::new();
        placements.mark_section_rendered(Category::Wine);
        placements.place(cat_act("w", Category::Wine));
        placements.clear();
        assert!(!placements.page_ready());
        assert!(!placements.has_section(Category::Wine));
        assert_eq!(placements.place(cat_act("w", Category::Wine)), CardPlacement::Queued);
    }
}
