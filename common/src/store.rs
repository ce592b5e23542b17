//! 選択リストと提案プール
//!
//! 不変条件:
//! - 同じ place_id が選択リストと提案プールの両方に存在しない
//! - 変更のたびに永続化が要求される（再読込で選択リストを復元できる）
//! - 座標の欠落で操作が失敗しない
//!
//! 操作は同期的に処理され、購読者への通知はデータ更新の完了後に行う。
//! 永続化・キャッシュ同期・距離順並べ替えは [`StoreOutcome`] として呼び出し側へ返す。

use crate::category::{infer_category, CategoryHints};
use crate::observe::{SubscriptionId, Subscribers};
use crate::types::{Activity, Coordinates};

/// 選択操作の発生元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOrigin {
    /// 提案プールのカード
    SuggestionPool,
    /// 提案ページ（サーバ描画のカード）
    SuggestionsPage,
    /// 選択ページ・その他
    Other,
}

/// ストアへのコマンド
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Select {
        activity: Activity,
        origin: SelectionOrigin,
    },
    Deselect {
        place_id: String,
        hints: CategoryHints,
    },
    AbsorbSuggestions(Vec<Activity>),
    ImportExternalSelection(Vec<Activity>),
    ReorderSelection(Vec<String>),
    /// 保存済みプログラムの店舗で置き換える
    ReplaceSelection(Vec<Activity>),
    Reset,
}

/// 購読者への変更通知
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Selected(Activity),
    Deselected {
        activity: Activity,
        returned_to_pool: bool,
    },
    /// 提案ページのカードを取り除く
    SuggestionCardRemoved(String),
    SuggestionsAdded(Vec<Activity>),
    SelectionImported(ImportReport),
    Reordered,
    Replaced(usize),
    Reset,
}

/// 外部選択の取り込み結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub duplicates: usize,
    /// place_id のないレコード
    pub rejected: usize,
    /// 既に取り込み済みのため何もしなかった
    pub already_imported: bool,
}

/// コマンド処理の結果（呼び出し側が適用する副作用）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreOutcome {
    pub changed: bool,
    /// 選択リストの永続化が必要
    pub persist: bool,
    /// キャッシュ同期を要求
    pub request_sync: bool,
    /// 距離順並べ替えの起点（選択リスト先頭）
    pub reorder_origin: Option<Coordinates>,
    /// 提案ページへ戻すカード
    pub returned: Option<Activity>,
    pub import: Option<ImportReport>,
}

impl StoreOutcome {
    fn unchanged() -> Self {
        Self::default()
    }

    fn selection_changed() -> Self {
        Self {
            changed: true,
            persist: true,
            request_sync: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct ActivityStore {
    selection: Vec<Activity>,
    suggestions: Vec<Activity>,
    external_imported: bool,
    subscribers: Subscribers<StoreChange>,
}

impl ActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 永続化済みの選択リストから復元（IDなし・重複は捨てる）
    pub fn with_selection(records: Vec<Activity>) -> Self {
        let mut store = Self::new();
        for record in records {
            let Some(id) = record.id() else {
                continue;
            };
            if !store.is_selected(id) {
                store.selection.push(record);
            }
        }
        store
    }

    pub fn selection(&self) -> &[Activity] {
        &self.selection
    }

    pub fn suggestions(&self) -> &[Activity] {
        &self.suggestions
    }

    pub fn is_selected(&self, place_id: &str) -> bool {
        self.selection.iter().any(|a| a.has_id(place_id))
    }

    pub fn in_pool(&self, place_id: &str) -> bool {
        self.suggestions.iter().any(|a| a.has_id(place_id))
    }

    pub fn find(&self, place_id: &str) -> Option<&Activity> {
        self.selection
            .iter()
            .chain(self.suggestions.iter())
            .find(|a| a.has_id(place_id))
    }

    pub fn external_imported(&self) -> bool {
        self.external_imported
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&StoreChange) + 'static) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// コマンドを処理
    pub fn apply(&mut self, command: StoreCommand) -> StoreOutcome {
        match command {
            StoreCommand::Select { activity, origin } => self.select_activity(activity, origin),
            StoreCommand::Deselect { place_id, hints } => self.deselect_activity(&place_id, hints),
            StoreCommand::AbsorbSuggestions(records) => self.absorb_suggestions(records),
            StoreCommand::ImportExternalSelection(records) => self.import_external_selection(records),
            StoreCommand::ReorderSelection(ids) => self.replace_order(&ids),
            StoreCommand::ReplaceSelection(records) => self.replace_selection(records),
            StoreCommand::Reset => self.reset(),
        }
    }

    fn reorder_origin(&self) -> Option<Coordinates> {
        self.selection.first().map(Activity::position)
    }

    /// 選択リストへ追加
    ///
    /// IDなし・選択済みなら何もしない。提案プールにあれば取り除く。
    pub fn select_activity(&mut self, activity: Activity, origin: SelectionOrigin) -> StoreOutcome {
        let Some(id) = activity.id().map(str::to_string) else {
            log::warn!("place_id のないアクティビティは選択できません: {}", activity.name);
            return StoreOutcome::unchanged();
        };
        if self.is_selected(&id) {
            log::debug!("選択済みのため無視: {}", id);
            return StoreOutcome::unchanged();
        }

        let pool_len = self.suggestions.len();
        self.suggestions.retain(|a| !a.has_id(&id));
        let removed_from_pool = self.suggestions.len() != pool_len;
        self.selection.push(activity.clone());
        log::info!("選択に追加: {} ({})", activity.name, id);

        self.subscribers.notify(&StoreChange::Selected(activity));
        if removed_from_pool
            || matches!(origin, SelectionOrigin::SuggestionPool | SelectionOrigin::SuggestionsPage)
        {
            self.subscribers.notify(&StoreChange::SuggestionCardRemoved(id));
        }

        StoreOutcome {
            reorder_origin: self.reorder_origin(),
            ..StoreOutcome::selection_changed()
        }
    }

    /// 選択リストから除去し、提案プールへ戻す
    pub fn deselect_activity(&mut self, place_id: &str, hints: CategoryHints) -> StoreOutcome {
        let Some(index) = self.selection.iter().position(|a| a.has_id(place_id)) else {
            log::debug!("選択にないため無視: {}", place_id);
            return StoreOutcome::unchanged();
        };
        let mut activity = self.selection.remove(index);

        let explicit = hints.explicit.clone().or_else(|| {
            activity
                .category
                .is_classified()
                .then(|| activity.category.as_label().to_string())
        });
        activity.category = infer_category(&CategoryHints {
            explicit,
            name: activity.name.clone(),
            address: activity.address.clone(),
            ..hints
        });

        let returned_to_pool = !self.in_pool(place_id);
        if returned_to_pool {
            self.suggestions.push(activity.clone());
        }
        log::info!("選択から除去: {} ({})", activity.name, place_id);

        self.subscribers.notify(&StoreChange::Deselected {
            activity: activity.clone(),
            returned_to_pool,
        });

        StoreOutcome {
            returned: returned_to_pool.then_some(activity),
            ..StoreOutcome::selection_changed()
        }
    }

    /// 提案ページのレコードをプールへ（選択済み・重複・IDなしは除外）
    pub fn absorb_suggestions(&mut self, records: Vec<Activity>) -> StoreOutcome {
        let mut added = Vec::new();
        for record in records {
            let Some(id) = record.id() else {
                continue;
            };
            if self.is_selected(id) || self.in_pool(id) {
                continue;
            }
            self.suggestions.push(record.clone());
            added.push(record);
        }
        if added.is_empty() {
            return StoreOutcome::unchanged();
        }
        log::debug!("提案プールに {} 件追加", added.len());
        self.subscribers.notify(&StoreChange::SuggestionsAdded(added));
        StoreOutcome {
            changed: true,
            ..Default::default()
        }
    }

    /// サーバ描画の「おすすめ」を選択リストへ取り込む（ページ読込ごとに一度だけ）
    pub fn import_external_selection(&mut self, records: Vec<Activity>) -> StoreOutcome {
        if self.external_imported {
            return StoreOutcome {
                import: Some(ImportReport {
                    already_imported: true,
                    ..Default::default()
                }),
                ..Default::default()
            };
        }
        self.external_imported = true;

        let mut report = ImportReport::default();
        for record in records {
            let Some(id) = record.id().map(str::to_string) else {
                log::warn!("place_id のないカードを除外: {}", record.name);
                report.rejected += 1;
                continue;
            };
            if self.is_selected(&id) {
                report.duplicates += 1;
                continue;
            }
            if !record.has_coordinates() {
                log::warn!("座標のないカード、フォールバック位置を使用: {}", id);
            }
            self.suggestions.retain(|a| !a.has_id(&id));
            self.selection.push(record);
            report.added += 1;
        }
        log::info!(
            "外部選択の取り込み: 追加 {} / 重複 {} / 除外 {}",
            report.added,
            report.duplicates,
            report.rejected
        );

        self.subscribers
            .notify(&StoreChange::SelectionImported(report.clone()));
        if report.added == 0 {
            return StoreOutcome {
                import: Some(report),
                ..Default::default()
            };
        }
        StoreOutcome {
            import: Some(report),
            reorder_origin: self.reorder_origin(),
            ..StoreOutcome::selection_changed()
        }
    }

    /// 外部の距離計算による並べ替え
    ///
    /// 未知のIDは無視し、指定されなかった要素は元の順で末尾に残す。
    pub fn replace_order(&mut self, ids: &[String]) -> StoreOutcome {
        let before = self.selection_ids();
        let mut remaining = std::mem::take(&mut self.selection);
        let mut ordered = Vec::with_capacity(remaining.len());
        for id in ids {
            if let Some(pos) = remaining.iter().position(|a| a.has_id(id)) {
                ordered.push(remaining.remove(pos));
            }
        }
        ordered.extend(remaining);
        self.selection = ordered;

        if self.selection_ids() == before {
            return StoreOutcome::unchanged();
        }
        self.subscribers.notify(&StoreChange::Reordered);
        StoreOutcome {
            changed: true,
            persist: true,
            ..Default::default()
        }
    }

    /// 選択リストをまるごと置き換える（IDなし・重複は除外、提案プールからは取り除く）
    pub fn replace_selection(&mut self, records: Vec<Activity>) -> StoreOutcome {
        let before = self.selection_ids();
        let mut selection: Vec<Activity> = Vec::with_capacity(records.len());
        for record in records {
            let Some(id) = record.id() else {
                log::warn!("place_id のない店舗を除外: {}", record.name);
                continue;
            };
            if !selection.iter().any(|a| a.has_id(id)) {
                selection.push(record);
            }
        }
        self.suggestions
            .retain(|s| !s.id().is_some_and(|id| selection.iter().any(|a| a.has_id(id))));
        self.selection = selection;

        if self.selection_ids() == before {
            return StoreOutcome::unchanged();
        }
        log::info!("選択を置き換え: {} 件", self.selection.len());
        self.subscribers.notify(&StoreChange::Replaced(self.selection.len()));
        StoreOutcome {
            reorder_origin: self.reorder_origin(),
            ..StoreOutcome::selection_changed()
        }
    }

    fn selection_ids(&self) -> Vec<Option<String>> {
        self.selection
            .iter()
            .map(|a| a.id().map(str::to_string))
            .collect()
    }

    /// 明示的なセッションリセット
    pub fn reset(&mut self) -> StoreOutcome {
        self.selection.clear();
        self.suggestions.clear();
        self.external_imported = false;
        self.subscribers.notify(&StoreChange::Reset);
        StoreOutcome {
            changed: true,
            persist: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn act(id: &str, name: &str) -> Activity {
        Activity::new(id, name)
    }

    fn assert_disjoint(store: &ActivityStore) {
        for a in store.selection() {
            let id = a.id().unwrap();
            assert!(!store.in_pool(id), "{} が両方に存在", id);
        }
    }

    #[test]
    fn test_select_appends_and_requests_effects() {
        let mut store = ActivityStore::new();
        let outcome = store.select_activity(act("p1", "Osteria"), SelectionOrigin::Other);
        assert!(outcome.changed);
        assert!(outcome.persist);
        assert!(outcome.request_sync);
        assert_eq!(outcome.reorder_origin, Some(Coordinates::FALLBACK));
        assert_eq!(store.selection().len(), 1);
    }

    #[test]
    fn test_duplicate_select_is_noop() {
        let mut store = ActivityStore::new();
        store.select_activity(act("p1", "Osteria"), SelectionOrigin::Other);
        let outcome = store.select_activity(act("p1", "Osteria"), SelectionOrigin::SuggestionPool);
        assert_eq!(outcome, StoreOutcome::default());
        assert!(!outcome.persist);
        assert_eq!(store.selection().len(), 1);
    }

    #[test]
    fn test_select_without_id_is_noop() {
        let mut store = ActivityStore::new();
        let outcome = store.select_activity(Activity::default(), SelectionOrigin::Other);
        assert!(!outcome.changed);
        assert!(store.selection().is_empty());
    }

    #[test]
    fn test_select_from_pool_removes_suggestion() {
        let mut store = ActivityStore::new();
        store.absorb_suggestions(vec![act("p1", "Enoteca"), act("p2", "Hotel")]);

        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = changes.clone();
        store.subscribe(move |c| sink.borrow_mut().push(c.clone()));

        store.select_activity(act("p1", "Enoteca"), SelectionOrigin::SuggestionPool);
        assert!(!store.in_pool("p1"));
        assert!(store.in_pool("p2"));
        assert_disjoint(&store);

        let changes = changes.borrow();
        assert!(matches!(changes[0], StoreChange::Selected(_)));
        assert_eq!(changes[1], StoreChange::SuggestionCardRemoved("p1".into()));
    }

    #[test]
    fn test_deselect_absent_is_noop() {
        let mut store = ActivityStore::new();
        let outcome = store.deselect_activity("missing", CategoryHints::default());
        assert_eq!(outcome, StoreOutcome::default());
    }

    #[test]
    fn test_select_deselect_roundtrip() {
        let mut store = ActivityStore::new();
        let mut record = act("w1", "Cantina Due Palme");
        record.address = "Cellino San Marco".into();
        store.select_activity(record, SelectionOrigin::Other);

        let outcome = store.deselect_activity("w1", CategoryHints::default());
        assert!(outcome.persist);
        assert!(store.selection().is_empty());
        assert!(store.in_pool("w1"));
        // 店名からワインと推定
        let returned = outcome.returned.unwrap();
        assert_eq!(returned.category, Category::Wine);
        assert_disjoint(&store);
    }

    #[test]
    fn test_deselect_category_priority_uses_hints() {
        let mut store = ActivityStore::new();
        store.select_activity(act("x", "Hotel Roma"), SelectionOrigin::Other);
        let hints = CategoryHints {
            label_text: Some("Pasticcerie".into()),
            ..Default::default()
        };
        let outcome = store.deselect_activity("x", hints);
        assert_eq!(outcome.returned.unwrap().category, Category::Sweets);
    }

    #[test]
    fn test_deselect_keeps_record_category() {
        let mut store = ActivityStore::new();
        let mut record = act("x", "Da Nonna");
        record.category = Category::Dining;
        store.select_activity(record, SelectionOrigin::Other);
        let outcome = store.deselect_activity(
            "x",
            CategoryHints {
                section: Some("hotels-section".into()),
                ..Default::default()
            },
        );
        assert_eq!(outcome.returned.unwrap().category, Category::Dining);
    }

    #[test]
    fn test_absorb_skips_selected_and_duplicates() {
        let mut store = ActivityStore::new();
        store.select_activity(act("a", "A"), SelectionOrigin::Other);
        let outcome = store.absorb_suggestions(vec![
            act("a", "A"),
            act("b", "B"),
            act("b", "B bis"),
            Activity::default(),
        ]);
        assert!(outcome.changed);
        assert_eq!(store.suggestions().len(), 1);
        assert_disjoint(&store);

        assert!(!store.absorb_suggestions(vec![act("b", "B")]).changed);
    }

    #[test]
    fn test_import_external_selection_once() {
        let mut store = ActivityStore::new();
        store.absorb_suggestions(vec![act("s1", "Sel 1")]);
        let outcome = store.import_external_selection(vec![
            act("s1", "Sel 1"),
            act("s2", "Sel 2"),
            act("s2", "Sel 2 dup"),
            Activity::default(),
        ]);
        let report = outcome.import.unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.rejected, 1);
        assert!(outcome.persist);
        assert_disjoint(&store);

        let second = store.import_external_selection(vec![act("s3", "Sel 3")]);
        assert!(second.import.unwrap().already_imported);
        assert_eq!(store.selection().len(), 2);
    }

    #[test]
    fn test_replace_order() {
        let mut store = ActivityStore::with_selection(vec![act("a", "A"), act("b", "B"), act("c", "C")]);
        let outcome = store.replace_order(&["c".to_string(), "zzz".to_string(), "a".to_string()]);
        assert!(outcome.persist);
        let ids: Vec<_> = store.selection().iter().map(|a| a.id().unwrap()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let again = store.replace_order(&["c".to_string(), "a".to_string()]);
        assert!(!again.changed);
    }

    #[test]
    fn test_with_selection_drops_invalid_records() {
        let store = ActivityStore::with_selection(vec![act("a", "A"), act("a", "A2"), Activity::default()]);
        assert_eq!(store.selection().len(), 1);
    }

    #[test]
    fn test_reset_clears_and_rearms_import() {
        let mut store = ActivityStore::new();
        store.import_external_selection(vec![act("a", "A")]);
        store.absorb_suggestions(vec![act("b", "B")]);
        store.reset();
        assert!(store.selection().is_empty());
        assert!(store.suggestions().is_empty());
        assert!(!store.external_imported());
    }

    #[test]
    fn test_replace_selection() {
        let mut store = ActivityStore::with_selection(vec![act("a", "A")]);
        store.absorb_suggestions(vec![act("b", "B"), act("c", "C")]);
        let outcome = store.replace_selection(vec![act("b", "B"), act("b", "B2"), Activity::default(), act("d", "D")]);
        assert!(outcome.persist);
        assert_eq!(outcome.reorder_origin, Some(Coordinates::FALLBACK));
        assert_eq!(ids_of(store.selection()), vec!["b", "d"]);
        assert_eq!(ids_of(store.suggestions()), vec!["c"]);
        assert_disjoint(&store);

        let again = store.replace_selection(vec![act("b", "B"), act("d", "D")]);
        assert!(!again.changed);
    }

    fn command_strategy() -> impl Strategy<Value = StoreCommand> {
        let id = prop::sample::select(vec!["a", "b", "c", "d", "e"]);
        let ids = prop::collection::vec(id.clone(), 0..4);
        let records = |ids: Vec<&str>| ids.into_iter().map(|id| act(id, id)).collect::<Vec<_>>();
        prop_oneof![
            id.clone().prop_map(|id| StoreCommand::Select {
                activity: act(id, id),
                origin: SelectionOrigin::SuggestionPool,
            }),
            id.clone().prop_map(|id| StoreCommand::Select {
                activity: act(id, id),
                origin: SelectionOrigin::Other,
            }),
            id.prop_map(|id| StoreCommand::Deselect {
                place_id: id.to_string(),
                hints: CategoryHints::default(),
            }),
            ids.clone().prop_map(move |ids| StoreCommand::AbsorbSuggestions(records(ids))),
            ids.prop_map(move |ids| StoreCommand::ImportExternalSelection(records(ids))),
        ]
    }

    fn ids_of(list: &[Activity]) -> Vec<String> {
        list.iter().filter_map(|a| a.id().map(str::to_string)).collect()
    }

    /// 両方に残った要素の相対順が変わっていないか
    fn keeps_relative_order(before: &[String], after: &[String]) -> bool {
        let kept: Vec<&String> = before.iter().filter(|id| after.contains(id)).collect();
        let survivors: Vec<&String> = after.iter().filter(|id| before.contains(id)).collect();
        kept == survivors
    }

    fn has_duplicates(ids: &[String]) -> bool {
        let unique: std::collections::HashSet<&String> = ids.iter().collect();
        unique.len() != ids.len()
    }

    proptest! {
        #[test]
        fn proptest_store_invariants_hold(commands in prop::collection::vec(command_strategy(), 1..60)) {
            let mut store = ActivityStore::new();
            for command in commands {
                let selection_before = ids_of(store.selection());
                let pool_before = ids_of(store.suggestions());
                store.apply(command);
                let selection = ids_of(store.selection());
                let pool = ids_of(store.suggestions());

                prop_assert!(!has_duplicates(&selection), "選択が重複: {:?}", selection);
                prop_assert!(!has_duplicates(&pool), "プールが重複: {:?}", pool);
                prop_assert!(selection.iter().all(|id| !pool.contains(id)), "{:?} / {:?}", selection, pool);
                prop_assert!(keeps_relative_order(&selection_before, &selection));
                prop_assert!(keeps_relative_order(&pool_before, &pool));
            }
        }
    }
}
