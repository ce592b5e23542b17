//! アプリケーションコンテキスト
//!
//! 現在地・検索セッション・選択/提案ストア・ページ遷移・キャッシュ同期・
//! チャットのトランスクリプト・永続ストアをひとつにまとめる。
//! 画面側の処理は [`Frontend`] 越しに呼び出す（ブラウザはDOM、CLIは端末）。

use crate::api::{ItineraryPayload, SaveStep, SearchRequest};
use crate::cache_sync::{CacheSyncPolicy, CitySnapshot, SyncDecision, SyncNotice};
use crate::category::{Category, CategoryHints};
use crate::error::Result;
use crate::event::{CategoryResults, ToolPayload};
use crate::location::{extract_location_from_query, same_location};
use crate::pages::{CardPlacement, PageContent, PageEffect, PageStateMachine, SuggestionPlacements};
use crate::persist::{self, keys, KeyValueStore};
use crate::sanitize::normalize_message;
use crate::session::{SearchSession, SearchTicket};
use crate::store::{ActivityStore, SelectionOrigin, StoreCommand, StoreOutcome};
use crate::types::{Activity, ChatMessage, ChatRole, Coordinates, ResultPage};
use futures::future::AbortRegistration;
use serde_json::{Map, Value};

/// 画面側の処理
///
/// すべて既定で何もしない。必要なものだけ実装する。
pub trait Frontend {
    fn status(&mut self, _text: &str) {}
    fn error(&mut self, _message: &str) {}
    /// Intro ページへ整形済み本文を挿入
    fn intro_content(&mut self, _html: &str) {}
    /// カテゴリ結果のセクションを描画
    fn category_section(&mut self, _page: ResultPage, _category: &str, _results: &CategoryResults) {}
    /// 地図コラボレータへ渡す
    fn map_payload(&mut self, _payload: &ToolPayload, _selection: &[Activity]) {}
    fn chat_message(&mut self, _message: &ChatMessage) {}
    /// 地域ごとの結果コンテナを空にする
    fn clear_containers(&mut self) {}
    fn location_changed(&mut self, _location: &str) {}
    fn conversation_mode(&mut self, _active: bool) {}
    fn page_effect(&mut self, _page: ResultPage, _effect: &PageEffect) {}
    fn place_suggestion(&mut self, _activity: &Activity, _placement: CardPlacement) {}
    fn remove_suggestion(&mut self, _place_id: &str) {}
    fn selection_changed(&mut self, _selection: &[Activity]) {}
    /// 距離順の並べ替えを外部に依頼（結果は `AppContext::reorder` で戻す）
    fn request_reorder(&mut self, _origin: Coordinates, _selection: &[Activity]) {}
    fn sync_notice(&mut self, _notice: &SyncNotice) {}
}

/// 何も表示しないフロントエンド
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl Frontend for Headless {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    pub sync_debounce_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sync_debounce_ms: crate::cache_sync::DEFAULT_DEBOUNCE_MS,
        }
    }
}

/// 新しい検索の開始情報
#[derive(Debug)]
pub struct SearchStart {
    pub ticket: SearchTicket,
    pub registration: AbortRegistration,
    pub request: SearchRequest,
}

#[derive(Debug)]
pub struct AppContext<S: KeyValueStore> {
    storage: S,
    location: Option<String>,
    session: SearchSession,
    store: ActivityStore,
    pages: PageStateMachine,
    placements: SuggestionPlacements,
    sync: CacheSyncPolicy,
    transcript: Vec<ChatMessage>,
    ranked: Map<String, Value>,
    intro_html: String,
    selection_html: String,
    backend_selection: Vec<Activity>,
}

impl<S: KeyValueStore> AppContext<S> {
    /// 永続ストアから選択リスト・現在地・会話履歴を復元
    pub fn new(mut storage: S, config: ContextConfig) -> Self {
        let selection = persist::load_selection(&storage);
        let location = persist::load_location(&mut storage);
        let history = persist::load_history(&storage);
        log::debug!(
            "コンテキスト復元: 選択 {} 件 / 現在地 {:?} / 履歴 {} 件",
            selection.len(),
            location,
            history.len()
        );

        Self {
            storage,
            location,
            session: SearchSession::with_history(history),
            store: ActivityStore::with_selection(selection),
            pages: PageStateMachine::new(),
            placements: SuggestionPlacements::new(),
            sync: CacheSyncPolicy::new(config.sync_debounce_ms),
            transcript: Vec::new(),
            ranked: Map::new(),
            intro_html: String::new(),
            selection_html: String::new(),
            backend_selection: Vec::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn session(&self) -> &SearchSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SearchSession {
        &mut self.session
    }

    pub fn store(&self) -> &ActivityStore {
        &self.store
    }

    /// 購読登録用
    pub fn store_mut(&mut self) -> &mut ActivityStore {
        &mut self.store
    }

    pub fn pages(&self) -> &PageStateMachine {
        &self.pages
    }

    pub fn pages_mut(&mut self) -> &mut PageStateMachine {
        &mut self.pages
    }

    pub fn placements(&self) -> &SuggestionPlacements {
        &self.placements
    }

    pub fn sync(&self) -> &CacheSyncPolicy {
        &self.sync
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn ranked_results(&self) -> &Map<String, Value> {
        &self.ranked
    }

    pub fn intro_html(&self) -> &str {
        &self.intro_html
    }

    pub fn page_content(&self) -> PageContent {
        PageContent {
            selection_empty: self.store.selection().is_empty(),
            suggestions_empty: self.store.suggestions().is_empty() && !self.placements.page_ready(),
        }
    }

    // ---- 現在地 ----

    /// 現在地を更新して永続化
    pub fn set_location<F: Frontend + ?Sized>(&mut self, location: &str, frontend: &mut F) -> Result<()> {
        let location = location.trim();
        if location.is_empty() {
            return Ok(());
        }
        if self.location.as_deref() != Some(location) {
            log::info!("現在地: {}", location);
        }
        self.location = Some(location.to_string());
        persist::save_location(&mut self.storage, Some(location))?;
        frontend.location_changed(location);
        Ok(())
    }

    // ---- 検索 ----

    /// 新しい検索を開始
    ///
    /// 問い合わせから別の都市が読み取れたら会話モードへ切り替え、地域ごとの結果を消す。
    pub fn begin_search<F: Frontend + ?Sized>(&mut self, query: &str, frontend: &mut F) -> Result<SearchStart> {
        if let Some(detected) = extract_location_from_query(query) {
            let changed = self
                .location
                .as_deref()
                .map_or(true, |current| !same_location(current, &detected));
            if changed {
                self.set_conversation_mode(true, frontend);
            }
            self.set_location(&detected, frontend)?;
            self.clear_location_results(frontend);
        }

        let (ticket, registration) = self.session.begin(query);
        self.backend_selection.clear();
        let message = ChatMessage {
            text: ticket.query().to_string(),
            is_user: true,
        };
        self.push_chat(message, frontend);

        let request = SearchRequest {
            query: ticket.query().to_string(),
            history: self.session.history().to_vec(),
        };
        Ok(SearchStart {
            ticket,
            registration,
            request,
        })
    }

    pub fn set_conversation_mode<F: Frontend + ?Sized>(&mut self, on: bool, frontend: &mut F) {
        if self.session.conversation_mode() != on {
            self.session.set_conversation_mode(on);
            frontend.conversation_mode(on);
        }
    }

    /// 地域ごとの結果（Intro本文・カテゴリ欄）を消す
    pub fn clear_location_results<F: Frontend + ?Sized>(&mut self, frontend: &mut F) {
        self.placements.clear();
        self.ranked.clear();
        self.intro_html.clear();
        self.selection_html.clear();
        frontend.clear_containers();
    }

    pub(crate) fn set_intro_html(&mut self, html: String) {
        self.intro_html = html;
    }

    pub(crate) fn set_selection_html(&mut self, html: &str) {
        self.selection_html = html.to_string();
    }

    pub(crate) fn remember_ranked(&mut self, category: &str, results: &CategoryResults) {
        self.ranked.insert(category.to_string(), results.to_value());
    }

    pub(crate) fn stage_backend_selection(&mut self, records: Vec<Activity>) {
        for record in records {
            let duplicate = record
                .id()
                .is_some_and(|id| self.backend_selection.iter().any(|a| a.has_id(id)));
            if !duplicate {
                self.backend_selection.push(record);
            }
        }
    }

    /// ストリーム終了後: サーバ描画の選択を取り込む
    pub fn import_backend_selection<F: Frontend + ?Sized>(&mut self, frontend: &mut F, now: u64) -> Result<()> {
        let records = std::mem::take(&mut self.backend_selection);
        if records.is_empty() {
            return Ok(());
        }
        let outcome = self.store.import_external_selection(records);
        self.apply_outcome(outcome, frontend, now)
    }

    /// 会話履歴を永続化
    pub fn persist_history(&mut self) -> Result<()> {
        persist::save_history(&mut self.storage, self.session.history())
    }

    // ---- チャット ----

    /// トランスクリプトへ追加（直前と同じ役割・同じ本文なら捨てる）
    pub fn push_chat<F: Frontend + ?Sized>(&mut self, message: ChatMessage, frontend: &mut F) -> bool {
        let normalized = normalize_message(&message.text);
        if normalized.is_empty() {
            return false;
        }
        if let Some(last) = self.transcript.last() {
            if last.is_user == message.is_user && normalize_message(&last.text) == normalized {
                log::debug!("重複メッセージを破棄: {}", normalized);
                return false;
            }
        }
        frontend.chat_message(&message);
        self.transcript.push(message);
        true
    }

    // ---- 選択・提案 ----

    pub fn select<F: Frontend + ?Sized>(
        &mut self,
        activity: Activity,
        origin: SelectionOrigin,
        frontend: &mut F,
        now: u64,
    ) -> Result<bool> {
        let id = activity.id().map(str::to_string);
        let was_suggested = id.as_deref().is_some_and(|id| self.store.in_pool(id))
            || matches!(origin, SelectionOrigin::SuggestionPool | SelectionOrigin::SuggestionsPage);
        let outcome = self.store.apply(StoreCommand::Select { activity, origin });
        let changed = outcome.changed;
        if changed && was_suggested {
            if let Some(id) = id {
                self.placements.card_removed(&id);
                frontend.remove_suggestion(&id);
            }
        }
        self.apply_outcome(outcome, frontend, now)?;
        Ok(changed)
    }

    pub fn deselect<F: Frontend + ?Sized>(
        &mut self,
        place_id: &str,
        hints: CategoryHints,
        frontend: &mut F,
        now: u64,
    ) -> Result<bool> {
        let outcome = self.store.apply(StoreCommand::Deselect {
            place_id: place_id.to_string(),
            hints,
        });
        let changed = outcome.changed;
        self.apply_outcome(outcome, frontend, now)?;
        Ok(changed)
    }

    /// 提案ページのレコードをプールへ
    pub fn absorb_suggestions<F: Frontend + ?Sized>(
        &mut self,
        records: Vec<Activity>,
        frontend: &mut F,
        now: u64,
    ) -> Result<()> {
        let outcome = self.store.apply(StoreCommand::AbsorbSuggestions(records));
        self.apply_outcome(outcome, frontend, now)
    }

    /// 外部の距離計算の結果を反映
    pub fn reorder<F: Frontend + ?Sized>(&mut self, ids: Vec<String>, frontend: &mut F, now: u64) -> Result<()> {
        let outcome = self.store.apply(StoreCommand::ReorderSelection(ids));
        self.apply_outcome(outcome, frontend, now)
    }

    fn apply_outcome<F: Frontend + ?Sized>(&mut self, outcome: StoreOutcome, frontend: &mut F, now: u64) -> Result<()> {
        if !outcome.changed {
            return Ok(());
        }
        if outcome.persist {
            persist::save_selection(&mut self.storage, self.store.selection())?;
            frontend.selection_changed(self.store.selection());
            if self.pages.current() == ResultPage::Selection && !self.store.selection().is_empty() {
                if let Some(effect) = self.pages.content_arrived(ResultPage::Selection) {
                    frontend.page_effect(ResultPage::Selection, &effect);
                }
            }
        }
        if let Some(activity) = outcome.returned {
            self.place_suggestion(activity, frontend);
        }
        if outcome.request_sync {
            self.sync.request(now);
        }
        if let Some(origin) = outcome.reorder_origin {
            frontend.request_reorder(origin, self.store.selection());
        }
        Ok(())
    }

    fn place_suggestion<F: Frontend + ?Sized>(&mut self, activity: Activity, frontend: &mut F) {
        match self.placements.place(activity.clone()) {
            CardPlacement::Queued | CardPlacement::Duplicate => {}
            placement => frontend.place_suggestion(&activity, placement),
        }
    }

    /// 保留中のカードを配置
    pub fn drain_pending<F: Frontend + ?Sized>(&mut self, frontend: &mut F) {
        for (activity, placement) in self.placements.drain() {
            frontend.place_suggestion(&activity, placement);
        }
    }

    /// 提案ページのカテゴリ欄が描画された
    pub(crate) fn suggestions_section_rendered<F: Frontend + ?Sized>(
        &mut self,
        category: Category,
        cards: &[Activity],
        frontend: &mut F,
    ) {
        self.placements.mark_section_rendered(category);
        for card in cards {
            if let Some(id) = card.id() {
                self.placements.record_placed(id);
            }
        }
        self.drain_pending(frontend);
    }

    // ---- ページ遷移 ----

    /// ユーザー操作による遷移
    pub fn user_navigate<F: Frontend + ?Sized>(&mut self, target: ResultPage, frontend: &mut F, now: u64) {
        let content = self.page_content();
        let effects = self.pages.user_navigate(target, content);
        self.apply_page_effects(target, effects, frontend, now);
    }

    /// ガード付きの遷移（拒否されたら何もしない）
    pub fn navigate<F: Frontend + ?Sized>(&mut self, target: ResultPage, frontend: &mut F, now: u64) -> bool {
        let content = self.page_content();
        match self.pages.navigate(target, content) {
            Some(effects) => {
                self.apply_page_effects(target, effects, frontend, now);
                true
            }
            None => false,
        }
    }

    /// ページのコンテンツが届いた
    pub fn page_content_arrived<F: Frontend + ?Sized>(&mut self, page: ResultPage, frontend: &mut F) {
        if let Some(effect) = self.pages.content_arrived(page) {
            frontend.page_effect(page, &effect);
        }
    }

    fn apply_page_effects<F: Frontend + ?Sized>(
        &mut self,
        page: ResultPage,
        effects: Vec<PageEffect>,
        frontend: &mut F,
        now: u64,
    ) {
        for effect in effects {
            match effect {
                PageEffect::DrainPending => {
                    self.placements.mark_page_ready();
                    self.drain_pending(frontend);
                }
                PageEffect::RequestCacheSync => self.sync.request(now),
                other => frontend.page_effect(page, &other),
            }
        }
    }

    // ---- キャッシュ同期 ----

    pub fn city_snapshot(&self) -> Option<CitySnapshot> {
        CitySnapshot::build(
            self.location.as_deref(),
            self.store.selection(),
            self.store.suggestions(),
        )
    }

    pub fn request_sync(&mut self, now: u64) {
        self.sync.request(now);
    }

    /// デバウンス経過後に送るべきスナップショットを判定
    pub fn poll_sync(&mut self, now: u64) -> Result<SyncDecision> {
        let snapshot = self.city_snapshot();
        self.sync.poll(now, snapshot)
    }

    /// 手動保存
    pub fn save_cache_now<F: Frontend + ?Sized>(&mut self, now: u64, frontend: &mut F) -> Result<SyncDecision> {
        let snapshot = self.city_snapshot();
        let decision = self.sync.fire_now(now, snapshot)?;
        if let Some(notice) = self.sync.notice(now) {
            if matches!(decision, SyncDecision::Skip(_)) {
                frontend.sync_notice(notice);
            }
        }
        Ok(decision)
    }

    pub fn sync_succeeded<F: Frontend + ?Sized>(&mut self, now: u64, fingerprint: &str, frontend: &mut F) {
        let notice = self.sync.mark_sent(now, fingerprint);
        frontend.sync_notice(notice);
    }

    pub fn sync_failed<F: Frontend + ?Sized>(&mut self, now: u64, message: &str, frontend: &mut F) {
        let notice = self.sync.mark_failed(now, message);
        frontend.sync_notice(notice);
    }

    pub fn sync_notice(&mut self, now: u64) -> Option<&SyncNotice> {
        self.sync.notice(now)
    }

    pub fn dismiss_sync_notice(&mut self) {
        self.sync.dismiss_notice();
    }

    // ---- 旅程保存 ----

    pub fn itinerary_payload(&self) -> ItineraryPayload {
        ItineraryPayload::build(
            self.location.as_deref(),
            self.store.selection(),
            &self.intro_html,
            &self.ranked,
            &self.selection_html,
        )
    }

    /// 旅程保存の準備
    ///
    /// 未ログインなら最後の問い合わせ・旅程・再開フラグを一時キーに退避する。
    pub fn prepare_itinerary_save(&mut self, authenticated: bool) -> Result<SaveStep> {
        let payload = self.itinerary_payload();
        if payload.locali.is_empty() {
            return Ok(SaveStep::NothingSelected);
        }
        if authenticated {
            return Ok(SaveStep::Send(payload));
        }
        let last_query = self
            .session
            .history()
            .iter()
            .rev()
            .find(|turn| turn.role == ChatRole::User && !turn.text().is_empty())
            .map(|turn| turn.text().to_string());
        if let Some(query) = last_query {
            self.storage.set(keys::PENDING_SEARCH, &query)?;
        }
        self.storage.set(keys::RETURN_TO_SELECTION, "1")?;
        persist::save_json(&mut self.storage, keys::PENDING_ITINERARY_PAYLOAD, &payload)?;
        self.storage.set(keys::SAVE_AFTER_LOGIN, "1")?;
        log::info!("未ログインのため旅程を退避: {} 件", payload.num_locali);
        Ok(SaveStep::LoginRequired)
    }

    /// ログイン後に送る退避済みの旅程
    pub fn pending_itinerary(&self) -> Option<ItineraryPayload> {
        if self.storage.get(keys::SAVE_AFTER_LOGIN).as_deref() != Some("1") {
            return None;
        }
        persist::load_json(&self.storage, keys::PENDING_ITINERARY_PAYLOAD)
    }

    /// 退避した旅程の送信を終えた（成否にかかわらず再開フラグを消す）
    pub fn pending_itinerary_sent(&mut self) -> Result<()> {
        self.storage.remove(keys::SAVE_AFTER_LOGIN)?;
        self.storage.remove(keys::PENDING_ITINERARY_PAYLOAD)
    }

    /// 保存済みプログラムを読み込み、現在地と選択を置き換える
    pub fn load_program<F: Frontend + ?Sized>(
        &mut self,
        city: Option<&str>,
        records: Vec<Activity>,
        frontend: &mut F,
        now: u64,
    ) -> Result<()> {
        if let Some(city) = city {
            self.set_location(city, frontend)?;
        }
        if records.is_empty() {
            log::warn!("プログラムに店舗がありません");
        }
        let pulled: Vec<String> = records
            .iter()
            .filter_map(Activity::id)
            .filter(|id| self.store.in_pool(id))
            .map(str::to_string)
            .collect();
        let outcome = self.store.apply(StoreCommand::ReplaceSelection(records));
        for id in &pulled {
            self.placements.card_removed(id);
            frontend.remove_suggestion(id);
        }
        self.apply_outcome(outcome, frontend, now)
    }

    /// ログイン往復の一時キーを削除
    pub fn clear_transient(&mut self) -> Result<()> {
        persist::clear_transient(&mut self.storage)
    }

    /// 明示的なセッションリセット
    pub fn reset<F: Frontend + ?Sized>(&mut self, frontend: &mut F) -> Result<()> {
        log::info!("セッションをリセット");
        self.session.reset();
        let outcome = self.store.apply(StoreCommand::Reset);
        for effect in self.pages.reset() {
            frontend.page_effect(ResultPage::Intro, &effect);
        }
        self.sync.reset();
        self.transcript.clear();
        self.backend_selection.clear();
        self.clear_location_results(frontend);

        if outcome.persist {
            persist::save_selection(&mut self.storage, self.store.selection())?;
            frontend.selection_changed(self.store.selection());
        }
        persist::save_history(&mut self.storage, &[])?;
        persist::clear_transient(&mut self.storage)?;
        frontend.conversation_mode(false);
        Ok(())
    }

    /// ログイン後の保存フローなら選択ページへ戻す
    pub(crate) fn resume_after_login<F: Frontend + ?Sized>(&mut self, frontend: &mut F, now: u64) -> Result<()> {
        let flag = |value: Option<String>| value.as_deref() == Some("1");
        if flag(self.storage.get(keys::RETURN_TO_SELECTION)) && flag(self.storage.get(keys::SAVE_AFTER_LOGIN)) {
            log::info!("ログイン後の保存フロー: 選択ページへ移動");
            self.user_navigate(ResultPage::Selection, frontend, now);
            self.storage.remove(keys::RETURN_TO_SELECTION)?;
        }
        Ok(())
    }
}
