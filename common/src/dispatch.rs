//! ストリームイベントの振り分け
//!
//! 1フレームの処理順:
//! 1. `reload_page`（最優先。このストリームの処理を打ち切る）
//! 2. `error`
//! 3. 本文（検索ごとに1回だけ Intro へ挿入）
//! 4. `map_payload` / `tool_name`+`tool_data` のカテゴリ結果
//! 5. `status`（`detected_location` 付きなら現在地を更新し結果を消す）
//! 6. `chatbot_message`
//! 7. `chatbot_mode_activated`
//! 8. `detected_location` のみの場合も現在地を更新

use crate::category::{normalize_category, route_tool_category};
use crate::context::{AppContext, Frontend};
use crate::error::Result;
use crate::event::{CategoryResults, StreamEvent, ToolPayload};
use crate::location::extract_location_from_query;
use crate::persist::KeyValueStore;
use crate::sanitize::{clean_content, content_preview, extract_cards};
use crate::session::SearchTicket;
use crate::types::{Activity, ChatMessage, ResultPage};
use std::ops::ControlFlow;

/// 応答が「ricarico」だけなら再検索の合図
pub const RELOAD_REPLY: &str = "ricarico";

pub const NO_CONTENT_MESSAGE: &str = "Nessuna risposta testuale ricevuta.";
pub const STREAM_ERROR_MESSAGE: &str = "Errore durante la comunicazione con il server.";

/// 1フレームの処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// このストリームの処理を止める。`resubmit` があればその問い合わせで検索し直す
    Stop { resubmit: Option<String> },
    /// 中断済み・古い検索のフレーム
    Ignored,
}

impl Dispatch {
    /// [`crate::frame::pump`] 用
    pub fn control_flow(&self) -> ControlFlow<()> {
        match self {
            Dispatch::Stop { .. } => ControlFlow::Break(()),
            Dispatch::Continue | Dispatch::Ignored => ControlFlow::Continue(()),
        }
    }

    pub fn resubmit(&self) -> Option<&str> {
        match self {
            Dispatch::Stop { resubmit } => resubmit.as_deref(),
            _ => None,
        }
    }
}

/// 1回の検索ストリームを担当する振り分け器
#[derive(Debug)]
pub struct EventDispatcher {
    ticket: SearchTicket,
    stopped: bool,
    frames: usize,
}

impl EventDispatcher {
    pub fn new(ticket: SearchTicket) -> Self {
        Self {
            ticket,
            stopped: false,
            frames: 0,
        }
    }

    pub fn ticket(&self) -> &SearchTicket {
        &self.ticket
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// 処理したフレーム数
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn dispatch<S, F>(
        &mut self,
        ctx: &mut AppContext<S>,
        frontend: &mut F,
        event: &StreamEvent,
        now: u64,
    ) -> Dispatch
    where
        S: KeyValueStore,
        F: Frontend + ?Sized,
    {
        if self.stopped || !ctx.session().is_current(&self.ticket) {
            return Dispatch::Ignored;
        }
        self.frames += 1;

        if event.is_reload() {
            return self.reload(ctx, frontend, event.user_message.as_deref());
        }

        if let Some(error) = event.error.as_deref().filter(|e| !e.trim().is_empty()) {
            log::warn!("バックエンドのエラー: {}", error);
            frontend.error(error);
        }

        if let Some(raw) = event.primary_content() {
            if ctx.session_mut().claim_content_insertion(&self.ticket) {
                warn_on_err(self.insert_content(ctx, frontend, raw, now), "本文の挿入");
            } else {
                log::debug!("本文は挿入済みのため破棄");
            }
        }

        for payload in event.tool_payloads() {
            warn_on_err(self.apply_tool_payload(ctx, frontend, &payload, now), "カテゴリ結果の反映");
        }

        if let Some(status) = event.status.as_deref() {
            frontend.status(status);
            if let Some(location) = detected(event) {
                ctx.clear_location_results(frontend);
                warn_on_err(ctx.set_location(location, frontend), "現在地の保存");
            }
        }

        if let Some(message) = &event.chatbot_message {
            if !message.is_user && message.message.trim().eq_ignore_ascii_case(RELOAD_REPLY) {
                return self.reload_from_reply(ctx, frontend);
            }
            let text = message.message.clone();
            let pushed = ctx.push_chat(
                ChatMessage {
                    text: text.clone(),
                    is_user: message.is_user,
                },
                frontend,
            );
            if pushed && !message.is_user {
                ctx.session_mut().push_model_turn(&text);
            }
        }

        if event.activates_conversation() {
            ctx.set_conversation_mode(true, frontend);
        }

        if event.status.is_none() {
            if let Some(location) = detected(event) {
                warn_on_err(ctx.set_location(location, frontend), "現在地の保存");
            }
        }

        Dispatch::Continue
    }

    /// `reload_page`: 会話モードでなければ結果と履歴を消し、`user_message` で検索し直す
    fn reload<S, F>(&mut self, ctx: &mut AppContext<S>, frontend: &mut F, user_message: Option<&str>) -> Dispatch
    where
        S: KeyValueStore,
        F: Frontend + ?Sized,
    {
        log::info!("reload_page を受信");
        self.stop(ctx);
        if !ctx.session().conversation_mode() {
            ctx.clear_location_results(frontend);
            ctx.session_mut().clear_history();
        }

        let resubmit = user_message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        if let Some(query) = &resubmit {
            if let Some(location) = extract_location_from_query(query) {
                warn_on_err(ctx.set_location(&location, frontend), "現在地の保存");
            }
        }
        Dispatch::Stop { resubmit }
    }

    /// 「ricarico」応答: 会話モードを抜け、直前のユーザー問い合わせで検索し直す
    fn reload_from_reply<S, F>(&mut self, ctx: &mut AppContext<S>, frontend: &mut F) -> Dispatch
    where
        S: KeyValueStore,
        F: Frontend + ?Sized,
    {
        let last_query = ctx.session().last_user_query().map(str::to_string);
        let Some(query) = last_query else {
            log::warn!("再検索する問い合わせが見つかりません");
            return Dispatch::Continue;
        };
        log::info!("ricarico 応答: 再検索 {}", query);
        self.stop(ctx);
        ctx.set_conversation_mode(false, frontend);
        ctx.session_mut().clear_history();
        ctx.clear_location_results(frontend);
        Dispatch::Stop {
            resubmit: Some(query),
        }
    }

    fn stop<S: KeyValueStore>(&mut self, ctx: &mut AppContext<S>) {
        self.stopped = true;
        ctx.session_mut().abort();
    }

    fn insert_content<S, F>(&mut self, ctx: &mut AppContext<S>, frontend: &mut F, raw: &str, now: u64) -> Result<()>
    where
        S: KeyValueStore,
        F: Frontend + ?Sized,
    {
        let html = clean_content(raw);
        log::debug!("Intro に本文を挿入 ({} bytes)", html.len());
        frontend.intro_content(&html);

        let preview = content_preview(&html);
        ctx.session_mut().push_model_turn(&preview);
        ctx.push_chat(
            ChatMessage {
                text: preview,
                is_user: false,
            },
            frontend,
        );
        ctx.set_intro_html(html);
        ctx.page_content_arrived(ResultPage::Intro, frontend);
        ctx.resume_after_login(frontend, now)
    }

    fn apply_tool_payload<S, F>(
        &mut self,
        ctx: &mut AppContext<S>,
        frontend: &mut F,
        payload: &ToolPayload,
        now: u64,
    ) -> Result<()>
    where
        S: KeyValueStore,
        F: Frontend + ?Sized,
    {
        if payload.is_maps_tool() {
            ctx.session_mut().mark_map_received(&self.ticket);
        }

        for (category, results) in &payload.categories {
            let Some(page) = route_tool_category(category, results.as_html()) else {
                log::debug!("表示対象外のカテゴリ: {}", category);
                continue;
            };
            if payload.is_maps_tool() {
                ctx.remember_ranked(category, results);
            }
            frontend.category_section(page, category, results);

            match page {
                ResultPage::Selection => {
                    if let Some(html) = results.as_html() {
                        ctx.set_selection_html(html);
                    }
                    let records = category_records(category, results);
                    ctx.stage_backend_selection(records);
                    ctx.page_content_arrived(ResultPage::Selection, frontend);
                }
                ResultPage::Suggestions => {
                    let records = category_records(category, results);
                    let section = normalize_category(category)
                        .or_else(|| records.first().map(|a| a.category))
                        .unwrap_or_default();
                    ctx.suggestions_section_rendered(section, &records, frontend);
                    ctx.absorb_suggestions(records, frontend, now)?;
                    ctx.page_content_arrived(ResultPage::Suggestions, frontend);
                }
                ResultPage::Intro | ResultPage::Map => {}
            }
        }

        frontend.map_payload(payload, ctx.store().selection());
        Ok(())
    }

    /// ストリーム終了: サーバ描画の選択を取り込み、会話履歴を保存
    pub fn finish<S, F>(&mut self, ctx: &mut AppContext<S>, frontend: &mut F, now: u64) -> Result<()>
    where
        S: KeyValueStore,
        F: Frontend + ?Sized,
    {
        if self.stopped || !ctx.session().is_current(&self.ticket) {
            return Ok(());
        }
        ctx.session_mut().mark_finished(&self.ticket);
        ctx.import_backend_selection(frontend, now)?;
        if !ctx.session().flags().content_inserted {
            frontend.error(NO_CONTENT_MESSAGE);
        }
        log::info!("ストリーム終了: {} フレーム", self.frames);
        ctx.persist_history()
    }

    /// ストリームの通信エラー（中断はエラー扱いしない）
    pub fn fail<S, F>(&mut self, ctx: &mut AppContext<S>, frontend: &mut F, error: &str)
    where
        S: KeyValueStore,
        F: Frontend + ?Sized,
    {
        if self.stopped || !ctx.session().is_current(&self.ticket) {
            return;
        }
        log::warn!("ストリームエラー: {}", error);
        self.stopped = true;
        ctx.session_mut().mark_finished(&self.ticket);
        frontend.error(STREAM_ERROR_MESSAGE);
    }
}

fn detected(event: &StreamEvent) -> Option<&str> {
    event
        .detected_location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
}

/// カテゴリ結果のレコード（HTMLならカードを抽出）
fn category_records(category: &str, results: &CategoryResults) -> Vec<Activity> {
    match results {
        CategoryResults::Html(html) => extract_cards(html, Some(category)),
        CategoryResults::Records(records) => records
            .iter()
            .filter_map(|record| Activity::from_record(record, Some(category)))
            .collect(),
    }
}

fn warn_on_err(result: Result<()>, what: &str) {
    if let Err(e) = result {
        log::warn!("{}に失敗: {}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::context::ContextConfig;
    use crate::frame::FrameDecoder;
    use crate::pages::CardPlacement;
    use crate::persist::{keys, MemoryStore};
    use crate::store::SelectionOrigin;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        statuses: Vec<String>,
        errors: Vec<String>,
        intro: Vec<String>,
        sections: Vec<(ResultPage, String)>,
        maps: usize,
        cleared: usize,
        placed: Vec<(String, CardPlacement)>,
    }

    impl Frontend for Recorder {
        fn status(&mut self, text: &str) {
            self.statuses.push(text.to_string());
        }
        fn error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
        fn intro_content(&mut self, html: &str) {
            self.intro.push(html.to_string());
        }
        fn category_section(&mut self, page: ResultPage, category: &str, _results: &CategoryResults) {
            self.sections.push((page, category.to_string()));
        }
        fn map_payload(&mut self, _payload: &ToolPayload, _selection: &[Activity]) {
            self.maps += 1;
        }
        fn clear_containers(&mut self) {
            self.cleared += 1;
        }
        fn place_suggestion(&mut self, activity: &Activity, placement: CardPlacement) {
            self.placed.push((activity.id().unwrap_or_default().to_string(), placement));
        }
    }

    fn setup(query: &str) -> (AppContext<MemoryStore>, EventDispatcher) {
        let mut ctx = AppContext::new(MemoryStore::new(), ContextConfig { sync_debounce_ms: 0 });
        let start = ctx.begin_search(query, &mut Recorder::default()).unwrap();
        (ctx, EventDispatcher::new(start.ticket))
    }

    fn ev(value: serde_json::Value) -> StreamEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_only_first_content_is_inserted() {
        let (mut ctx, mut dispatcher) = setup("cosa mangiare");
        let mut ui = Recorder::default();
        dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"content_payload": {"answer": "<p>Primo</p>"}})), 0);
        dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"content_payload": {"answer": "<p>Secondo</p>"}})), 0);
        dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"answer": "<p>Terzo</p>"})), 0);

        assert_eq!(ui.intro, vec!["<p>Primo</p>"]);
        assert_eq!(ctx.intro_html(), "<p>Primo</p>");
        let last = ctx.transcript().last().unwrap();
        assert!(!last.is_user);
        assert_eq!(last.text, "Primo");
    }

    #[test]
    fn test_error_does_not_stop_stream() {
        let (mut ctx, mut dispatcher) = setup("x");
        let mut ui = Recorder::default();
        let result = dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"error": "quota", "status": "ok"})), 0);
        assert_eq!(result, Dispatch::Continue);
        assert_eq!(ui.errors, vec!["quota"]);
        assert_eq!(ui.statuses, vec!["ok"]);
    }

    #[test]
    fn test_reload_stops_and_resubmits() {
        let (mut ctx, mut dispatcher) = setup("trattorie");
        let mut ui = Recorder::default();
        let reload = ev(json!({"type": "reload_page", "user_message": "vini a Lecce", "status": "ignorato"}));
        let result = dispatcher.dispatch(&mut ctx, &mut ui, &reload, 0);

        assert_eq!(
            result,
            Dispatch::Stop {
                resubmit: Some("vini a Lecce".to_string())
            }
        );
        assert!(result.control_flow().is_break());
        assert!(ui.statuses.is_empty());
        assert_eq!(ctx.location(), Some("Lecce"));
        assert!(ctx.session().history().is_empty());

        let later = dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"answer": "<p>tardi</p>"})), 0);
        assert_eq!(later, Dispatch::Ignored);
        assert!(ui.intro.is_empty());
    }

    #[test]
    fn test_reload_keeps_results_in_conversation_mode() {
        let (mut ctx, mut dispatcher) = setup("trattorie");
        let mut ui = Recorder::default();
        ctx.set_conversation_mode(true, &mut ui);
        dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"type": "reload_page"})), 0);
        assert_eq!(ui.cleared, 0);
        assert_eq!(ctx.session().history().len(), 1);
    }

    #[test]
    fn test_stale_stream_is_ignored() {
        let (mut ctx, mut old) = setup("primo");
        let mut ui = Recorder::default();
        ctx.begin_search("secondo", &mut ui).unwrap();
        assert_eq!(old.dispatch(&mut ctx, &mut ui, &ev(json!({"status": "a"})), 0), Dispatch::Ignored);
        assert!(ui.statuses.is_empty());
    }

    #[test]
    fn test_detected_location() {
        let (mut ctx, mut dispatcher) = setup("x");
        let mut ui = Recorder::default();
        dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"detected_location": "Matera"})), 0);
        assert_eq!(ctx.location(), Some("Matera"));
        assert_eq!(ui.cleared, 0);

        dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"status": "Cerco", "detected_location": "Bari"})), 0);
        assert_eq!(ctx.location(), Some("Bari"));
        assert_eq!(ui.cleared, 1);
        assert_eq!(ctx.storage().get(keys::CURRENT_LOCATION).as_deref(), Some("Bari"));
    }

    #[test]
    fn test_tool_data_routing() {
        let (mut ctx, mut dispatcher) = setup("x");
        let mut ui = Recorder::default();
        let event = ev(json!({
            "tool_name": "search_google_maps",
            "tool_data": {
                "la_nostra_selezione": {"results": "<div class=\"selection-card\" data-place-id=\"sel1\"><h4>Masseria</h4></div>"},
                "hotel": {"results": [{"place_id": "h1", "nome": "Hotel Roma"}, {"place_id": "sel1", "nome": "Masseria"}]},
                "primi_piatti": {"results": "<p>orecchiette</p>"},
                "musei": {"results": []}
            }
        }));
        dispatcher.dispatch(&mut ctx, &mut ui, &event, 0);

        let pages: Vec<ResultPage> = ui.sections.iter().map(|(p, _)| *p).collect();
        assert_eq!(pages, vec![ResultPage::Selection, ResultPage::Suggestions, ResultPage::Intro]);
        assert_eq!(ui.maps, 1);
        assert!(ctx.session().flags().map_received);
        assert!(ctx.store().in_pool("h1"));
        assert!(ctx.placements().has_section(Category::Lodging));
        assert_eq!(ctx.ranked_results().len(), 3);
        // 選択はストリーム終了後に取り込む
        assert!(ctx.store().selection().is_empty());

        dispatcher.finish(&mut ctx, &mut ui, 0).unwrap();
        assert!(ctx.store().is_selected("sel1"));
        assert!(!ctx.store().in_pool("sel1"));
        assert_eq!(ui.errors, vec![NO_CONTENT_MESSAGE]);
    }

    #[test]
    fn test_queued_card_drains_when_section_arrives() {
        let (mut ctx, mut dispatcher) = setup("x");
        let mut ui = Recorder::default();
        let mut wine = Activity::new("w1", "Enoteca");
        wine.category = Category::Wine;
        ctx.select(wine, SelectionOrigin::Other, &mut ui, 0).unwrap();
        ctx.deselect("w1", Default::default(), &mut ui, 0).unwrap();
        assert!(ui.placed.is_empty());

        let event = ev(json!({"tool_name": "search_google_maps", "tool_data": {"vini": {"results": [{"place_id": "w2"}]}}}));
        dispatcher.dispatch(&mut ctx, &mut ui, &event, 0);
        assert_eq!(ui.placed, vec![("w1".to_string(), CardPlacement::Section(Category::Wine))]);
    }

    #[test]
    fn test_chat_messages() {
        let (mut ctx, mut dispatcher) = setup("ciao");
        let mut ui = Recorder::default();
        let bot = ev(json!({"chatbot_message": {"message": "Dimmi di più", "isUser": false}}));
        dispatcher.dispatch(&mut ctx, &mut ui, &bot, 0);
        dispatcher.dispatch(&mut ctx, &mut ui, &bot, 0);
        let user = ev(json!({"chatbot_message": {"message": "Dimmi di più", "isUser": true}}));
        dispatcher.dispatch(&mut ctx, &mut ui, &user, 0);

        let texts: Vec<(bool, &str)> = ctx
            .transcript()
            .iter()
            .map(|m| (m.is_user, m.text.as_str()))
            .collect();
        assert_eq!(
            texts,
            vec![(true, "ciao"), (false, "Dimmi di più"), (true, "Dimmi di più")]
        );
        assert_eq!(ctx.session().history().len(), 2);
    }

    #[test]
    fn test_ricarico_reply() {
        let (mut ctx, mut dispatcher) = setup("trattorie a Bari");
        let mut ui = Recorder::default();
        let reply = ev(json!({"chatbot_message": {"message": " Ricarico ", "isUser": false}}));
        let result = dispatcher.dispatch(&mut ctx, &mut ui, &reply, 0);
        assert_eq!(result.resubmit(), Some("trattorie a Bari"));
        assert!(!ctx.session().conversation_mode());
        assert!(ctx.session().history().is_empty());
        assert!(ctx.transcript().iter().all(|m| m.text.trim() != "Ricarico"));
    }

    #[test]
    fn test_conversation_activation() {
        let (mut ctx, mut dispatcher) = setup("x");
        let mut ui = Recorder::default();
        dispatcher.dispatch(
            &mut ctx,
            &mut ui,
            &ev(json!({"chatbot_mode_activated": true, "force_new_search": true})),
            0,
        );
        assert!(!ctx.session().conversation_mode());
        dispatcher.dispatch(&mut ctx, &mut ui, &ev(json!({"chatbot_mode_activated": true})), 0);
        assert!(ctx.session().conversation_mode());
    }

    #[test]
    fn test_decoder_to_dispatcher() {
        let (mut ctx, mut dispatcher) = setup("x");
        let mut ui = Recorder::default();
        let mut decoder = FrameDecoder::new();
        let mut events = decoder.push_str("{\"status\":\"a\"}\n{\"sta");
        events.extend(decoder.push_str("tus\":\"b\"}\n{\"answer\":\"<p>ok</p>\"}"));
        events.extend(decoder.finish());
        for event in &events {
            dispatcher.dispatch(&mut ctx, &mut ui, event, 0);
        }
        dispatcher.finish(&mut ctx, &mut ui, 0).unwrap();

        assert_eq!(ui.statuses, vec!["a", "b"]);
        assert_eq!(ui.intro, vec!["<p>ok</p>"]);
        assert!(ui.errors.is_empty());
        assert!(ctx.session().flags().stream_finished);
        assert!(ctx.storage().get(keys::MESSAGE_HISTORY).is_some());
    }

    #[test]
    fn test_stream_failure_reports_once() {
        let (mut ctx, mut dispatcher) = setup("x");
        let mut ui = Recorder::default();
        dispatcher.fail(&mut ctx, &mut ui, "connection reset");
        dispatcher.fail(&mut ctx, &mut ui, "connection reset");
        assert_eq!(ui.errors, vec![STREAM_ERROR_MESSAGE]);
    }
}
