//! ブラウザ上の検索ランタイム
//!
//! `AppContext` と画面をまとめて `StoredValue` に置き、イベントハンドラと
//! 非同期タスクから同期的に借りて操作する（await をまたいで借りない）。

use crate::bridge;
use crate::fetch;
use crate::storage::LocalStore;
use crate::view::{BrowserView, ViewSignals};
use futures::future::Abortable;
use gloo::timers::callback::Timeout;
use itinerary_common::api::{program_id_from_path, ApiResponse, AuthStatus, PlaceDetails, SaveCityCacheResponse};
use itinerary_common::{
    pump, Activity, AppContext, CategoryHints, CitySnapshot, ContextConfig, Debouncer, Dispatch, Endpoints,
    EventDispatcher, FrameDecoder, Frontend, ItineraryPayload, ProgramDetails, PumpOutcome, ResultPage,
    SaveStep, SearchStart, SearchTicket, SelectionOrigin, SyncDecision,
};
use leptos::prelude::*;
use leptos::task::spawn_local;
use web_sys::AbortController;

/// 再検索の連鎖の上限
const MAX_RESUBMITS: usize = 3;
/// 地図の再描画をまとめる間隔
const MAP_REFRESH_MS: u64 = 150;

fn now() -> u64 {
    js_sys::Date::now() as u64
}

pub struct Runtime {
    ctx: AppContext<LocalStore>,
    view: BrowserView,
    endpoints: Endpoints,
    map_refresh: Debouncer,
    map_timer: Option<Timeout>,
    sync_timer: Option<Timeout>,
    notice_timer: Option<Timeout>,
    abort: Option<AbortController>,
}

/// コンポーネント間で受け渡すハンドル
#[derive(Clone, Copy)]
pub struct Handle(StoredValue<Runtime, LocalStorage>);

impl Runtime {
    fn new(signals: ViewSignals) -> Self {
        let ctx = AppContext::new(LocalStore::new(), ContextConfig::default());
        signals.selection.set(ctx.store().selection().to_vec());
        signals.location.set(ctx.location().map(str::to_string));
        Self {
            ctx,
            view: BrowserView::new(signals),
            endpoints: Endpoints::new(""),
            map_refresh: Debouncer::new(MAP_REFRESH_MS),
            map_timer: None,
            sync_timer: None,
            notice_timer: None,
            abort: None,
        }
    }

    /// ストリーム終了後の表示を戻す（新しい検索に置き換わっていれば何もしない）
    fn settle(&mut self, ticket: &SearchTicket) -> bool {
        if !self.ctx.session().is_current(ticket) {
            log::debug!("古い検索の終了を無視");
            return false;
        }
        self.view.signals().searching.set(false);
        self.view.signals().status.set(None);
        true
    }
}

impl Handle {
    pub fn new(signals: ViewSignals) -> Self {
        let handle = Self(StoredValue::new_local(Runtime::new(signals)));
        handle.schedule_map_refresh();
        handle
    }

    fn with<R>(self, f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
        self.0.try_update_value(f)
    }

    // ---- 検索 ----

    /// 新しい検索（実行中の検索は中断される）
    pub fn search(self, query: String) {
        self.search_with_limit(query, MAX_RESUBMITS);
    }

    fn search_with_limit(self, query: String, resubmits_left: usize) {
        let query = query.trim().to_string();
        if query.is_empty() {
            return;
        }
        let begun = self.with(|rt| {
            if let Some(previous) = rt.abort.take() {
                previous.abort();
            }
            let controller = AbortController::new().ok()?;
            rt.view.signals().searching.set(true);
            rt.view.signals().status.set(Some("Ricerca in corso...".to_string()));
            match rt.ctx.begin_search(&query, &mut rt.view) {
                Ok(start) => {
                    let signal = controller.signal();
                    rt.abort = Some(controller);
                    Some((start, signal, rt.endpoints.search()))
                }
                Err(e) => {
                    log::warn!("検索を開始できません: {}", e);
                    None
                }
            }
        });
        let Some(Some((start, signal, url))) = begun else {
            return;
        };

        spawn_local(async move {
            let ticket = start.ticket.clone();
            let resubmit = self.run_stream(start, &signal, &url).await;
            let current = self.with(|rt| rt.settle(&ticket)).unwrap_or(false);
            self.after_update();
            if !current {
                return;
            }
            match resubmit {
                Some(next) if resubmits_left > 0 => self.search_with_limit(next, resubmits_left - 1),
                Some(next) => log::warn!("再検索の上限に達しました: {}", next),
                None => {}
            }
        });
    }

    /// ストリームを読み切り、再検索の問い合わせがあれば返す
    async fn run_stream(self, start: SearchStart, signal: &web_sys::AbortSignal, url: &str) -> Option<String> {
        let SearchStart {
            ticket,
            registration,
            request,
        } = start;
        let mut dispatcher = EventDispatcher::new(ticket);

        let stream = match fetch::post_stream(url, &request, signal).await {
            Ok(stream) => stream,
            Err(e) => {
                self.with(|rt| dispatcher.fail(&mut rt.ctx, &mut rt.view, &e));
                return None;
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut last = Dispatch::Continue;
        let outcome = pump(&mut decoder, Abortable::new(stream, registration), |event| {
            last = self
                .with(|rt| dispatcher.dispatch(&mut rt.ctx, &mut rt.view, &event, now()))
                .unwrap_or(Dispatch::Ignored);
            last.control_flow()
        })
        .await;

        match outcome {
            Ok(PumpOutcome::Stopped) => last.resubmit().map(str::to_string),
            Ok(PumpOutcome::Completed) => {
                self.with(|rt| {
                    let session = rt.ctx.session();
                    if session.is_current(dispatcher.ticket()) && session.is_in_flight() {
                        if let Err(e) = dispatcher.finish(&mut rt.ctx, &mut rt.view, now()) {
                            log::warn!("ストリーム終了処理に失敗: {}", e);
                        }
                    }
                });
                None
            }
            Err(e) => {
                self.with(|rt| dispatcher.fail(&mut rt.ctx, &mut rt.view, &e));
                None
            }
        }
    }

    // ---- 選択・ページ ----

    /// カードからの選択（プールにあればプール由来として扱う）
    pub fn select(self, activity: Activity) {
        self.with(|rt| {
            let in_pool = activity.id().is_some_and(|id| rt.ctx.store().in_pool(id));
            let origin = if in_pool {
                SelectionOrigin::SuggestionPool
            } else {
                SelectionOrigin::SuggestionsPage
            };
            if let Err(e) = rt.ctx.select(activity, origin, &mut rt.view, now()) {
                log::warn!("選択に失敗: {}", e);
            }
        });
        self.after_update();
    }

    pub fn deselect(self, place_id: String) {
        self.with(|rt| {
            let hints = rt
                .ctx
                .store()
                .find(&place_id)
                .map(|a| CategoryHints {
                    explicit: Some(a.category.as_label().to_string()).filter(|l| !l.is_empty()),
                    name: a.name.clone(),
                    address: a.address.clone(),
                    ..Default::default()
                })
                .unwrap_or_default();
            if let Err(e) = rt.ctx.deselect(&place_id, hints, &mut rt.view, now()) {
                log::warn!("選択解除に失敗: {}", e);
            }
        });
        self.after_update();
    }

    pub fn navigate(self, page: ResultPage) {
        self.with(|rt| rt.ctx.user_navigate(page, &mut rt.view, now()));
        self.after_update();
    }

    /// 「次へ」
    pub fn next_page(self) {
        let next = self.with(|rt| rt.ctx.pages().next_page()).flatten();
        if let Some(page) = next {
            self.navigate(page);
        }
    }

    pub fn reset(self) {
        self.with(|rt| {
            if let Some(previous) = rt.abort.take() {
                previous.abort();
            }
            if let Err(e) = rt.ctx.reset(&mut rt.view) {
                log::warn!("リセットに失敗: {}", e);
            }
            rt.view.signals().chat.set(Vec::new());
            rt.sync_timer = None;
        });
        self.after_update();
    }

    // ---- キャッシュ同期 ----

    pub fn save_cache(self) {
        let decision = self.with(|rt| rt.ctx.save_cache_now(now(), &mut rt.view));
        match decision {
            Some(Ok(SyncDecision::Fire { snapshot, fingerprint })) => self.send_snapshot(snapshot, fingerprint),
            Some(Err(e)) => log::warn!("キャッシュ保存に失敗: {}", e),
            _ => {}
        }
        self.after_update();
    }

    pub fn dismiss_notice(self) {
        self.with(|rt| {
            rt.ctx.dismiss_sync_notice();
            rt.view.signals().notice.set(None);
        });
    }

    fn poll_sync(self) {
        let decision = self.with(|rt| {
            rt.sync_timer = None;
            rt.ctx.poll_sync(now())
        });
        match decision {
            Some(Ok(SyncDecision::Fire { snapshot, fingerprint })) => self.send_snapshot(snapshot, fingerprint),
            Some(Ok(SyncDecision::Wait)) => self.after_update(),
            Some(Ok(other)) => log::debug!("キャッシュ同期: {:?}", other),
            Some(Err(e)) => log::warn!("キャッシュ同期の判定に失敗: {}", e),
            None => {}
        }
    }

    fn send_snapshot(self, snapshot: CitySnapshot, fingerprint: String) {
        let Some(url) = self.with(|rt| rt.endpoints.save_city_cache()) else {
            return;
        };
        spawn_local(async move {
            let result: Result<SaveCityCacheResponse, String> = fetch::post_json(&url, &snapshot).await;
            self.with(|rt| match result {
                Ok(response) if response.success => rt.ctx.sync_succeeded(now(), &fingerprint, &mut rt.view),
                Ok(_) => rt.ctx.sync_failed(now(), "Salvataggio non riuscito", &mut rt.view),
                Err(e) => rt.ctx.sync_failed(now(), &e, &mut rt.view),
            });
            self.after_update();
        });
    }

    // ---- 旅程の保存・読み込み ----

    /// 「salva itinerario」: 未ログインなら退避してログインへ
    pub fn save_itinerary(self) {
        let Some(endpoints) = self.with(|rt| rt.endpoints.clone()) else {
            return;
        };
        spawn_local(async move {
            let auth: AuthStatus = fetch::get_json(&endpoints.auth_status()).await.unwrap_or_else(|e| {
                log::warn!("認証状態を取得できません: {}", e);
                AuthStatus::default()
            });
            let step = self.with(|rt| rt.ctx.prepare_itinerary_save(auth.authenticated));
            match step {
                Some(Ok(SaveStep::NothingSelected)) => self.report(
                    "Per salvare un itinerario, devi prima selezionare almeno un locale.",
                ),
                Some(Ok(SaveStep::LoginRequired)) => fetch::redirect(&endpoints.login_for_autosave()),
                Some(Ok(SaveStep::Send(payload))) => {
                    if self.send_itinerary(&endpoints, &payload).await {
                        fetch::redirect(&endpoints.reserved_area());
                    }
                }
                Some(Err(e)) => log::warn!("旅程を退避できません: {}", e),
                None => {}
            }
        });
    }

    /// 起動時: ログイン後の自動保存、または `/program/{id}` の読み込み
    pub fn restore_on_start(self) {
        let Some((endpoints, pending)) = self.with(|rt| (rt.endpoints.clone(), rt.ctx.pending_itinerary())) else {
            return;
        };
        if let Some(payload) = pending {
            spawn_local(async move {
                let auth: Result<AuthStatus, String> = fetch::get_json(&endpoints.auth_status()).await;
                if !auth.is_ok_and(|a| a.authenticated) {
                    log::info!("未ログインのため自動保存を保留");
                    return;
                }
                self.send_itinerary(&endpoints, &payload).await;
                self.with(|rt| {
                    if let Err(e) = rt.ctx.pending_itinerary_sent() {
                        log::warn!("退避した旅程を削除できません: {}", e);
                    }
                });
                fetch::redirect(&endpoints.reserved_area());
            });
            return;
        }
        let path = fetch::current_path().unwrap_or_default();
        if let Some(id) = program_id_from_path(&path) {
            self.load_program(id.to_string());
        }
    }

    /// 保存済みプログラムを読み込んで選択を置き換える
    pub fn load_program(self, program_id: String) {
        let Some(endpoints) = self.with(|rt| rt.endpoints.clone()) else {
            return;
        };
        self.with(|rt| rt.view.signals().status.set(Some("Caricamento programma...".to_string())));
        spawn_local(async move {
            let details: ProgramDetails = match fetch::get_json(&endpoints.program_details(&program_id)).await {
                Ok(details) => details,
                Err(e) => {
                    self.report(&e);
                    return;
                }
            };
            if !details.success {
                self.report(details.error.as_deref().unwrap_or("Programma non trovato"));
                return;
            }
            let mut records = details.activities();
            for record in &mut records {
                let Some(place_id) = record.id().map(str::to_string) else {
                    continue;
                };
                let extra: Result<PlaceDetails, String> =
                    fetch::get_json(&endpoints.place_details(&place_id)).await;
                match extra {
                    Ok(extra) => extra.enrich(record),
                    Err(e) => log::warn!("店舗詳細の取得に失敗 {}: {}", place_id, e),
                }
            }
            self.with(|rt| {
                rt.view.signals().status.set(None);
                if let Err(e) = rt.ctx.load_program(details.city_name.as_deref(), records, &mut rt.view, now()) {
                    log::warn!("プログラムを反映できません: {}", e);
                }
            });
            self.after_update();
        });
    }

    async fn send_itinerary(self, endpoints: &Endpoints, payload: &ItineraryPayload) -> bool {
        let result: Result<ApiResponse, String> = fetch::post_json(&endpoints.save_itinerary(), payload).await;
        match result {
            Ok(response) if response.success => {
                log::info!("旅程を保存: {} 件", payload.num_locali);
                true
            }
            Ok(response) => {
                let reason = response.error.unwrap_or_else(|| "Errore sconosciuto".to_string());
                self.report(&format!("Errore nel salvataggio itinerario: {}", reason));
                false
            }
            Err(e) => {
                self.report(&format!("Errore di rete nel salvataggio itinerario: {}", e));
                false
            }
        }
    }

    fn report(self, message: &str) {
        self.with(|rt| {
            rt.view.signals().status.set(None);
            rt.view.error(message);
        });
    }

    // ---- タイマー ----

    /// 操作のあとに: ページ表示の反映、同期・地図・並べ替えの予約
    fn after_update(self) {
        let reorder = self.with(|rt| {
            rt.view.signals().page.set(rt.ctx.pages().current());

            if rt.sync_timer.is_none() && !rt.ctx.sync().is_in_flight() {
                if let Some(due) = rt.ctx.sync().due_at() {
                    let delay = due.saturating_sub(now()) as u32;
                    rt.sync_timer = Some(Timeout::new(delay, move || self.poll_sync()));
                }
            }

            if let Some(notice) = rt.ctx.sync_notice(now()) {
                let delay = notice.expires_at.saturating_sub(now()) as u32;
                rt.notice_timer = Some(Timeout::new(delay, move || self.expire_notice()));
            }

            if rt.view.take_map_dirty() {
                rt.map_refresh.trigger(now());
            }
            rt.view.take_reorder()
        });
        self.schedule_map_refresh();

        if let Some(Some((origin, selection))) = reorder {
            spawn_local(async move {
                let Some(ids) = bridge::order_by_distance(origin, &selection).await else {
                    return;
                };
                self.with(|rt| {
                    if let Err(e) = rt.ctx.reorder(ids, &mut rt.view, now()) {
                        log::warn!("並べ替えに失敗: {}", e);
                    }
                });
                self.after_update();
            });
        }
    }

    fn expire_notice(self) {
        self.with(|rt| {
            rt.notice_timer = None;
            if rt.ctx.sync_notice(now()).is_none() {
                rt.view.signals().notice.set(None);
            }
        });
    }

    fn schedule_map_refresh(self) {
        self.with(|rt| {
            if let Some(due) = rt.map_refresh.due_at() {
                let delay = due.saturating_sub(now()) as u32;
                rt.map_timer = Some(Timeout::new(delay, move || self.refresh_map()));
            }
        });
    }

    fn refresh_map(self) {
        let selection = self.with(|rt| {
            rt.map_timer = None;
            rt.map_refresh
                .poll(now())
                .map(|coalesced| {
                    log::debug!("地図を更新（{} 回分）", coalesced);
                    rt.ctx.store().selection().to_vec()
                })
        });
        match selection {
            Some(Some(selection)) => bridge::update_itinerary(&selection),
            Some(None) => self.schedule_map_refresh(),
            None => {}
        }
    }
}

#[cfg(all(target_arch = "wasm32", test))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn wasm_stale_search_keeps_newer_search_running() {
        let signals = ViewSignals::new();
        let mut rt = Runtime::new(signals);
        let first = rt.ctx.begin_search("vini a Lecce", &mut rt.view).expect("begin failed").ticket;
        let second = rt.ctx.begin_search("hotel a Lecce", &mut rt.view).expect("begin failed").ticket;
        signals.searching.set(true);
        signals.status.set(Some("Ricerca in corso...".to_string()));

        assert!(!rt.settle(&first));
        assert!(signals.searching.get_untracked());
        assert!(signals.status.get_untracked().is_some());

        assert!(rt.settle(&second));
        assert!(!signals.searching.get_untracked());
        assert_eq!(signals.status.get_untracked(), None);
        rt.ctx.reset(&mut rt.view).expect("reset failed");
    }
}
