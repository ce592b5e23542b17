//! 検索ストリームの実行
//!
//! ライブ検索とリプレイで同じ経路を通す: `Abortable` で包んだチャンク列を
//! [`pump`] でデコードし、フレームごとに [`EventDispatcher`] へ渡す。

use crate::client::ApiClient;
use crate::error::Result;
use crate::terminal::TerminalFrontend;
use futures::future::{AbortRegistration, Abortable};
use futures::Stream;
use itinerary_common::{
    pump, AppContext, CitySnapshot, Dispatch, EventDispatcher, FrameDecoder, Frontend,
    KeyValueStore, PumpOutcome, SearchTicket, SyncDecision,
};
use std::convert::Infallible;
use std::time::Duration;

/// 再検索（reload_page / ricarico）の連鎖の上限
pub const MAX_RESUBMITS: usize = 3;

const SPINNER_MESSAGE: &str = "Ricerca in corso...";

/// 現在時刻 (ms)
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// ストリームの終わり方
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// 終端まで読んだ
    Finished,
    /// 再読込シグナル: この問い合わせで検索し直す
    Resubmit(String),
    /// 再検索なしで打ち切った
    Stopped,
    /// 新しい検索またはリセットで中断された
    Aborted,
    /// 通信エラー（エラーは表示済み）
    Failed,
}

/// 1本のストリームを最後まで処理する
pub async fn drive<S, F, St, B, E>(
    ctx: &mut AppContext<S>,
    frontend: &mut F,
    ticket: SearchTicket,
    registration: AbortRegistration,
    stream: St,
) -> Result<StreamEnd>
where
    S: KeyValueStore,
    F: Frontend,
    St: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut dispatcher = EventDispatcher::new(ticket);
    let mut decoder = FrameDecoder::new();
    let stream = Abortable::new(stream, registration);
    let mut last = Dispatch::Continue;

    let outcome = pump(&mut decoder, stream, |event| {
        last = dispatcher.dispatch(ctx, frontend, &event, now_ms());
        last.control_flow()
    })
    .await;

    match outcome {
        Ok(PumpOutcome::Stopped) => Ok(match last.resubmit() {
            Some(query) => StreamEnd::Resubmit(query.to_string()),
            None => StreamEnd::Stopped,
        }),
        Ok(PumpOutcome::Completed) => {
            if !ctx.session().is_current(dispatcher.ticket()) || !ctx.session().is_in_flight() {
                log::debug!("中断されたストリーム: {} フレーム", dispatcher.frames());
                return Ok(StreamEnd::Aborted);
            }
            dispatcher.finish(ctx, frontend, now_ms())?;
            Ok(StreamEnd::Finished)
        }
        Err(e) => {
            dispatcher.fail(ctx, frontend, &e.to_string());
            Ok(StreamEnd::Failed)
        }
    }
}

/// バックエンドに問い合わせて検索する（再読込シグナルなら問い合わせ直す）
pub async fn run_search<S: KeyValueStore>(
    ctx: &mut AppContext<S>,
    frontend: &mut TerminalFrontend,
    client: &ApiClient,
    query: &str,
) -> Result<StreamEnd> {
    let mut query = query.to_string();
    let mut resubmits = 0;
    loop {
        let start = ctx.begin_search(&query, frontend)?;
        frontend.start_spinner(SPINNER_MESSAGE);
        let end = match client.open_search(&start.request).await {
            Ok(stream) => drive(ctx, frontend, start.ticket, start.registration, stream).await,
            Err(e) => {
                EventDispatcher::new(start.ticket).fail(ctx, frontend, &e.to_string());
                Ok(StreamEnd::Failed)
            }
        };
        frontend.finish_spinner();
        apply_reorder(ctx, frontend)?;

        match end? {
            StreamEnd::Resubmit(next) if resubmits < MAX_RESUBMITS => {
                resubmits += 1;
                log::info!("再検索 ({}/{}): {}", resubmits, MAX_RESUBMITS, next);
                query = next;
            }
            end => return Ok(end),
        }
    }
}

/// 記録済みのNDJSONを `chunk_size` バイトずつ流し込む
pub async fn replay<S, F>(
    ctx: &mut AppContext<S>,
    frontend: &mut F,
    query: &str,
    content: &[u8],
    chunk_size: usize,
) -> Result<StreamEnd>
where
    S: KeyValueStore,
    F: Frontend,
{
    let start = ctx.begin_search(query, frontend)?;
    let chunks: Vec<std::result::Result<Vec<u8>, Infallible>> = content
        .chunks(chunk_size.max(1))
        .map(|chunk| Ok(chunk.to_vec()))
        .collect();
    log::debug!("リプレイ: {} バイト / {} チャンク", content.len(), chunks.len());
    drive(ctx, frontend, start.ticket, start.registration, futures::stream::iter(chunks)).await
}

/// 並べ替え要求があれば距離順で反映
pub fn apply_reorder<S: KeyValueStore>(ctx: &mut AppContext<S>, frontend: &mut TerminalFrontend) -> Result<()> {
    if let Some(ids) = frontend.take_reorder() {
        ctx.reorder(ids, frontend, now_ms())?;
    }
    Ok(())
}

/// デバウンス中の同期要求を待ってから送る
pub async fn flush_sync<S, F>(ctx: &mut AppContext<S>, frontend: &mut F, client: &ApiClient) -> Result<()>
where
    S: KeyValueStore,
    F: Frontend,
{
    loop {
        if ctx.sync().is_in_flight() {
            return Ok(());
        }
        let now = now_ms();
        match ctx.poll_sync(now)? {
            SyncDecision::Wait => {
                let wait = ctx.sync().due_at().map_or(0, |due| due.saturating_sub(now));
                tokio::time::sleep(Duration::from_millis(wait.max(10))).await;
            }
            SyncDecision::Fire { snapshot, fingerprint } => {
                send_snapshot(ctx, frontend, client, &snapshot, &fingerprint).await;
                return Ok(());
            }
            SyncDecision::Skip(reason) => {
                log::debug!("キャッシュ同期なし: {:?}", reason);
                return Ok(());
            }
            SyncDecision::Idle => return Ok(()),
        }
    }
}

/// 手動保存
pub async fn save_cache_now<S, F>(ctx: &mut AppContext<S>, frontend: &mut F, client: &ApiClient) -> Result<bool>
where
    S: KeyValueStore,
    F: Frontend,
{
    match ctx.save_cache_now(now_ms(), frontend)? {
        SyncDecision::Fire { snapshot, fingerprint } => {
            Ok(send_snapshot(ctx, frontend, client, &snapshot, &fingerprint).await)
        }
        _ => Ok(false),
    }
}

async fn send_snapshot<S, F>(
    ctx: &mut AppContext<S>,
    frontend: &mut F,
    client: &ApiClient,
    snapshot: &CitySnapshot,
    fingerprint: &str,
) -> bool
where
    S: KeyValueStore,
    F: Frontend,
{
    match client.save_city_cache(snapshot).await {
        Ok(response) if response.success => {
            log::debug!("保存先: {:?} / {:?}", response.selection_path, response.suggests_path);
            ctx.sync_succeeded(now_ms(), fingerprint, frontend);
            true
        }
        Ok(_) => {
            ctx.sync_failed(now_ms(), "Salvataggio non riuscito", frontend);
            false
        }
        Err(e) => {
            ctx.sync_failed(now_ms(), &e.to_string(), frontend);
            false
        }
    }
}
