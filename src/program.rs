//! 保存済みプログラム（旅程）の送受信
//!
//! 保存・ログイン後の自動保存・読み込み・更新・削除。
//! 送信先は [`ProgramBackend`] 越しに呼ぶ（本番は [`crate::client::ApiClient`]）。

use crate::error::Result;
use crate::runner::now_ms;
use itinerary_common::api::{ApiResponse, AuthStatus, PlaceDetails, UpdateProgramRequest};
use itinerary_common::{AppContext, Frontend, ItineraryPayload, KeyValueStore, ProgramDetails, SaveStep};

/// プログラムAPIの送信先
#[allow(async_fn_in_trait)]
pub trait ProgramBackend {
    async fn auth_status(&self) -> Result<AuthStatus>;
    async fn save_itinerary(&self, payload: &ItineraryPayload) -> Result<ApiResponse>;
    async fn update_program(&self, request: &UpdateProgramRequest) -> Result<ApiResponse>;
    async fn program_details(&self, program_id: &str) -> Result<ProgramDetails>;
    async fn delete_program(&self, program_id: &str) -> Result<ApiResponse>;
    async fn place_details(&self, place_id: &str) -> Result<PlaceDetails>;
    /// 自動保存へ戻るログインURL
    fn login_url(&self) -> String;
}

/// 保存・更新の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveResult {
    /// 選択が空
    NothingSelected,
    /// 未ログイン: このURLでログインしてから `program resume`
    LoginRequired(String),
    Saved,
    /// サーバーが拒否した
    Rejected(String),
}

impl From<ApiResponse> for SaveResult {
    fn from(response: ApiResponse) -> Self {
        if response.success {
            SaveResult::Saved
        } else {
            SaveResult::Rejected(response.error.unwrap_or_else(|| "Errore sconosciuto".into()))
        }
    }
}

/// 現在の選択を旅程として保存（未ログインなら退避してログインURLを返す）
pub async fn save_itinerary<S, B>(ctx: &mut AppContext<S>, backend: &B) -> Result<SaveResult>
where
    S: KeyValueStore,
    B: ProgramBackend,
{
    if ctx.store().selection().is_empty() {
        return Ok(SaveResult::NothingSelected);
    }
    let auth = backend.auth_status().await?;
    match ctx.prepare_itinerary_save(auth.authenticated)? {
        SaveStep::NothingSelected => Ok(SaveResult::NothingSelected),
        SaveStep::LoginRequired => Ok(SaveResult::LoginRequired(backend.login_url())),
        SaveStep::Send(payload) => Ok(backend.save_itinerary(&payload).await?.into()),
    }
}

/// ログイン後の自動保存
///
/// 退避した旅程がなければ `None`。未ログインのままなら退避を残す。
/// 送信したら成否にかかわらず退避を消す。
pub async fn resume_pending_save<S, B>(ctx: &mut AppContext<S>, backend: &B) -> Result<Option<SaveResult>>
where
    S: KeyValueStore,
    B: ProgramBackend,
{
    let Some(payload) = ctx.pending_itinerary() else {
        return Ok(None);
    };
    if !backend.auth_status().await?.authenticated {
        log::info!("未ログインのため自動保存を保留");
        return Ok(Some(SaveResult::LoginRequired(backend.login_url())));
    }
    let sent = backend.save_itinerary(&payload).await;
    ctx.pending_itinerary_sent()?;
    Ok(Some(sent?.into()))
}

/// 既存プログラムを現在の選択で更新（要ログイン）
pub async fn update_program<S, B>(ctx: &mut AppContext<S>, backend: &B, program_id: &str) -> Result<SaveResult>
where
    S: KeyValueStore,
    B: ProgramBackend,
{
    // 認証確認に失敗したら未ログイン扱い
    let authenticated = match backend.auth_status().await {
        Ok(auth) => auth.authenticated,
        Err(e) => {
            log::warn!("認証状態を取得できません: {}", e);
            false
        }
    };
    if !authenticated {
        return Ok(SaveResult::LoginRequired(backend.login_url()));
    }
    let request = ctx.itinerary_payload().into_update(program_id);
    let result: SaveResult = backend.update_program(&request).await?.into();
    log::info!("プログラム更新 {}: {:?}", program_id, result);
    Ok(result)
}

/// 保存済みプログラムを読み込み、現在地と選択を置き換える
///
/// 店舗ごとに詳細を取得して欠けた項目を補う（取得できなければそのまま）。
pub async fn load_program<S, F, B>(
    ctx: &mut AppContext<S>,
    frontend: &mut F,
    backend: &B,
    program_id: &str,
) -> Result<bool>
where
    S: KeyValueStore,
    F: Frontend,
    B: ProgramBackend,
{
    let details = backend.program_details(program_id).await?;
    if !details.success {
        log::warn!("プログラムを読み込めません {}: {:?}", program_id, details.error);
        frontend.error(details.error.as_deref().unwrap_or("Programma non trovato"));
        return Ok(false);
    }

    let mut records = details.activities();
    for record in &mut records {
        let Some(place_id) = record.id().map(str::to_string) else {
            continue;
        };
        match backend.place_details(&place_id).await {
            Ok(extra) => extra.enrich(record),
            Err(e) => log::warn!("店舗詳細の取得に失敗 {}: {}", place_id, e),
        }
    }
    ctx.load_program(details.city_name.as_deref(), records, frontend, now_ms())?;
    Ok(true)
}

/// プログラムを削除
pub async fn delete_program<B: ProgramBackend>(backend: &B, program_id: &str) -> Result<SaveResult> {
    let result: SaveResult = backend.delete_program(program_id).await?.into();
    log::info!("プログラム削除 {}: {:?}", program_id, result);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use futures::executor::block_on;
    use itinerary_common::persist::keys;
    use itinerary_common::{Activity, ContextConfig, Headless, MemoryStore, SelectionOrigin};
    use serde_json::json;
    use std::cell::RefCell;

    /// 呼び出しを記録するだけの送信先
    #[derive(Default)]
    struct FakeBackend {
        authenticated: bool,
        reject: Option<String>,
        details: ProgramDetails,
        offline: bool,
        calls: RefCell<Vec<String>>,
        saved: RefCell<Vec<ItineraryPayload>>,
        updated: RefCell<Vec<UpdateProgramRequest>>,
    }

    impl FakeBackend {
        fn logged_in() -> Self {
            Self {
                authenticated: true,
                ..Default::default()
            }
        }

        fn called(&self, name: &str) {
            self.calls.borrow_mut().push(name.to_string());
        }

        fn reply(&self) -> ApiResponse {
            ApiResponse {
                success: self.reject.is_none(),
                error: self.reject.clone(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl ProgramBackend for FakeBackend {
        async fn auth_status(&self) -> Result<AuthStatus> {
            self.called("auth_status");
            Ok(AuthStatus {
                authenticated: self.authenticated,
            })
        }

        async fn save_itinerary(&self, payload: &ItineraryPayload) -> Result<ApiResponse> {
            self.called("save_itinerary");
            if self.offline {
                return Err(AppError::ServerStatus(502));
            }
            self.saved.borrow_mut().push(payload.clone());
            Ok(self.reply())
        }

        async fn update_program(&self, request: &UpdateProgramRequest) -> Result<ApiResponse> {
            self.called("update_program");
            self.updated.borrow_mut().push(request.clone());
            Ok(self.reply())
        }

        async fn program_details(&self, program_id: &str) -> Result<ProgramDetails> {
            self.called(&format!("program_details:{}", program_id));
            Ok(self.details.clone())
        }

        async fn delete_program(&self, program_id: &str) -> Result<ApiResponse> {
            self.called(&format!("delete_program:{}", program_id));
            Ok(self.reply())
        }

        async fn place_details(&self, place_id: &str) -> Result<PlaceDetails> {
            self.called(&format!("place_details:{}", place_id));
            if place_id == "missing" {
                return Err(AppError::ServerStatus(404));
            }
            Ok(PlaceDetails {
                formatted_address: Some(format!("Via {}", place_id)),
                rating: Some(4.5),
                ..Default::default()
            })
        }

        fn login_url(&self) -> String {
            "/login?next=x".into()
        }
    }

    fn ctx_with_selection() -> AppContext<MemoryStore> {
        let mut ctx = AppContext::new(MemoryStore::new(), ContextConfig::default());
        ctx.set_location("Lecce", &mut Headless).unwrap();
        ctx.select(Activity::new("a", "Enoteca"), SelectionOrigin::Other, &mut Headless, 0).unwrap();
        ctx
    }

    #[test]
    fn test_save_with_empty_selection_skips_backend() {
        let mut ctx = AppContext::new(MemoryStore::new(), ContextConfig::default());
        let backend = FakeBackend::logged_in();
        let result = block_on(save_itinerary(&mut ctx, &backend)).unwrap();
        assert_eq!(result, SaveResult::NothingSelected);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_save_when_logged_in() {
        let mut ctx = ctx_with_selection();
        let backend = FakeBackend::logged_in();
        let result = block_on(save_itinerary(&mut ctx, &backend)).unwrap();
        assert_eq!(result, SaveResult::Saved);
        assert_eq!(backend.calls(), vec!["auth_status", "save_itinerary"]);
        let saved = backend.saved.borrow();
        assert_eq!(saved[0].city, "Lecce");
        assert_eq!(saved[0].locali[0].place_id, "a");
    }

    #[test]
    fn test_save_rejected_reports_error() {
        let mut ctx = ctx_with_selection();
        let backend = FakeBackend {
            reject: Some("quota".into()),
            ..FakeBackend::logged_in()
        };
        let result = block_on(save_itinerary(&mut ctx, &backend)).unwrap();
        assert_eq!(result, SaveResult::Rejected("quota".into()));
    }

    #[test]
    fn test_save_after_login_round_trip() {
        let mut ctx = ctx_with_selection();
        let logged_out = FakeBackend::default();
        let result = block_on(save_itinerary(&mut ctx, &logged_out)).unwrap();
        assert_eq!(result, SaveResult::LoginRequired("/login?next=x".into()));
        assert_eq!(logged_out.calls(), vec!["auth_status"]);
        assert_eq!(ctx.storage().get(keys::SAVE_AFTER_LOGIN).as_deref(), Some("1"));

        // まだ未ログイン: 退避は残る
        let pending = block_on(resume_pending_save(&mut ctx, &logged_out)).unwrap();
        assert!(matches!(pending, Some(SaveResult::LoginRequired(_))));
        assert!(ctx.pending_itinerary().is_some());

        let logged_in = FakeBackend::logged_in();
        let resumed = block_on(resume_pending_save(&mut ctx, &logged_in)).unwrap();
        assert_eq!(resumed, Some(SaveResult::Saved));
        assert_eq!(logged_in.saved.borrow()[0].num_locali, 1);
        assert!(ctx.pending_itinerary().is_none());

        let again = block_on(resume_pending_save(&mut ctx, &logged_in)).unwrap();
        assert_eq!(again, None);
    }

    #[test]
    fn test_failed_resume_still_clears_pending() {
        let mut ctx = ctx_with_selection();
        block_on(save_itinerary(&mut ctx, &FakeBackend::default())).unwrap();

        let offline = FakeBackend {
            offline: true,
            ..FakeBackend::logged_in()
        };
        assert!(block_on(resume_pending_save(&mut ctx, &offline)).is_err());
        assert!(ctx.pending_itinerary().is_none());
        assert_eq!(ctx.storage().get(keys::PENDING_ITINERARY_PAYLOAD), None);
    }

    #[test]
    fn test_update_requires_login() {
        let mut ctx = ctx_with_selection();
        let backend = FakeBackend::default();
        let result = block_on(update_program(&mut ctx, &backend, "7")).unwrap();
        assert!(matches!(result, SaveResult::LoginRequired(_)));
        assert!(backend.updated.borrow().is_empty());
    }

    #[test]
    fn test_update_sends_program_id() {
        let mut ctx = ctx_with_selection();
        let backend = FakeBackend::logged_in();
        let result = block_on(update_program(&mut ctx, &backend, "7")).unwrap();
        assert_eq!(result, SaveResult::Saved);
        let updated = backend.updated.borrow();
        assert_eq!(updated[0].program_id, "7");
        assert_eq!(updated[0].city, "Lecce");
        assert_eq!(updated[0].num_locali, 1);
    }

    #[test]
    fn test_load_program_enriches_and_replaces() {
        let mut ctx = ctx_with_selection();
        let backend = FakeBackend {
            details: ProgramDetails {
                success: true,
                error: None,
                city_name: Some("Otranto".into()),
                locals: vec![
                    json!({ "place_id": "p1", "name": "Frantoio" }),
                    json!({ "place_id": "missing", "name": "Cantina", "address": "Via Nota" }),
                ],
            },
            ..FakeBackend::logged_in()
        };
        assert!(block_on(load_program(&mut ctx, &mut Headless, &backend, "9")).unwrap());
        assert_eq!(ctx.location(), Some("Otranto"));

        let selection = ctx.store().selection();
        assert_eq!(selection.len(), 2);
        assert_eq!(selection[0].address, "Via p1");
        assert_eq!(selection[0].rating, Some(4.5));
        assert_eq!(selection[1].address, "Via Nota");
        assert_eq!(
            backend.calls(),
            vec!["program_details:9", "place_details:p1", "place_details:missing"]
        );
    }

    #[test]
    fn test_failed_program_keeps_selection() {
        let mut ctx = ctx_with_selection();
        let backend = FakeBackend {
            details: ProgramDetails {
                success: false,
                error: Some("Programma non trovato".into()),
                ..Default::default()
            },
            ..FakeBackend::logged_in()
        };
        assert!(!block_on(load_program(&mut ctx, &mut Headless, &backend, "404")).unwrap());
        assert_eq!(ctx.store().selection().len(), 1);
        assert_eq!(ctx.location(), Some("Lecce"));
    }

    #[test]
    fn test_delete_program() {
        let backend = FakeBackend::logged_in();
        assert_eq!(block_on(delete_program(&backend, "3")).unwrap(), SaveResult::Saved);
        assert_eq!(backend.calls(), vec!["delete_program:3"]);
    }
}
