//! 都市キャッシュの同期ポリシー
//!
//! 現在地・選択リスト・提案プールをまとめたスナップショットを
//! `/api/save_city_cache` に送るかどうかを決める。
//!
//! - `request()` で明示的に要求されたときだけ
//! - 最後の要求からデバウンス時間が経過したあと
//! - 最後に保存できたスナップショットと指紋（SHA-256）が異なるとき
//!
//! 時刻はすべて呼び出し側から渡す（ミリ秒）。

use crate::error::Result;
use crate::types::Activity;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 選択リスト側のレコードに付けるカテゴリ
pub const SELECTION_CATEGORY_HINT: &str = "la_nostra_selezione";

/// 通知の表示時間
pub const NOTICE_DURATION_MS: u64 = 3000;

pub const DEFAULT_DEBOUNCE_MS: u64 = 1500;

/// キャッシュ保存用に平坦化したレコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub place_id: String,
    pub name: String,
    pub formatted_address: String,
    pub image: String,
    pub category: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub rating: Option<f64>,
    pub reviews_count: Option<u32>,
}

impl CacheRecord {
    pub fn from_activity(activity: &Activity, category_hint: Option<&str>) -> Self {
        let category = match category_hint {
            Some(hint) => hint.to_string(),
            None => activity.category.as_label().to_string(),
        };
        let coordinates = activity.coordinates.filter(|c| c.is_valid());
        Self {
            place_id: activity.id().unwrap_or_default().to_string(),
            name: activity.name.clone(),
            formatted_address: activity.address.clone(),
            image: activity.image_url.clone().unwrap_or_default(),
            category,
            lat: coordinates.map(|c| c.lat),
            lng: coordinates.map(|c| c.lng),
            rating: activity.rating,
            reviews_count: activity.review_count,
        }
    }
}

/// 都市キャッシュのスナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySnapshot {
    pub city: String,
    pub locals: Vec<CacheRecord>,
    pub locals_selection: Vec<CacheRecord>,
    pub locals_suggests: Vec<CacheRecord>,
}

impl CitySnapshot {
    /// 都市名がなければ `None`
    pub fn build(city: Option<&str>, selection: &[Activity], suggestions: &[Activity]) -> Option<Self> {
        let city = city.map(str::trim).filter(|c| !c.is_empty())?;

        let locals_selection: Vec<CacheRecord> = selection
            .iter()
            .map(|a| CacheRecord::from_activity(a, Some(SELECTION_CATEGORY_HINT)))
            .collect();
        let locals_suggests: Vec<CacheRecord> = suggestions
            .iter()
            .map(|a| CacheRecord::from_activity(a, None))
            .collect();
        let locals = locals_selection
            .iter()
            .chain(locals_suggests.iter())
            .cloned()
            .collect();

        Some(Self {
            city: city.to_string(),
            locals,
            locals_selection,
            locals_suggests,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// 正規化JSONのSHA-256（16進）
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

/// 保存結果の一時通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncNotice {
    pub ok: bool,
    pub message: String,
    pub expires_at: u64,
}

impl SyncNotice {
    pub fn saved(now: u64) -> Self {
        Self {
            ok: true,
            message: "Ricerca salvata!".to_string(),
            expires_at: now + NOTICE_DURATION_MS,
        }
    }

    pub fn failed(now: u64, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            expires_at: now + NOTICE_DURATION_MS,
        }
    }

    pub fn missing_city(now: u64) -> Self {
        Self::failed(now, "Dati mancanti: selezione o città assente")
    }

    pub fn is_visible(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

/// 送信しない理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoCity,
    Unchanged,
}

/// `poll()` の判定
#[derive(Debug, Clone, PartialEq)]
pub enum SyncDecision {
    /// 要求なし
    Idle,
    /// デバウンス中、または送信中
    Wait,
    Skip(SkipReason),
    /// このスナップショットを送る。結果は `mark_sent` / `mark_failed` で返す
    Fire { snapshot: CitySnapshot, fingerprint: String },
}

#[derive(Debug, Clone)]
pub struct CacheSyncPolicy {
    debounce_ms: u64,
    requested_at: Option<u64>,
    last_saved: Option<String>,
    in_flight: Option<String>,
    notice: Option<SyncNotice>,
}

impl Default for CacheSyncPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}

impl CacheSyncPolicy {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            requested_at: None,
            last_saved: None,
            in_flight: None,
            notice: None,
        }
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn is_pending(&self) -> bool {
        self.requested_at.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_saved(&self) -> Option<&str> {
        self.last_saved.as_deref()
    }

    /// 同期を要求（デバウンス窓を開き直す）
    pub fn request(&mut self, now: u64) {
        self.requested_at = Some(now);
    }

    /// 次に `poll` してよい時刻
    pub fn due_at(&self) -> Option<u64> {
        self.requested_at.map(|t| t + self.debounce_ms)
    }

    pub fn poll(&mut self, now: u64, snapshot: Option<CitySnapshot>) -> Result<SyncDecision> {
        let Some(due) = self.due_at() else {
            return Ok(SyncDecision::Idle);
        };
        if now < due || self.in_flight.is_some() {
            return Ok(SyncDecision::Wait);
        }
        self.requested_at = None;

        let Some(snapshot) = snapshot else {
            log::debug!("都市が未確定のためキャッシュ同期をスキップ");
            return Ok(SyncDecision::Skip(SkipReason::NoCity));
        };
        let fingerprint = snapshot.fingerprint()?;
        if self.last_saved.as_deref() == Some(fingerprint.as_str()) {
            log::debug!("キャッシュ内容に変更なし: {}", snapshot.city);
            return Ok(SyncDecision::Skip(SkipReason::Unchanged));
        }
        self.in_flight = Some(fingerprint.clone());
        Ok(SyncDecision::Fire { snapshot, fingerprint })
    }

    /// 手動保存: デバウンスと指紋比較を経ずに送る
    pub fn fire_now(&mut self, now: u64, snapshot: Option<CitySnapshot>) -> Result<SyncDecision> {
        self.requested_at = None;
        let Some(snapshot) = snapshot else {
            self.notice = Some(SyncNotice::missing_city(now));
            return Ok(SyncDecision::Skip(SkipReason::NoCity));
        };
        let fingerprint = snapshot.fingerprint()?;
        self.in_flight = Some(fingerprint.clone());
        Ok(SyncDecision::Fire { snapshot, fingerprint })
    }

    pub fn mark_sent(&mut self, now: u64, fingerprint: &str) -> &SyncNotice {
        log::info!("都市キャッシュを保存しました");
        self.in_flight = None;
        self.last_saved = Some(fingerprint.to_string());
        self.notice.insert(SyncNotice::saved(now))
    }

    /// 失敗: 保存済み指紋は更新しないので、次の要求で再送できる
    pub fn mark_failed(&mut self, now: u64, message: impl Into<String>) -> &SyncNotice {
        let message = message.into();
        log::warn!("都市キャッシュの保存に失敗: {}", message);
        self.in_flight = None;
        self.notice.insert(SyncNotice::failed(now, message))
    }

    /// 表示中の通知（期限切れなら破棄）
    pub fn notice(&mut self, now: u64) -> Option<&SyncNotice> {
        if self.notice.as_ref().is_some_and(|n| !n.is_visible(now)) {
            self.notice = None;
        }
        self.notice.as_ref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// セッションリセット
    pub fn reset(&mut self) {
        self.requested_at = None;
        self.in_flight = None;
        self.last_saved = None;
        self.notice = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::types::Coordinates;

    fn act(id: &str, category: Category) -> Activity {
        let mut a = Activity::new(id, &format!("Locale {}", id));
        a.category = category;
        a
    }

    fn snapshot(selection: &[Activity]) -> Option<CitySnapshot> {
        CitySnapshot::build(Some("Bari"), selection, &[act("s1", Category::Wine)])
    }

    #[test]
    fn test_snapshot_layout() {
        let mut sel = act("a", Category::Dining);
        sel.coordinates = Some(Coordinates::new(41.0, 16.0));
        sel.review_count = Some(12);
        let snap = CitySnapshot::build(Some(" Bari "), &[sel], &[act("s1", Category::Wine)]).unwrap();

        assert_eq!(snap.city, "Bari");
        assert_eq!(snap.locals.len(), 2);
        assert_eq!(snap.locals_selection[0].category, SELECTION_CATEGORY_HINT);
        assert_eq!(snap.locals_selection[0].lat, Some(41.0));
        assert_eq!(snap.locals_selection[0].reviews_count, Some(12));
        assert_eq!(snap.locals_suggests[0].category, "vini");
        assert_eq!(snap.locals_suggests[0].lat, None);
    }

    #[test]
    fn test_snapshot_requires_city() {
        assert!(CitySnapshot::build(None, &[], &[]).is_none());
        assert!(CitySnapshot::build(Some("  "), &[], &[]).is_none());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = snapshot(&[act("a", Category::Dining)]).unwrap();
        let b = snapshot(&[act("a", Category::Dining)]).unwrap();
        let c = snapshot(&[act("b", Category::Dining)]).unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn test_idle_without_request() {
        let mut policy = CacheSyncPolicy::new(1000);
        assert_eq!(policy.poll(5000, snapshot(&[])).unwrap(), SyncDecision::Idle);
    }

    #[test]
    fn test_debounce_window() {
        let mut policy = CacheSyncPolicy::new(1000);
        policy.request(0);
        assert_eq!(policy.poll(500, snapshot(&[])).unwrap(), SyncDecision::Wait);
        // 再要求で窓が延びる
        policy.request(800);
        assert_eq!(policy.poll(1200, snapshot(&[])).unwrap(), SyncDecision::Wait);
        assert!(matches!(
            policy.poll(1800, snapshot(&[])).unwrap(),
            SyncDecision::Fire { .. }
        ));
        assert!(!policy.is_pending());
    }

    #[test]
    fn test_unchanged_snapshot_is_skipped() {
        let mut policy = CacheSyncPolicy::new(0);
        policy.request(0);
        let SyncDecision::Fire { fingerprint, .. } = policy.poll(0, snapshot(&[])).unwrap() else {
            panic!("expected fire");
        };
        policy.mark_sent(10, &fingerprint);

        policy.request(20);
        assert_eq!(
            policy.poll(20, snapshot(&[])).unwrap(),
            SyncDecision::Skip(SkipReason::Unchanged)
        );

        policy.request(30);
        assert!(matches!(
            policy.poll(30, snapshot(&[act("x", Category::Lodging)])).unwrap(),
            SyncDecision::Fire { .. }
        ));
    }

    #[test]
    fn test_no_city_is_skipped() {
        let mut policy = CacheSyncPolicy::new(0);
        policy.request(0);
        assert_eq!(policy.poll(0, None).unwrap(), SyncDecision::Skip(SkipReason::NoCity));
        assert_eq!(policy.poll(0, None).unwrap(), SyncDecision::Idle);
    }

    #[test]
    fn test_failure_notice_and_retry() {
        let mut policy = CacheSyncPolicy::new(0);
        policy.request(0);
        assert!(matches!(policy.poll(0, snapshot(&[])).unwrap(), SyncDecision::Fire { .. }));
        // 送信中は待つ
        policy.request(1);
        assert_eq!(policy.poll(1, snapshot(&[])).unwrap(), SyncDecision::Wait);

        let notice = policy.mark_failed(100, "Errore di rete. Riprovare.").clone();
        assert!(!notice.ok);
        assert!(policy.notice(3099).is_some());
        assert!(policy.notice(3100).is_none());

        assert!(matches!(policy.poll(200, snapshot(&[])).unwrap(), SyncDecision::Fire { .. }));
    }

    #[test]
    fn test_fire_now_ignores_fingerprint() {
        let mut policy = CacheSyncPolicy::new(10_000);
        let SyncDecision::Fire { fingerprint, .. } = policy.fire_now(0, snapshot(&[])).unwrap() else {
            panic!("expected fire");
        };
        policy.mark_sent(0, &fingerprint);
        assert!(matches!(policy.fire_now(1, snapshot(&[])).unwrap(), SyncDecision::Fire { .. }));

        assert_eq!(policy.fire_now(2, None).unwrap(), SyncDecision::Skip(SkipReason::NoCity));
        assert!(!policy.notice(2).unwrap().ok);
    }

    #[test]
    fn test_dismiss_notice() {
        let mut policy = CacheSyncPolicy::new(0);
        policy.mark_sent(0, "abc");
        assert!(policy.notice(1).unwrap().ok);
        policy.dismiss_notice();
        assert!(policy.notice(1).is_none());
    }
}
