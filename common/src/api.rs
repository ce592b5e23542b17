//! バックエンドREST APIの型とエンドポイント
//!
//! 送受信の本体（reqwest / fetch）は各フロントエンドが持つ。

use crate::category::is_suggestions_page_category;
use crate::types::{encode_query, Activity, ChatTurn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// エンドポイントURLの組み立て
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    /// `base` が空なら同一オリジンの相対パス
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn search(&self) -> String {
        self.url("/search")
    }

    pub fn place_details(&self, place_id: &str) -> String {
        self.url(&format!("/api/place_details/{}", encode_query(place_id)))
    }

    pub fn program_details(&self, program_id: &str) -> String {
        self.url(&format!("/api/program_details/{}", encode_query(program_id)))
    }

    pub fn save_itinerary(&self) -> String {
        self.url("/api/save_itinerary")
    }

    pub fn update_program(&self) -> String {
        self.url("/api/update_program")
    }

    pub fn save_city_cache(&self) -> String {
        self.url("/api/save_city_cache")
    }

    pub fn auth_status(&self) -> String {
        self.url("/api/auth_status")
    }

    pub fn delete_program(&self) -> String {
        self.url("/api/delete_program")
    }

    /// 保存済みプログラムの一覧（ログイン後の遷移先）
    pub fn reserved_area(&self) -> String {
        self.url("/area_riservata")
    }

    /// ログイン後に自動保存へ戻るログインURL
    pub fn login_for_autosave(&self) -> String {
        self.url(&format!("/login?next={}", encode_query("/area_riservata?autosalva=1")))
    }
}

/// `/program/{id}` のページならプログラムID
pub fn program_id_from_path(path: &str) -> Option<&str> {
    let rest = path.split(['?', '#']).next()?.strip_prefix("/program/")?;
    let id = rest.trim_end_matches('/');
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

/// 検索リクエスト本文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpeningHours {
    pub open_now: Option<bool>,
    pub weekday_text: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceReview {
    pub author_name: String,
    pub rating: Option<f64>,
    pub text: String,
}

/// `/api/place_details/{id}` の応答
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceDetails {
    pub name: Option<String>,
    pub formatted_address: Option<String>,
    pub formatted_phone_number: Option<String>,
    pub international_phone_number: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<u32>,
    pub price_level: Option<u8>,
    pub types: Vec<String>,
    pub opening_hours: Option<OpeningHours>,
    pub reviews: Vec<PlaceReview>,
    pub photo_url: Option<String>,
    pub error: Option<String>,
}

impl PlaceDetails {
    /// 取得した詳細で欠けている項目を補う
    pub fn enrich(&self, activity: &mut Activity) {
        if activity.name.trim().is_empty() {
            if let Some(name) = &self.name {
                activity.name = name.clone();
            }
        }
        if activity.address.trim().is_empty() {
            if let Some(address) = &self.formatted_address {
                activity.address = address.clone();
            }
        }
        if activity.rating.is_none() {
            activity.rating = self.rating;
        }
        if activity.review_count.is_none() {
            activity.review_count = self.user_ratings_total;
        }
        if activity.image_url.is_none() {
            activity.image_url = self.photo_url.clone();
        }
    }
}

/// 保存旅程の1件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItineraryLocal {
    pub name: String,
    pub address: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub place_id: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub image: String,
}

impl From<&Activity> for ItineraryLocal {
    fn from(activity: &Activity) -> Self {
        let kind = if activity.category.is_classified() {
            activity.category.as_label().to_string()
        } else {
            "ristorante".to_string()
        };
        let coordinates = activity.coordinates.filter(|c| c.is_valid());
        Self {
            name: activity.name.clone(),
            address: activity.address.clone(),
            kind,
            place_id: activity.id().unwrap_or_default().to_string(),
            lat: coordinates.map(|c| c.lat),
            lng: coordinates.map(|c| c.lng),
            image: activity.image_url.clone().unwrap_or_default(),
        }
    }
}

/// `/api/save_itinerary` の本文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItineraryPayload {
    pub city: String,
    pub num_locali: usize,
    pub locali: Vec<ItineraryLocal>,
    pub page1_html: String,
    pub page3_ranked: Map<String, Value>,
    pub ranked: Map<String, Value>,
    pub selection_html: String,
}

impl ItineraryPayload {
    /// 提案ページのカテゴリだけを `page3_ranked` に残す
    pub fn build(
        city: Option<&str>,
        selection: &[Activity],
        page1_html: &str,
        ranked_results: &Map<String, Value>,
        selection_html: &str,
    ) -> Self {
        let page3_ranked: Map<String, Value> = ranked_results
            .iter()
            .filter(|(category, _)| is_suggestions_page_category(category))
            .map(|(category, value)| (category.clone(), value.clone()))
            .collect();
        let locali: Vec<ItineraryLocal> = selection.iter().map(ItineraryLocal::from).collect();

        Self {
            city: city.unwrap_or_default().to_string(),
            num_locali: locali.len(),
            locali,
            page1_html: page1_html.to_string(),
            ranked: page3_ranked.clone(),
            page3_ranked,
            selection_html: selection_html.to_string(),
        }
    }

    /// 既存プログラムの更新用
    pub fn into_update(self, program_id: &str) -> UpdateProgramRequest {
        UpdateProgramRequest {
            program_id: program_id.to_string(),
            city: self.city,
            num_locali: self.num_locali,
            locali: self.locali,
            page1_html: self.page1_html,
            page3_ranked: self.page3_ranked,
        }
    }
}

/// `/api/update_program` の本文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProgramRequest {
    pub program_id: String,
    pub city: String,
    pub num_locali: usize,
    pub locali: Vec<ItineraryLocal>,
    pub page1_html: String,
    pub page3_ranked: Map<String, Value>,
}

/// `/api/program_details/{id}` の応答
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramDetails {
    pub success: bool,
    pub error: Option<String>,
    pub city_name: Option<String>,
    pub locals: Vec<Value>,
}

impl ProgramDetails {
    /// 保存済み旅程の店舗（IDのないものは除く）
    pub fn activities(&self) -> Vec<Activity> {
        self.locals
            .iter()
            .filter_map(|record| Activity::from_record(record, None))
            .filter(|a| a.id().is_some())
            .collect()
    }
}

/// 旅程保存の次の手順
#[derive(Debug, Clone, PartialEq)]
pub enum SaveStep {
    /// 選択が空なので保存しない
    NothingSelected,
    /// 未ログイン: 旅程を一時キーに退避した。ログイン後に再開する
    LoginRequired,
    /// `/api/save_itinerary` へ送る
    Send(ItineraryPayload),
}

/// 成否のみの汎用応答
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiResponse {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveCityCacheResponse {
    pub success: bool,
    pub selection_path: Option<String>,
    pub suggests_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthStatus {
    pub authenticated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProgramRequest {
    pub program_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::types::Coordinates;
    use serde_json::json;

    #[test]
    fn test_endpoints() {
        let api = Endpoints::new("http://localhost:5000/");
        assert_eq!(api.search(), "http://localhost:5000/search");
        assert_eq!(
            api.place_details("ChIJ 1"),
            "http://localhost:5000/api/place_details/ChIJ%201"
        );
        assert_eq!(Endpoints::new("").save_city_cache(), "/api/save_city_cache");
        assert_eq!(Endpoints::new("").program_details("42"), "/api/program_details/42");
        assert_eq!(
            Endpoints::new("").login_for_autosave(),
            "/login?next=%2Farea_riservata%3Fautosalva%3D1"
        );
    }

    #[test]
    fn test_program_id_from_path() {
        assert_eq!(program_id_from_path("/program/42"), Some("42"));
        assert_eq!(program_id_from_path("/program/42/?x=1"), Some("42"));
        assert_eq!(program_id_from_path("/program/"), None);
        assert_eq!(program_id_from_path("/program/4/2"), None);
        assert_eq!(program_id_from_path("/area_riservata"), None);
    }

    #[test]
    fn test_search_request_shape() {
        let req = SearchRequest {
            query: "trattorie a Bari".into(),
            history: vec![ChatTurn::user("trattorie a Bari")],
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "query": "trattorie a Bari",
                "history": [{"role": "user", "parts": [{"text": "trattorie a Bari"}]}]
            })
        );
    }

    #[test]
    fn test_itinerary_payload_filters_categories() {
        let mut act = Activity::new("p1", "Osteria del Borgo");
        act.category = Category::Dining;
        act.coordinates = Some(Coordinates::new(41.1, 16.8));
        let mut ranked = Map::new();
        ranked.insert("la_nostra_selezione".into(), json!({"results": "<div/>"}));
        ranked.insert("cucina_tipica".into(), json!({"results": []}));
        ranked.insert("primi_piatti".into(), json!({"results": []}));

        let payload = ItineraryPayload::build(Some("Bari"), &[act], "<p>intro</p>", &ranked, "");
        assert_eq!(payload.num_locali, 1);
        assert_eq!(payload.locali[0].kind, "cucina_tipica");
        assert_eq!(payload.locali[0].lat, Some(41.1));
        let keys: Vec<&String> = payload.page3_ranked.keys().collect();
        assert_eq!(keys, vec!["cucina_tipica"]);
        assert_eq!(payload.ranked, payload.page3_ranked);

        let value = serde_json::to_value(&payload.locali[0]).unwrap();
        assert_eq!(value["type"], "cucina_tipica");
    }

    #[test]
    fn test_unclassified_local_kind() {
        let local = ItineraryLocal::from(&Activity::new("x", "Posto"));
        assert_eq!(local.kind, "ristorante");
        assert_eq!(local.lat, None);
    }

    #[test]
    fn test_into_update() {
        let payload = ItineraryPayload::build(None, &[], "", &Map::new(), "");
        let update = payload.into_update("17");
        assert_eq!(update.program_id, "17");
        assert_eq!(update.city, "");
    }

    #[test]
    fn test_place_details_enrich() {
        let details: PlaceDetails = serde_json::from_value(json!({
            "name": "Enoteca Vinarius",
            "formatted_address": "Via Roma 1, Bari",
            "rating": 4.6,
            "user_ratings_total": 210,
            "opening_hours": {"open_now": true}
        }))
        .unwrap();
        let mut act = Activity::new("p", "");
        details.enrich(&mut act);
        assert_eq!(act.name, "Enoteca Vinarius");
        assert_eq!(act.review_count, Some(210));
        assert_eq!(details.opening_hours.unwrap().open_now, Some(true));
    }

    #[test]
    fn test_program_details_activities() {
        let details: ProgramDetails = serde_json::from_value(json!({
            "success": true,
            "city_name": "Lecce",
            "locals": [
                {"place_id": "a", "name": "Uno"},
                {"name": "Senza id"}
            ]
        }))
        .unwrap();
        let acts = details.activities();
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0].name, "Uno");
    }

    #[test]
    fn test_small_responses() {
        let auth: AuthStatus = serde_json::from_str("{}").unwrap();
        assert!(!auth.authenticated);
        let saved: SaveCityCacheResponse =
            serde_json::from_str(r#"{"success":true,"selection_path":"a.json"}"#).unwrap();
        assert!(saved.success);
        assert_eq!(saved.suggests_path, None);
        assert_eq!(
            serde_json::to_string(&DeleteProgramRequest { program_id: "9".into() }).unwrap(),
            r#"{"program_id":"9"}"#
        );
    }
}
