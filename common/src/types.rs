//! 共通データ型
//!
//! CLIとWeb(WASM)で共有される型:
//! - Activity: 店舗・施設（選択リスト / 提案プールの要素）
//! - ResultPage: 4ページ構成の結果ビュー
//! - ChatTurn / ChatMessage: 会話履歴と表示用トランスクリプト

use crate::category::{infer_category, Category, CategoryHints};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// AI生成の提案に付く合成IDの接頭辞
pub const SYNTHETIC_ID_PREFIX: &str = "gemini-";

/// 座標
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// 座標欠落時のフォールバック地点
    pub const FALLBACK: Coordinates = Coordinates {
        lat: 41.1171,
        lng: 16.8719,
    };

    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// 店舗・施設
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activity {
    pub place_id: Option<String>,
    pub name: String,
    pub address: String,
    pub category: Category,
    pub rating: Option<f64>,
    #[serde(rename = "reviews")]
    pub review_count: Option<u32>,
    #[serde(rename = "image")]
    pub image_url: Option<String>,
    #[serde(rename = "location")]
    pub coordinates: Option<Coordinates>,
}

impl Activity {
    pub fn new(place_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            place_id: Some(place_id.into()),
            name: name.into(),
            ..Default::default()
        }
    }

    /// 空でないplace_id
    pub fn id(&self) -> Option<&str> {
        self.place_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn has_id(&self, place_id: &str) -> bool {
        self.id() == Some(place_id)
    }

    pub fn is_synthetic(&self) -> bool {
        self.id()
            .map(|id| id.starts_with(SYNTHETIC_ID_PREFIX))
            .unwrap_or(false)
    }

    /// 地図用の座標（欠落・不正値はフォールバック）
    pub fn position(&self) -> Coordinates {
        match self.coordinates {
            Some(c) if c.is_valid() => c,
            _ => Coordinates::FALLBACK,
        }
    }

    pub fn has_coordinates(&self) -> bool {
        matches!(self.coordinates, Some(c) if c.is_valid())
    }

    /// 地図リンク（実IDは place_id 指定、合成IDは検索クエリ）
    pub fn maps_url(&self) -> String {
        if let Some(id) = self.id().filter(|_| !self.is_synthetic()) {
            return format!("https://www.google.com/maps/place/?q=place_id:{}", id);
        }
        let query = format!("{} {}", self.name, self.address).trim().to_string();
        if !query.is_empty() {
            return format!(
                "https://www.google.com/maps/search/?api=1&query={}",
                encode_query(&query)
            );
        }
        if let Some(c) = self.coordinates.filter(Coordinates::is_valid) {
            return format!(
                "https://www.google.com/maps/search/?api=1&query={}%2C{}",
                c.lat, c.lng
            );
        }
        "https://www.google.com/maps".to_string()
    }

    /// 外部レコード（JSON）から生成
    ///
    /// バックエンド・キャッシュ・旧保存形式のいずれのフィールド名も受け付ける
    /// (`nome`/`name`, `indirizzo`/`formatted_address`/`address`, `foto_url`/`image` …)。
    /// カテゴリは `category_hint` を明示カテゴリより後の手掛かりとして使う。
    pub fn from_record(value: &Value, category_hint: Option<&str>) -> Option<Activity> {
        let map = value.as_object()?;

        let place_id = get_string(map, &["place_id", "placeId", "id"]).filter(|s| !s.trim().is_empty());
        let name = get_string(map, &["name", "nome"]).unwrap_or_default();
        let address =
            get_string(map, &["address", "formatted_address", "indirizzo"]).unwrap_or_default();
        let image_url =
            get_string(map, &["image", "photo", "foto_url", "imageUrl"]).filter(|s| !s.is_empty());
        let rating = get_f64(map, &["rating", "valutazione"]);
        let review_count = get_f64(map, &["reviews", "reviews_count", "user_ratings_total"])
            .filter(|n| *n >= 0.0)
            .map(|n| n as u32);

        let location = map.get("location").and_then(Value::as_object);
        let lat = get_f64(map, &["lat"]).or_else(|| location.and_then(|l| get_f64(l, &["lat"])));
        let lng = get_f64(map, &["lng"]).or_else(|| location.and_then(|l| get_f64(l, &["lng"])));
        let coordinates = match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
            _ => None,
        };

        let hints = CategoryHints {
            explicit: get_string(map, &["category", "type"]).filter(|s| !s.trim().is_empty()),
            label_text: None,
            section: category_hint.map(str::to_string),
            name: name.clone(),
            address: address.clone(),
        };

        if place_id.is_none() && name.is_empty() {
            return None;
        }

        Some(Activity {
            place_id,
            name,
            address,
            category: infer_category(&hints),
            rating,
            review_count,
            image_url,
            coordinates,
        })
    }
}

pub(crate) fn encode_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for b in query.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn get_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let value = map.get(*key)?;
        if let Some(s) = value.as_str() {
            return Some(s.to_string());
        }
        if value.is_null() || value.is_object() || value.is_array() {
            return None;
        }
        Some(value.to_string())
    })
}

fn get_f64(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| {
        let value = map.get(*key)?;
        if let Some(n) = value.as_f64() {
            return Some(n);
        }
        value
            .as_str()
            .and_then(|s| s.trim().trim_start_matches('⭐').trim().parse::<f64>().ok())
    })
    .filter(|n| n.is_finite())
}

/// 結果ビューのページ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultPage {
    #[default]
    Intro,
    Selection,
    #[serde(rename = "lfw")]
    Suggestions,
    Map,
}

impl ResultPage {
    /// 「次のページ」用の並び
    pub const ORDER: [ResultPage; 4] = [
        ResultPage::Intro,
        ResultPage::Selection,
        ResultPage::Suggestions,
        ResultPage::Map,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultPage::Intro => "intro",
            ResultPage::Selection => "selection",
            ResultPage::Suggestions => "lfw",
            ResultPage::Map => "map",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ResultPage::Intro => "Intro",
            ResultPage::Selection => "La nostra selezione",
            ResultPage::Suggestions => "Altri suggerimenti",
            ResultPage::Map => "Mappa",
        }
    }

    pub fn next(&self) -> Option<ResultPage> {
        let idx = Self::ORDER.iter().position(|p| p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

impl std::fmt::Display for ResultPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResultPage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "intro" | "1" => Ok(ResultPage::Intro),
            "selection" | "selezione" | "2" => Ok(ResultPage::Selection),
            "lfw" | "suggestions" | "suggerimenti" | "3" => Ok(ResultPage::Suggestions),
            "map" | "mappa" | "4" => Ok(ResultPage::Map),
            _ => Err(format!("Unknown page: {}. Use intro, selection, lfw or map", s)),
        }
    }
}

/// 会話ロール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

/// 会話履歴の1ターン（検索APIへ送る形式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub parts: Vec<TextPart>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            parts: vec![TextPart { text: text.into() }],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            parts: vec![TextPart { text: text.into() }],
        }
    }

    pub fn text(&self) -> &str {
        self.parts.first().map(|p| p.text.as_str()).unwrap_or("")
    }
}

/// トランスクリプト表示用メッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(rename = "isUser")]
    pub is_user: bool,
}
