//! カテゴリ正規化
//!
//! 自由記述のカテゴリ名・カードのラベル・所属セクション・店名/住所から
//! 宿泊 / 料理 / ワイン / 菓子 の4区分へ正規化する純粋関数群。
//!
//! 優先順位: 明示カテゴリ → カードのラベル文字列 → 所属セクション → 店名・住所 → 未分類

use crate::types::ResultPage;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 提案ページで扱うカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    Lodging,
    Dining,
    Wine,
    Sweets,
    #[default]
    Unclassified,
}

impl Category {
    /// バックエンドが使うラベル
    pub fn as_label(&self) -> &'static str {
        match self {
            Category::Lodging => "hotel",
            Category::Dining => "cucina_tipica",
            Category::Wine => "vini",
            Category::Sweets => "dolci tipici",
            Category::Unclassified => "",
        }
    }

    /// 表示用アイコン
    pub fn icon(&self) -> &'static str {
        match self {
            Category::Lodging => "🏨",
            Category::Dining => "🍽️",
            Category::Wine => "🍷",
            Category::Sweets => "🍰",
            Category::Unclassified => "",
        }
    }

    /// 提案ページのセクション見出し
    pub fn section_title(&self) -> &'static str {
        match self {
            Category::Lodging => "Hotel",
            Category::Dining => "Cucina tipica",
            Category::Wine => "Vini",
            Category::Sweets => "Dolci tipici",
            Category::Unclassified => "Altri suggerimenti",
        }
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, Category::Unclassified)
    }

    pub const ALL: [Category; 4] = [
        Category::Lodging,
        Category::Dining,
        Category::Wine,
        Category::Sweets,
    ];
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_label())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .and_then(normalize_category)
            .unwrap_or(Category::Unclassified))
    }
}

lazy_static! {
    static ref HINT_DINING: Regex =
        Regex::new(r"(ristoranti|ristorante|cucina|piatti|dishes|food|trattorie|osterie|pizzerie|dining)").unwrap();
    static ref HINT_SWEETS: Regex =
        Regex::new(r"(dolci|pasticcerie|dessert|torte|gelaterie|sweets)").unwrap();
    static ref HINT_WINE: Regex =
        Regex::new(r"(vini|bevande|wine|drink|enoteca|cantine)").unwrap();
    static ref HINT_LODGING: Regex =
        Regex::new(r"(hotel|albergo|ospiti|stay|strutture\s*ricettive|lodging)").unwrap();

    static ref LABEL_DINING: Regex =
        Regex::new(r"\bcucina\s*tipica\b|\bristoranti\b|\btrattorie\b|\bosterie\b|\bpizzerie\b").unwrap();
    static ref LABEL_SWEETS: Regex =
        Regex::new(r"\bdolci\b|\bpasticceri[ae]\b|\bdessert\b|\bgelateri[ae]\b").unwrap();
    static ref LABEL_WINE: Regex = Regex::new(r"\bvini\b|\benoteca\b").unwrap();
    static ref LABEL_LODGING: Regex =
        Regex::new(r"\bhotel\b|\bstrutture\s*ricettive\b").unwrap();

    static ref TEXT_LODGING: Regex =
        Regex::new(r"(hotel|albergo|resort|b\s*&\s*b|bnb|bed\s*and\s*breakfast)").unwrap();
    static ref TEXT_SWEETS: Regex =
        Regex::new(r"(pasticceria|dolce|dessert|gelateria|torta)").unwrap();
    static ref TEXT_WINE: Regex = Regex::new(r"(vino|cantina|enoteca|wine)").unwrap();
    static ref TEXT_DINING: Regex =
        Regex::new(r"(ristorante|trattoria|osteria|pizzeria|cucina|food)").unwrap();

    static ref SELECTION_MARKER: Regex = Regex::new(r"la[_\s]+nostra[_\s]+selezione").unwrap();
    static ref FOOD_ONLY: Regex =
        Regex::new(r"(primi|secondi|prodotti\s*tipici|cibi|piatti|specialit(?:à|a))").unwrap();
    static ref THIRD_PAGE_HTML: Regex =
        Regex::new(r"(?i)(hotel|cucina\s*tipica|vini|dolci|pasticcerie|dessert|gelaterie)").unwrap();
}

/// 自由記述のカテゴリヒントを正規化
///
/// 空文字・`la_nostra_selezione` は分類しない。
///
/// # Examples
/// ```
/// use itinerary_common::{normalize_category, Category};
///
/// assert_eq!(normalize_category("Ristoranti tipici"), Some(Category::Dining));
/// assert_eq!(normalize_category("la_nostra_selezione"), None);
/// ```
pub fn normalize_category(hint: &str) -> Option<Category> {
    let raw = hint.trim().to_lowercase();
    if raw.is_empty() || SELECTION_MARKER.is_match(&raw) {
        return None;
    }
    if HINT_DINING.is_match(&raw) {
        return Some(Category::Dining);
    }
    if HINT_SWEETS.is_match(&raw) {
        return Some(Category::Sweets);
    }
    if HINT_WINE.is_match(&raw) {
        return Some(Category::Wine);
    }
    if HINT_LODGING.is_match(&raw) {
        return Some(Category::Lodging);
    }
    None
}

/// カード上のラベル文字列から判定（店名中の "cantina" 等の誤検出を避けるため語境界で照合）
pub fn category_from_label(text: &str) -> Option<Category> {
    let text = text.to_lowercase();
    if LABEL_DINING.is_match(&text) {
        Some(Category::Dining)
    } else if LABEL_SWEETS.is_match(&text) {
        Some(Category::Sweets)
    } else if LABEL_WINE.is_match(&text) {
        Some(Category::Wine)
    } else if LABEL_LODGING.is_match(&text) {
        Some(Category::Lodging)
    } else {
        None
    }
}

/// 所属セクション（クラス名または data-category）から判定
pub fn category_from_section(section: &str) -> Option<Category> {
    let section = section.trim().to_lowercase();
    if section.contains("wines-section") {
        return Some(Category::Wine);
    }
    if section.contains("restaurants-section") || section.contains("dishes-section") {
        return Some(Category::Dining);
    }
    if section.contains("desserts-section") || section.contains("dolci-section") {
        return Some(Category::Sweets);
    }
    if section.contains("hotels-section") {
        return Some(Category::Lodging);
    }
    normalize_category(&section)
}

/// 店名・住所から判定
pub fn category_from_text(name: &str, address: &str) -> Option<Category> {
    let text = format!("{} {}", name, address).to_lowercase();
    if TEXT_LODGING.is_match(&text) {
        Some(Category::Lodging)
    } else if TEXT_SWEETS.is_match(&text) {
        Some(Category::Sweets)
    } else if TEXT_WINE.is_match(&text) {
        Some(Category::Wine)
    } else if TEXT_DINING.is_match(&text) {
        Some(Category::Dining)
    } else {
        None
    }
}

/// カテゴリ推定の手掛かり
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryHints {
    /// 明示カテゴリ（data-category / category / type）
    pub explicit: Option<String>,
    /// カード上のラベル文字列
    pub label_text: Option<String>,
    /// 所属セクション
    pub section: Option<String>,
    pub name: String,
    pub address: String,
}

impl CategoryHints {
    pub fn explicit(hint: impl Into<String>) -> Self {
        Self {
            explicit: Some(hint.into()),
            ..Default::default()
        }
    }
}

/// 優先順位チェーンでカテゴリを推定
pub fn infer_category(hints: &CategoryHints) -> Category {
    hints
        .explicit
        .as_deref()
        .and_then(normalize_category)
        .or_else(|| hints.label_text.as_deref().and_then(category_from_label))
        .or_else(|| hints.section.as_deref().and_then(category_from_section))
        .or_else(|| category_from_text(&hints.name, &hints.address))
        .unwrap_or(Category::Unclassified)
}

/// ツール結果カテゴリ名を表示名へ（`hotel_consigliati` → `Hotel consigliati`）
pub fn display_name(category: &str) -> String {
    let formatted = category.replace('_', " ");
    let mut chars = formatted.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// ツール結果カテゴリの振り分け先ページ
///
/// - `la_nostra_selezione` → 選択ページ
/// - 料理名のみのカテゴリ（primi, prodotti tipici …）→ イントロ
/// - 宿泊/料理/ワイン/菓子 → 提案ページ
/// - それ以外は表示しない
pub fn route_tool_category(category: &str, html: Option<&str>) -> Option<ResultPage> {
    let lower = category.trim().to_lowercase().replace('_', " ");
    if SELECTION_MARKER.is_match(&lower) {
        return Some(ResultPage::Selection);
    }
    if FOOD_ONLY.is_match(&lower) {
        return Some(ResultPage::Intro);
    }
    if normalize_category(&lower).is_some() {
        return Some(ResultPage::Suggestions);
    }
    match html {
        Some(html) if THIRD_PAGE_HTML.is_match(html) => Some(ResultPage::Suggestions),
        _ => None,
    }
}

/// 旅程保存時に提案ページ扱いとするカテゴリか
pub fn is_suggestions_page_category(category: &str) -> bool {
    let norm = category
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if norm.contains("la nostra selezione") {
        return false;
    }
    const ALLOWED: [&str; 8] = [
        "hotel",
        "strutture ricettive",
        "cucina tipica",
        "ristoranti",
        "vini",
        "enoteca",
        "cantina",
        "cantine",
    ];
    ALLOWED.iter().any(|a| norm.contains(a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_category_backend_labels() {
        assert_eq!(normalize_category("hotel"), Some(Category::Lodging));
        assert_eq!(normalize_category("cucina_tipica"), Some(Category::Dining));
        assert_eq!(normalize_category("vini"), Some(Category::Wine));
        assert_eq!(normalize_category("dolci tipici"), Some(Category::Sweets));
    }

    #[test]
    fn test_normalize_category_synonyms() {
        assert_eq!(normalize_category("Strutture Ricettive"), Some(Category::Lodging));
        assert_eq!(normalize_category("enoteca"), Some(Category::Wine));
        assert_eq!(normalize_category("gelaterie"), Some(Category::Sweets));
        assert_eq!(normalize_category("trattorie"), Some(Category::Dining));
    }

    #[test]
    fn test_normalize_category_rejects_selection_and_empty() {
        assert_eq!(normalize_category(""), None);
        assert_eq!(normalize_category("   "), None);
        assert_eq!(normalize_category("la_nostra_selezione"), None);
        assert_eq!(normalize_category("musei"), None);
    }

    #[test]
    fn test_dining_wins_over_wine_for_mixed_hint() {
        // "ristoranti e vini" は料理を優先
        assert_eq!(normalize_category("ristoranti e vini"), Some(Category::Dining));
    }

    #[test]
    fn test_category_from_label_word_boundary() {
        assert_eq!(category_from_label("Cucina tipica · 4.5"), Some(Category::Dining));
        assert_eq!(category_from_label("ENOTECA"), Some(Category::Wine));
        // 店名中の "cantina" はラベルとして扱わない
        assert_eq!(category_from_label("Cantina del Sole"), None);
    }

    #[test]
    fn test_category_from_section_classes() {
        assert_eq!(category_from_section("mb-8 wines-section"), Some(Category::Wine));
        assert_eq!(category_from_section("dishes-section"), Some(Category::Dining));
        assert_eq!(category_from_section("dolci-section"), Some(Category::Sweets));
        assert_eq!(category_from_section("hotels-section"), Some(Category::Lodging));
        assert_eq!(category_from_section("vini"), Some(Category::Wine));
    }

    #[test]
    fn test_category_from_text() {
        assert_eq!(category_from_text("Grand Hotel Bari", ""), Some(Category::Lodging));
        assert_eq!(category_from_text("Pasticceria Rossi", ""), Some(Category::Sweets));
        assert_eq!(category_from_text("Cantina Polvanera", ""), Some(Category::Wine));
        assert_eq!(category_from_text("Osteria del Porto", ""), Some(Category::Dining));
        assert_eq!(category_from_text("Castello Svevo", "Piazza"), None);
    }

    #[test]
    fn test_infer_category_priority_chain() {
        let hints = CategoryHints {
            explicit: Some("vini".into()),
            label_text: Some("Hotel".into()),
            section: Some("dishes-section".into()),
            name: "Pasticceria".into(),
            address: String::new(),
        };
        assert_eq!(infer_category(&hints), Category::Wine);

        let hints = CategoryHints {
            explicit: Some("la_nostra_selezione".into()),
            label_text: Some("Strutture ricettive".into()),
            ..Default::default()
        };
        assert_eq!(infer_category(&hints), Category::Lodging);

        let hints = CategoryHints {
            section: Some("desserts-section".into()),
            name: "Hotel Roma".into(),
            ..Default::default()
        };
        assert_eq!(infer_category(&hints), Category::Sweets);

        let hints = CategoryHints {
            name: "Hotel Roma".into(),
            ..Default::default()
        };
        assert_eq!(infer_category(&hints), Category::Lodging);

        assert_eq!(infer_category(&CategoryHints::default()), Category::Unclassified);
    }

    #[test]
    fn test_category_serde_uses_backend_labels() {
        let json = serde_json::to_string(&Category::Sweets).unwrap();
        assert_eq!(json, "\"dolci tipici\"");
        let parsed: Category = serde_json::from_str("\"Enoteca\"").unwrap();
        assert_eq!(parsed, Category::Wine);
        let parsed: Category = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Category::Unclassified);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("hotel_consigliati"), "Hotel consigliati");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn test_route_tool_category() {
        assert_eq!(route_tool_category("la_nostra_selezione", None), Some(ResultPage::Selection));
        assert_eq!(route_tool_category("primi_piatti_tipici", None), Some(ResultPage::Intro));
        assert_eq!(route_tool_category("cucina_tipica", None), Some(ResultPage::Suggestions));
        assert_eq!(route_tool_category("hotel", None), Some(ResultPage::Suggestions));
        assert_eq!(route_tool_category("musei", None), None);
        assert_eq!(
            route_tool_category("consigliati", Some("<h4>Hotel Centrale</h4>")),
            Some(ResultPage::Suggestions)
        );
    }

    #[test]
    fn test_is_suggestions_page_category() {
        assert!(is_suggestions_page_category("Strutture_ricettive"));
        assert!(is_suggestions_page_category("cantine"));
        assert!(!is_suggestions_page_category("La Nostra  Selezione"));
        assert!(!is_suggestions_page_category("primi piatti"));
    }

    #[test]
    fn test_icons() {
        assert_eq!(Category::Lodging.icon(), "🏨");
        assert_eq!(Category::Wine.icon(), "🍷");
        assert_eq!(Category::Unclassified.icon(), "");
    }
}
