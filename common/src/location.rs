//! 検索クエリからの地名抽出
//!
//! 1. 既知の都市名（大文字小文字無視・語境界）
//! 2. 前置詞パターン（a / in / da / per … + 語）と「都市 + 州」パターン
//!
//! 料理名・一般名詞は地名として扱わない。

use lazy_static::lazy_static;
use regex::Regex;

const ITALIAN_CITIES: &[&str] = &[
    "Roma", "Milano", "Napoli", "Torino", "Palermo", "Genova", "Bologna", "Firenze", "Bari",
    "Catania", "Venezia", "Verona", "Messina", "Padova", "Trieste", "Brescia", "Taranto", "Prato",
    "Parma", "Modena", "Reggio Calabria", "Reggio Emilia", "Perugia", "Livorno", "Ravenna",
    "Cagliari", "Foggia", "Rimini", "Salerno", "Ferrara", "Sassari", "Latina", "Giugliano",
    "Monza", "Siracusa", "Pescara", "Bergamo", "Forlì", "Trento", "Vicenza", "Terni", "Bolzano",
    "Novara", "Piacenza", "Ancona", "Andria", "Arezzo", "Udine", "Cesena", "Lecce", "Pesaro",
    "Barletta", "Alessandria", "La Spezia", "Pistoia", "Catanzaro", "Brindisi", "Treviso", "Pisa",
    "Caserta", "Marsala", "Varese", "Massa", "Como", "Cosenza", "Cremona", "Matera",
];

const NON_LOCATION_WORDS: &[&str] = &[
    "cosa", "dove", "come", "quando", "perché", "quale", "quanto", "chi", "dimmi", "vini",
    "ristoranti", "hotel", "pesce", "carne", "pizza", "pasta", "gelato", "caffè", "vino", "birra",
    "dolci", "antipasti", "primi", "secondi", "contorni", "dessert", "colazione", "pranzo", "cena",
    "aperitivo", "cucina", "ristorante", "trattoria", "osteria", "pizzeria", "bar", "pub",
    "locale", "posto", "posti", "luoghi", "mangiare", "bere", "provare", "assaggiare", "gustare",
    "ordinare", "scegliere", "trovare", "cercare", "buono", "buoni", "buona", "buone", "ottimo",
    "ottimi", "ottima", "ottime", "migliore", "migliori", "tipico", "tipici", "tipica", "tipiche",
    "tradizionale", "tradizionali", "locali", "specialità", "piatto", "piatti", "ricetta",
    "ricette", "ingrediente", "ingredienti", "rapa", "pasticciotti", "taralli", "orecchiette",
    "cime", "carbonara", "burrata", "risotto", "bistecca", "oggi", "domani", "stasera", "sera",
    "weekend", "famiglia", "bambini", "coppia", "amici", "tutti", "tutto", "qualcosa", "vicino",
    "centro", "mare", "spiaggia", "montagna", "zona", "quartiere", "città", "paese",
];

/// 保存済みロケーションとして認めない値（料理名など過去に誤保存されたもの）
const BANNED_STORED_LOCATIONS: &[&str] = &[
    "orecchiette",
    "cime",
    "rapa",
    "pasticciotti",
    "taralli",
    "carbonara",
    "burrata",
    "risotto",
    "bistecca",
    "vino",
    "vini",
];

lazy_static! {
    static ref CITY_PATTERNS: Vec<(&'static str, Regex)> = ITALIAN_CITIES
        .iter()
        .filter_map(|city| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(city)))
                .ok()
                .map(|re| (*city, re))
        })
        .collect();
    static ref PREPOSITION_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:a|in|da|per|su|verso|presso|vicino a|zona|quartiere)\s+([a-z]+(?:\s+[a-z]+)?)\b"
    )
    .unwrap();
    static ref REGION_PATTERN: Regex = Regex::new(
        r"(?i)\b([a-z]+(?:\s+[a-z]+)?)\s+(?:puglia|basilicata|calabria|sicilia|sardegna|campania|lazio|toscana|umbria|marche|abruzzo|molise|emilia-romagna|liguria|piemonte|valle d'aosta|lombardia|trentino|veneto|friuli)\b"
    )
    .unwrap();
    static ref LETTERS_ONLY: Regex = Regex::new(r"^[A-Za-z\s]+$").unwrap();
}

/// 候補から先頭・末尾の一般語を除き、地名として妥当なら返す
fn clean_candidate(candidate: &str) -> Option<String> {
    let words: Vec<&str> = candidate
        .split_whitespace()
        .skip_while(|w| NON_LOCATION_WORDS.contains(&w.to_lowercase().as_str()))
        .take_while(|w| !NON_LOCATION_WORDS.contains(&w.to_lowercase().as_str()))
        .collect();
    let cleaned = words.join(" ");
    if cleaned.chars().count() > 2 && LETTERS_ONLY.is_match(&cleaned) {
        Some(cleaned)
    } else {
        None
    }
}

/// クエリから地名を抽出
///
/// # Examples
/// ```
/// use itinerary_common::extract_location_from_query;
///
/// assert_eq!(extract_location_from_query("ristoranti a lecce").as_deref(), Some("Lecce"));
/// assert_eq!(extract_location_from_query("cime di rapa"), None);
/// ```
pub fn extract_location_from_query(query: &str) -> Option<String> {
    if let Some((city, _)) = CITY_PATTERNS.iter().find(|(_, re)| re.is_match(query)) {
        log::debug!("既知の都市を検出: {}", city);
        return Some(city.to_string());
    }

    for pattern in [&*PREPOSITION_PATTERN, &*REGION_PATTERN] {
        for caps in pattern.captures_iter(query) {
            let Some(candidate) = caps.get(1).and_then(|m| clean_candidate(m.as_str())) else {
                continue;
            };
            log::debug!("クエリから地名を抽出: {}", candidate);
            return Some(capitalize_words(&candidate));
        }
    }
    None
}

fn capitalize_words(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 保存済みロケーションの検証（読込時）
///
/// `"null"`・空文字・料理名は破棄する。
pub fn sanitize_stored_location(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    let lower = value.to_lowercase();
    if value.is_empty() || lower == "null" || BANNED_STORED_LOCATIONS.contains(&lower.as_str()) {
        return None;
    }
    Some(value.to_string())
}

/// 2つのロケーションが同じ場所を指すか（大文字小文字無視）
pub fn same_location(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
