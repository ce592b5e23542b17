//! 挿入コンテンツの整形とカード抽出
//!
//! - 本文: コードフェンス・文書ラッパ・script を除去し、店舗カードやグリッドなど
//!   他ページの断片を取り除いてから Intro に挿入する
//! - カード: ランキング済みHTMLから店舗カードを読み取り Activity に変換する

use crate::category::{infer_category, CategoryHints};
use crate::html::{self, Element, Node};
use crate::types::{Activity, Coordinates};
use lazy_static::lazy_static;
use regex::Regex;

/// プレビューの最大文字数
pub const PREVIEW_MAX_CHARS: usize = 280;

/// 本文から除去するカード・グリッドのクラス
const FRAGMENT_CLASSES: [&str; 10] = [
    "activity-card",
    "selection-card",
    "place-card",
    "place_details",
    "category-results",
    "activities-grid",
    "results-html-content",
    "our-selection",
    "load-more-btn",
    "lfw-left-label",
];

/// カードとして扱うクラス
const CARD_CLASSES: [&str; 3] = ["activity-card", "selection-card", "place-card"];

lazy_static! {
    static ref CODE_FENCE_OPEN: Regex = Regex::new(r"```[a-zA-Z]*\n?").unwrap();
    static ref DOCTYPE: Regex = Regex::new(r"(?is)<!DOCTYPE.*?>").unwrap();
    static ref HTML_OPEN: Regex = Regex::new(r"(?is)<html\b.*?>").unwrap();
    static ref HTML_CLOSE: Regex = Regex::new(r"(?i)</html>").unwrap();
    static ref HEAD_BLOCK: Regex = Regex::new(r"(?is)<head\b.*?</head>").unwrap();
    static ref BODY_OPEN: Regex = Regex::new(r"(?is)<body\b.*?>").unwrap();
    static ref BODY_CLOSE: Regex = Regex::new(r"(?i)</body>").unwrap();
    static ref SCRIPT_BLOCK: Regex = Regex::new(r"(?is)<script\b.*?</script>").unwrap();
    static ref MAPS_LINK: Regex =
        Regex::new(r"(?i)(://maps\.google|google\.[a-z.]+/maps|goo\.gl/maps)").unwrap();
    static ref CATEGORY_HEADING: Regex = Regex::new(
        r"(?i)(la\s+nostra\s+selezione|hotel|strutture\s*ricettive|cucina\s*tipica|ristoranti|trattorie|osterie|pizzerie|enoteche|cantine|\bbar\b|\bpub\b)"
    )
    .unwrap();
    static ref WINE_HEADING: Regex = Regex::new(r"(?i)^vini(\s*&\s*bevande)?$").unwrap();
    static ref WINE_LABEL: Regex = Regex::new(r"(?i)^vini$").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref MODAL_PLACE_ID: Regex = Regex::new(r"openActivityModal\('(.+?)'").unwrap();
    static ref HREF_PLACE_ID: Regex = Regex::new(r"place_id:([^&]+)").unwrap();
    static ref BACKGROUND_URL: Regex =
        Regex::new(r#"background-image:\s*url\(\s*["']?([^"')]+)["']?\s*\)"#).unwrap();
    static ref NUMBER: Regex = Regex::new(r"\d+(?:[.,]\d+)?").unwrap();
}

/// ```` ```html ```` などのコードフェンスを除去
pub fn strip_code_fences(content: &str) -> String {
    CODE_FENCE_OPEN.replace_all(content, "").replace("```", "")
}

/// doctype / html / head / body / script を除去
pub fn strip_document_wrappers(content: &str) -> String {
    let mut out = content.to_string();
    for re in [
        &*DOCTYPE,
        &*HTML_OPEN,
        &*HTML_CLOSE,
        &*HEAD_BLOCK,
        &*BODY_OPEN,
        &*BODY_CLOSE,
        &*SCRIPT_BLOCK,
    ] {
        out = re.replace_all(&out, "").into_owned();
    }
    out
}

fn is_maps_link(el: &Element) -> bool {
    el.tag == "a" && el.attr("href").map(|h| MAPS_LINK.is_match(h)).unwrap_or(false)
}

fn is_fragment(el: &Element) -> bool {
    el.has_attr("data-place-id")
        || el.has_attr("data-category")
        || el.attr("id") == Some("lfw-left-label")
        || FRAGMENT_CLASSES.iter().any(|c| el.has_class(c))
        || is_maps_link(el)
}

fn is_category_heading(el: &Element) -> bool {
    matches!(el.tag.as_str(), "h2" | "h3" | "h4") && {
        let text = el.text();
        let text = text.trim();
        !text.is_empty() && CATEGORY_HEADING.is_match(text)
    }
}

fn is_block(el: &Element) -> bool {
    matches!(el.tag.as_str(), "div" | "section" | "article")
}

fn is_stray_wine_label(el: &Element) -> bool {
    let text = el.text();
    let text = text.trim();
    if matches!(el.tag.as_str(), "h2" | "h3" | "h4") {
        return WINE_HEADING.is_match(text);
    }
    el.child_elements().next().is_none() && WINE_LABEL.is_match(text)
}

fn prune(nodes: Vec<Node>, in_wines: bool) -> Vec<Node> {
    nodes
        .into_iter()
        .filter_map(|node| match node {
            Node::Element(el) => prune_element(el, in_wines).map(Node::Element),
            other => Some(other),
        })
        .collect()
}

fn prune_element(mut el: Element, in_wines: bool) -> Option<Element> {
    if is_fragment(&el) {
        return None;
    }
    // 見出しがカテゴリ名のブロックはまるごと除去
    if is_block(&el) && el.child_elements().any(is_category_heading) {
        return None;
    }
    if is_category_heading(&el) {
        return None;
    }
    let in_wines = in_wines || el.has_class("wines-section");
    if !in_wines && is_stray_wine_label(&el) {
        return None;
    }
    el.children = prune(std::mem::take(&mut el.children), in_wines);
    Some(el)
}

/// Intro に挿入する本文を整形
pub fn clean_content(raw: &str) -> String {
    let html = strip_document_wrappers(&strip_code_fences(raw));
    let nodes = prune(html::parse_fragment(&html), false);
    html::render(&nodes).trim().to_string()
}

/// HTMLをプレーンテキストへ（空白は1つに畳む）
pub fn plain_text(content: &str) -> String {
    let text = html::text_of(&html::parse_fragment(content));
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// トランスクリプト用のプレビュー
pub fn content_preview(content: &str) -> String {
    let text = plain_text(content);
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        text
    } else {
        text.chars().take(PREVIEW_MAX_CHARS).collect()
    }
}

fn is_card(el: &Element) -> bool {
    CARD_CLASSES.iter().any(|c| el.has_class(c))
        || (el.has_attr("data-place-id") && !matches!(el.tag.as_str(), "button" | "a" | "span"))
}

fn card_place_id(card: &Element) -> Option<String> {
    if let Some(id) = card.attr("data-place-id").filter(|id| !id.trim().is_empty()) {
        return Some(id.trim().to_string());
    }
    if let Some(caps) = card.attr("onclick").and_then(|js| MODAL_PLACE_ID.captures(js)) {
        return Some(caps[1].to_string());
    }
    if let Some(id) = card
        .find(&|el| el.tag == "a" && el.attr("href").map(|h| h.contains("place_id:")).unwrap_or(false))
        .and_then(|a| a.attr("href"))
        .and_then(|href| HREF_PLACE_ID.captures(href))
        .map(|caps| caps[1].to_string())
    {
        return Some(id);
    }
    card.find(&|el| el.attr("data-place-id").map(|id| !id.trim().is_empty()).unwrap_or(false))
        .and_then(|el| el.attr("data-place-id"))
        .map(|id| id.trim().to_string())
}

fn parse_number(text: &str) -> Option<f64> {
    NUMBER
        .find(text)
        .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
}

fn card_image(card: &Element) -> Option<String> {
    let from_style = |el: &Element| {
        el.attr("style")
            .and_then(|style| BACKGROUND_URL.captures(style))
            .map(|caps| caps[1].trim().to_string())
    };
    from_style(card)
        .or_else(|| card.find(&|el| from_style(el).is_some()).and_then(from_style))
        .or_else(|| {
            card.find(&|el| {
                el.tag == "img"
                    && el
                        .attr("src")
                        .map(|src| !src.contains("/assets/"))
                        .unwrap_or(false)
            })
            .and_then(|img| img.attr("src"))
            .map(str::to_string)
        })
        .filter(|url| !url.is_empty())
}

/// カード上のアイコン画像からの明示カテゴリ
fn icon_category(card: &Element) -> Option<&'static str> {
    let src = card
        .find(&|el| el.tag == "img" && el.attr("src").map(|s| s.contains("/assets/")).unwrap_or(false))
        .and_then(|img| img.attr("src"))?;
    if src.contains("hotel.svg") {
        Some("hotel")
    } else if src.contains("vini.svg") {
        Some("vini")
    } else if src.contains("ristorante.svg") {
        Some("cucina_tipica")
    } else {
        None
    }
}

fn section_hint(ancestors: &[&Element]) -> Option<String> {
    ancestors.iter().rev().find_map(|el| {
        if let Some(cat) = el
            .attr("data-category")
            .filter(|c| !c.trim().is_empty() && !c.contains("la_nostra_selezione"))
        {
            return Some(cat.to_string());
        }
        el.classes()
            .find(|c| c.ends_with("-section"))
            .map(str::to_string)
    })
}

/// 座標値（NaN・無限大は不正）
fn parse_coordinate(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// カード要素を Activity に変換
fn card_to_activity(card: &Element, ancestors: &[&Element], fallback_section: Option<&str>) -> Activity {
    let name = card
        .find(&|el| matches!(el.tag.as_str(), "h4" | "h3"))
        .map(|h| h.text().trim().to_string())
        .or_else(|| card.attr("data-name").map(str::to_string))
        .unwrap_or_default();
    let address = card.attr("data-address").unwrap_or_default().trim().to_string();

    let rating = card
        .attr("data-rating")
        .and_then(parse_number)
        .or_else(|| card.find(&|el| el.has_class("rating")).and_then(|el| parse_number(&el.text())));
    let review_count = card
        .attr("data-reviews")
        .and_then(|v| v.trim().parse::<u32>().ok());

    let lat = card.attr("data-lat").and_then(parse_coordinate);
    let lng = card.attr("data-lng").and_then(parse_coordinate);
    let coordinates = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
        _ => None,
    };

    let explicit = card
        .attr("data-category")
        .filter(|c| !c.trim().is_empty() && !c.contains("la_nostra_selezione"))
        .map(str::to_string)
        .or_else(|| icon_category(card).map(str::to_string));
    let hints = CategoryHints {
        explicit,
        label_text: Some(card.text()),
        section: section_hint(ancestors).or_else(|| fallback_section.map(str::to_string)),
        name: name.clone(),
        address: address.clone(),
    };

    Activity {
        place_id: card_place_id(card),
        name,
        address,
        category: infer_category(&hints),
        rating,
        review_count,
        image_url: card_image(card),
        coordinates,
    }
}

/// HTML中の店舗カードを抽出
///
/// ネストしたカード（カード内のボタン等）は外側のカードに含める。
/// `fallback_section` はカードにも祖先にもカテゴリがない場合の手掛かり。
pub fn extract_cards(content: &str, fallback_section: Option<&str>) -> Vec<Activity> {
    let nodes = html::parse_fragment(content);
    let mut cards = Vec::new();
    html::walk(&nodes, &mut |el, ancestors| {
        if is_card(el) && !ancestors.iter().any(|a| is_card(a)) {
            cards.push(card_to_activity(el, ancestors, fallback_section));
        }
    });
    cards
}

/// チャット重複判定用の正規化
pub fn normalize_message(message: &str) -> String {
    plain_text(message)
}
