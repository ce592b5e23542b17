//! ストリームイベント（NDJSONの1行）
//!
//! 未知のフィールドは無視する。多態なフィールド（`content_payload` / `map_payload` /
//! `tool_data`）は `serde_json::Value` のまま保持し、アクセサで解釈する。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `type` フィールドの再読込シグナル
pub const RELOAD_PAGE: &str = "reload_page";

/// 地図ペイロードのツール名
pub const MAPS_TOOL: &str = "search_google_maps";

/// チャットメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatbotMessage {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "isUser", default)]
    pub is_user: bool,
}

/// デコード済みのストリームイベント
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamEvent {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chatbot_message: Option<ChatbotMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chatbot_mode_activated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_new_search: Option<bool>,
}

/// ツール結果（カテゴリ名 → 結果）
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPayload {
    pub tool_name: String,
    pub categories: Vec<(String, CategoryResults)>,
}

/// カテゴリごとの結果: ランキング済みHTML または レコード配列
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryResults {
    Html(String),
    Records(Vec<Value>),
}

impl CategoryResults {
    fn from_value(value: &Value) -> Option<Self> {
        let results = value.get("results").unwrap_or(value);
        match results {
            Value::String(html) if !html.trim().is_empty() => Some(CategoryResults::Html(html.clone())),
            Value::Array(records) => Some(CategoryResults::Records(records.clone())),
            _ => None,
        }
    }

    pub fn as_html(&self) -> Option<&str> {
        match self {
            CategoryResults::Html(html) => Some(html),
            CategoryResults::Records(_) => None,
        }
    }

    /// `{"results": ...}` 形式に戻す
    pub fn to_value(&self) -> Value {
        let results = match self {
            CategoryResults::Html(html) => Value::String(html.clone()),
            CategoryResults::Records(records) => Value::Array(records.clone()),
        };
        serde_json::json!({ "results": results })
    }
}

impl ToolPayload {
    /// `{tool_name, tool_data}` 形式から生成
    pub fn from_parts(tool_name: &str, tool_data: &Value) -> Option<Self> {
        let map = tool_data.as_object()?;
        let categories: Vec<(String, CategoryResults)> = map
            .iter()
            .filter_map(|(name, value)| {
                CategoryResults::from_value(value).map(|results| (name.clone(), results))
            })
            .collect();
        Some(Self {
            tool_name: tool_name.to_string(),
            categories,
        })
    }

    pub fn is_maps_tool(&self) -> bool {
        self.tool_name == MAPS_TOOL
    }
}

impl StreamEvent {
    pub fn is_reload(&self) -> bool {
        self.event_type.as_deref() == Some(RELOAD_PAGE)
    }

    /// 本文（Intro に挿入する内容）の候補を優先順で返す
    ///
    /// `complete_html` → `answer` → `content_payload.answer`
    pub fn primary_content(&self) -> Option<&str> {
        non_empty(self.complete_html.as_deref())
            .or_else(|| non_empty(self.answer.as_deref()))
            .or_else(|| {
                let payload = self.content_payload.as_ref()?;
                non_empty(payload.get("answer").and_then(Value::as_str).or_else(|| payload.as_str()))
            })
    }

    /// 地図・カテゴリ結果のペイロード（`map_payload` と `tool_name`+`tool_data` の両方）
    pub fn tool_payloads(&self) -> Vec<ToolPayload> {
        let mut payloads = Vec::new();
        if let Some(map_payload) = &self.map_payload {
            let name = map_payload
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if let Some(payload) = map_payload
                .get("tool_data")
                .and_then(|data| ToolPayload::from_parts(name, data))
            {
                payloads.push(payload);
            }
        }
        if let (Some(name), Some(data)) = (&self.tool_name, &self.tool_data) {
            if let Some(payload) = ToolPayload::from_parts(name, data) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// 会話モードを有効にするか（`force_new_search` が立っていれば無効）
    pub fn activates_conversation(&self) -> bool {
        self.chatbot_mode_activated.unwrap_or(false) && !self.force_new_search.unwrap_or(false)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_ignored() {
        let ev: StreamEvent =
            serde_json::from_str(r#"{"status":"Cerco...","foo":1,"bar":{"x":true}}"#).unwrap();
        assert_eq!(ev.status.as_deref(), Some("Cerco..."));
        assert!(!ev.is_reload());
    }

    #[test]
    fn test_reload_event() {
        let ev: StreamEvent =
            serde_json::from_str(r#"{"type":"reload_page","user_message":"hotel a Lecce"}"#).unwrap();
        assert!(ev.is_reload());
        assert_eq!(ev.user_message.as_deref(), Some("hotel a Lecce"));
    }

    #[test]
    fn test_primary_content_priority() {
        let ev = StreamEvent {
            answer: Some("<p>answer</p>".into()),
            content_payload: Some(json!({"answer": "<p>payload</p>"})),
            ..Default::default()
        };
        assert_eq!(ev.primary_content(), Some("<p>answer</p>"));

        let ev = StreamEvent {
            complete_html: Some("  ".into()),
            content_payload: Some(json!({"answer": "<p>payload</p>"})),
            ..Default::default()
        };
        assert_eq!(ev.primary_content(), Some("<p>payload</p>"));

        assert_eq!(StreamEvent::default().primary_content(), None);
    }

    #[test]
    fn test_tool_payloads_both_sources() {
        let ev: StreamEvent = serde_json::from_value(json!({
            "map_payload": {
                "tool_name": "search_google_maps",
                "tool_data": { "hotel": { "results": "<div class='activities-grid'></div>" } }
            },
            "tool_name": "search_google_maps",
            "tool_data": { "vini": { "results": [{"place_id": "w1", "nome": "Enoteca"}] } }
        }))
        .unwrap();

        let payloads = ev.tool_payloads();
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].is_maps_tool());
        assert!(matches!(payloads[0].categories[0].1, CategoryResults::Html(_)));
        match &payloads[1].categories[0].1 {
            CategoryResults::Records(records) => assert_eq!(records.len(), 1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_tool_payload_skips_empty_results() {
        let payload = ToolPayload::from_parts(
            "search_google_maps",
            &json!({ "hotel": { "results": "" }, "vini": { "other": 1 }, "dolci": [] }),
        )
        .unwrap();
        assert_eq!(payload.categories.len(), 1);
        assert_eq!(payload.categories[0].0, "dolci");
    }

    #[test]
    fn test_activates_conversation() {
        let ev = StreamEvent {
            chatbot_mode_activated: Some(true),
            ..Default::default()
        };
        assert!(ev.activates_conversation());
        let ev = StreamEvent {
            chatbot_mode_activated: Some(true),
            force_new_search: Some(true),
            ..Default::default()
        };
        assert!(!ev.activates_conversation());
    }

    #[test]
    fn test_chatbot_message_wire() {
        let ev: StreamEvent =
            serde_json::from_str(r#"{"chatbot_message":{"message":"Ciao","isUser":false}}"#).unwrap();
        let msg = ev.chatbot_message.unwrap();
        assert_eq!(msg.message, "Ciao");
        assert!(!msg.is_user);
    }
}
