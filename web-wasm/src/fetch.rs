//! fetch によるバックエンド呼び出し
//!
//! `/search` の応答本文は `ReadableStream` から `Uint8Array` のチャンクとして読み、
//! `futures::Stream` に包んで返す。`AbortController` を渡すとネットワークごと止まる。

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::JsValue;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortSignal, ReadableStreamDefaultReader, Request, RequestInit, RequestMode, Response};

fn js_error(value: JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

fn window() -> Result<web_sys::Window, String> {
    web_sys::window().ok_or_else(|| "window がありません".to_string())
}

async fn send(
    method: &str,
    url: &str,
    body: Option<String>,
    signal: Option<&AbortSignal>,
) -> Result<Response, String> {
    let opts = RequestInit::new();
    opts.set_method(method);
    opts.set_mode(RequestMode::SameOrigin);
    if let Some(body) = &body {
        opts.set_body(&JsValue::from_str(body));
    }
    if let Some(signal) = signal {
        opts.set_signal(Some(signal));
    }

    let request = Request::new_with_str_and_init(url, &opts).map_err(js_error)?;
    if body.is_some() {
        request
            .headers()
            .set("Content-Type", "application/json")
            .map_err(js_error)?;
    }

    let resp_value = JsFuture::from(window()?.fetch_with_request(&request))
        .await
        .map_err(js_error)?;
    let resp: Response = resp_value.dyn_into().map_err(js_error)?;

    if !resp.ok() {
        return Err(format!("Server error: {}", resp.status()));
    }
    Ok(resp)
}

/// GETしてJSONを受け取る
pub async fn get_json<T: DeserializeOwned>(url: &str) -> Result<T, String> {
    let resp = send("GET", url, None, None).await?;
    read_json(resp).await
}

/// 別ページへ移動
pub fn redirect(url: &str) {
    let moved = window().and_then(|w| w.location().set_href(url).map_err(js_error));
    if let Err(e) = moved {
        log::warn!("ページ移動に失敗: {}", e);
    }
}

/// 現在のパス
pub fn current_path() -> Option<String> {
    window().ok()?.location().pathname().ok()
}

/// JSONをPOSTしてJSONを受け取る
pub async fn post_json<B: Serialize, T: DeserializeOwned>(url: &str, body: &B) -> Result<T, String> {
    let body = serde_json::to_string(body).map_err(|e| e.to_string())?;
    let resp = send("POST", url, Some(body), None).await?;
    read_json(resp).await
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, String> {
    let json = JsFuture::from(resp.json().map_err(js_error)?)
        .await
        .map_err(js_error)?;
    serde_wasm_bindgen::from_value(json).map_err(|e| e.to_string())
}

/// JSONをPOSTし、応答本文をチャンクのストリームで返す
pub async fn post_stream<B: Serialize>(
    url: &str,
    body: &B,
    signal: &AbortSignal,
) -> Result<impl Stream<Item = Result<Vec<u8>, String>>, String> {
    let body = serde_json::to_string(body).map_err(|e| e.to_string())?;
    let resp = send("POST", url, Some(body), Some(signal)).await?;
    let reader: ReadableStreamDefaultReader = resp
        .body()
        .ok_or_else(|| "応答本文がありません".to_string())?
        .get_reader()
        .unchecked_into();

    Ok(futures::stream::unfold(Some(reader), |reader| async move {
        let reader = reader?;
        match read_chunk(&reader).await {
            Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    }))
}

async fn read_chunk(reader: &ReadableStreamDefaultReader) -> Result<Option<Vec<u8>>, String> {
    let result = JsFuture::from(reader.read()).await.map_err(js_error)?;
    let done = js_sys::Reflect::get(&result, &JsValue::from_str("done"))
        .map_err(js_error)?
        .as_bool()
        .unwrap_or(true);
    if done {
        return Ok(None);
    }
    let value = js_sys::Reflect::get(&result, &JsValue::from_str("value")).map_err(js_error)?;
    Ok(Some(js_sys::Uint8Array::new(&value).to_vec()))
}
