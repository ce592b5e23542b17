//! 地図コンポーネント（`window.mapManager`）との橋渡し
//!
//! 地図側は任意。存在しない、またはメソッドがない場合は何もしない。

use itinerary_common::{Activity, Coordinates};
use serde::Deserialize;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

const MAP_MANAGER: &str = "mapManager";

fn map_manager() -> Option<JsValue> {
    let window = web_sys::window()?;
    js_sys::Reflect::get(&window, &JsValue::from_str(MAP_MANAGER))
        .ok()
        .filter(|value| value.is_object())
}

fn method(target: &JsValue, name: &str) -> Option<js_sys::Function> {
    js_sys::Reflect::get(target, &JsValue::from_str(name))
        .ok()?
        .dyn_into::<js_sys::Function>()
        .ok()
}

fn to_js<T: serde::Serialize + ?Sized>(value: &T) -> Option<JsValue> {
    match serde_wasm_bindgen::to_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("地図用データの変換に失敗: {}", e);
            None
        }
    }
}

/// 選択リストを地図の旅程として描画
pub fn update_itinerary(selection: &[Activity]) {
    let Some(manager) = map_manager() else {
        return;
    };
    let (Some(update), Some(activities)) = (method(&manager, "updateItinerary"), to_js(selection)) else {
        return;
    };
    if let Err(e) = update.call1(&manager, &activities) {
        log::warn!("updateItinerary に失敗: {:?}", e);
    }
}

/// 地図の大きさを再計算させる
pub fn refresh() {
    let Some(manager) = map_manager() else {
        return;
    };
    if let Some(refresh) = method(&manager, "refresh") {
        if let Err(e) = refresh.call0(&manager) {
            log::warn!("refresh に失敗: {:?}", e);
        }
    }
}

#[derive(Deserialize)]
struct OrderedActivity {
    #[serde(default)]
    place_id: Option<String>,
}

/// 起点からの距離順に並べたIDを地図側に計算させる
pub async fn order_by_distance(origin: Coordinates, selection: &[Activity]) -> Option<Vec<String>> {
    let manager = map_manager()?;
    let origin = Activity {
        coordinates: Some(origin),
        ..Default::default()
    };
    let order = method(&manager, "orderActivitiesByDistance")?;
    let promise = order
        .call2(&manager, &to_js(&origin)?, &to_js(selection)?)
        .ok()?
        .dyn_into::<js_sys::Promise>()
        .ok()?;

    let ordered = match JsFuture::from(promise).await {
        Ok(value) => value,
        Err(e) => {
            log::warn!("距離計算に失敗: {:?}", e);
            return None;
        }
    };
    let ordered: Vec<OrderedActivity> = serde_wasm_bindgen::from_value(ordered).ok()?;
    Some(ordered.into_iter().filter_map(|a| a.place_id).collect())
}
