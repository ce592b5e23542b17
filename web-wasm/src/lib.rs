//! SiteSense Itinerary Web App (Leptos + WASM)

mod app;
mod bridge;
mod components;
mod fetch;
mod runtime;
mod storage;
mod view;

use wasm_bindgen::prelude::*;

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    if let Err(e) = console_log::init_with_level(log::Level::Info) {
        web_sys::console::warn_1(&format!("ロガーを初期化できません: {}", e).into());
    }
    leptos::mount::mount_to_body(app::App);
}
