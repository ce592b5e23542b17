//! ヘッダーコンポーネント

use leptos::prelude::*;

#[component]
pub fn Header(location: RwSignal<Option<String>>, conversation: RwSignal<bool>) -> impl IntoView {
    view! {
        <header class="header">
            <h1>"SiteSense"</h1>
            <span class="current-location">
                {move || location.get().map(|l| format!("📍 {}", l)).unwrap_or_default()}
            </span>
            <Show when=move || conversation.get()>
                <span class="badge">"Conversazione"</span>
            </Show>
        </header>
    }
}
