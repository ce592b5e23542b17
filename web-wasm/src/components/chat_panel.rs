//! 会話の表示

use itinerary_common::ChatMessage;
use leptos::prelude::*;

#[component]
pub fn ChatPanel(chat: RwSignal<Vec<ChatMessage>>) -> impl IntoView {
    view! {
        <div class="chat-panel">
            {move || {
                chat.get()
                    .into_iter()
                    .map(|message| {
                        let class = if message.is_user { "chat-message user" } else { "chat-message bot" };
                        view! { <div class=class>{message.text}</div> }
                    })
                    .collect_view()
            }}
        </div>
    }
}
