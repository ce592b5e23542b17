//! 検索入力

use leptos::prelude::*;

#[component]
pub fn SearchBar<FS>(searching: RwSignal<bool>, on_search: FS) -> impl IntoView
where
    FS: Fn(String) + 'static + Clone,
{
    let (query, set_query) = signal(String::new());

    let submit = move |on_search: FS| {
        let text = query.get_untracked();
        if !text.trim().is_empty() {
            on_search(text);
            set_query.set(String::new());
        }
    };

    view! {
        <div class="search-bar">
            <input
                type="text"
                id="search-input"
                placeholder="Dove vuoi andare?"
                prop:value=move || query.get()
                on:input=move |ev| {
                    set_query.set(event_target_value(&ev));
                }
                on:keydown={
                    let on_search = on_search.clone();
                    move |ev: web_sys::KeyboardEvent| {
                        if ev.key() == "Enter" {
                            submit(on_search.clone());
                        }
                    }
                }
            />
            <button
                class="btn btn-primary"
                disabled=move || searching.get()
                on:click={
                    let on_search = on_search.clone();
                    move |_| submit(on_search.clone())
                }
            >
                {move || if searching.get() { "Cerco..." } else { "Cerca" }}
            </button>
        </div>
    }
}
