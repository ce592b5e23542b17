//! メインアプリケーションコンポーネント

use crate::components::{
    activity_card::ActivityCard,
    chat_panel::ChatPanel,
    header::Header,
    page_tabs::PageTabs,
    search_bar::SearchBar,
    status_bar::{StatusBar, SyncNoticeBar},
};
use crate::runtime::Handle;
use crate::view::ViewSignals;
use itinerary_common::{Activity, ResultPage};
use leptos::prelude::*;

/// メインアプリケーションコンポーネント
#[component]
pub fn App() -> impl IntoView {
    let signals = ViewSignals::new();
    let handle = Handle::new(signals);
    handle.restore_on_start();

    let on_search = move |query: String| handle.search(query);
    let on_navigate = move |page: ResultPage| handle.navigate(page);
    let on_next = move |_| handle.next_page();
    let on_select = move |activity: Activity| handle.select(activity);
    let on_deselect = move |activity: Activity| {
        if let Some(id) = activity.id() {
            handle.deselect(id.to_string());
        }
    };
    let on_save = move |_| handle.save_cache();
    let on_dismiss = move |_| handle.dismiss_notice();

    let page = signals.page;
    let suggestions = move || {
        signals
            .sections
            .get()
            .into_iter()
            .filter(|s| s.page == ResultPage::Suggestions && !s.cards.is_empty())
            .collect::<Vec<_>>()
    };

    view! {
        <div class="container">
            <Header location=signals.location conversation=signals.conversation />

            <SearchBar searching=signals.searching on_search=on_search />

            <StatusBar status=signals.status errors=signals.errors overlay=signals.overlay />

            <PageTabs page=page on_navigate=on_navigate on_next=on_next />

            <section class="result-page" id="intro" hidden=move || page.get() != ResultPage::Intro>
                <div class="intro-content" inner_html=move || signals.intro_html.get()></div>
                <ChatPanel chat=signals.chat />
            </section>

            <section class="result-page" id="selection" hidden=move || page.get() != ResultPage::Selection>
                <Show
                    when=move || !signals.selection.get().is_empty()
                    fallback=|| view! { <p class="text-muted">"Nessun luogo selezionato"</p> }
                >
                    <div class="activities-grid">
                        <For
                            each=move || signals.selection.get()
                            key=|activity| activity.id().map(str::to_string).unwrap_or_else(|| activity.name.clone())
                            children=move |activity| {
                                view! { <ActivityCard activity=activity action_label="Rimuovi" on_action=on_deselect /> }
                            }
                        />
                    </div>
                </Show>
            </section>

            <section class="result-page" id="lfw" hidden=move || page.get() != ResultPage::Suggestions>
                <Show
                    when=move || !suggestions().is_empty()
                    fallback=|| view! { <p class="text-muted">"Nessun suggerimento"</p> }
                >
                    <For
                        each=suggestions
                        key=|section| (section.key.clone(), section.cards.len())
                        children=move |section| {
                            view! {
                                <div class="category-section">
                                    <h3>{section.title.clone()}</h3>
                                    <div class="activities-grid">
                                        {section
                                            .cards
                                            .into_iter()
                                            .map(|activity| {
                                                view! { <ActivityCard activity=activity action_label="Aggiungi" on_action=on_select /> }
                                            })
                                            .collect_view()}
                                    </div>
                                </div>
                            }
                        }
                    />
                </Show>
            </section>

            <section class="result-page" id="map" hidden=move || page.get() != ResultPage::Map>
                <div id="map-container" class="map-container"></div>
            </section>

            <SyncNoticeBar notice=signals.notice on_save=on_save on_dismiss=on_dismiss />

            <Show when=move || page.get() == ResultPage::Selection && !signals.selection.get().is_empty()>
                <button class="btn btn-primary" id="save-itinerary-btn" on:click=move |_| handle.save_itinerary()>
                    {move || format!("salva itinerario ({})", signals.selection.get().len())}
                </button>
            </Show>

            <button class="btn btn-secondary btn-small" on:click=move |_| handle.reset()>
                "Nuova ricerca"
            </button>
        </div>
    }
}
