//! ページ切り替え

use itinerary_common::ResultPage;
use leptos::prelude::*;

#[component]
pub fn PageTabs<FN, FX>(page: RwSignal<ResultPage>, on_navigate: FN, on_next: FX) -> impl IntoView
where
    FN: Fn(ResultPage) + 'static + Clone,
    FX: Fn(()) + 'static + Clone,
{
    view! {
        <nav class="page-tabs">
            {ResultPage::ORDER
                .iter()
                .map(|&target| {
                    let on_navigate = on_navigate.clone();
                    view! {
                        <button
                            class=move || if page.get() == target { "tab active" } else { "tab" }
                            on:click=move |_| on_navigate(target)
                        >
                            {target.title()}
                        </button>
                    }
                })
                .collect_view()}
            <button
                class="btn btn-secondary btn-small"
                disabled=move || page.get().next().is_none()
                on:click={
                    let on_next = on_next.clone();
                    move |_| on_next(())
                }
            >
                "Avanti →"
            </button>
        </nav>
    }
}
