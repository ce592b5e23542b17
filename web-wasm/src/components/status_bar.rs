//! ステータス行・エラー・保存通知

use itinerary_common::SyncNotice;
use leptos::prelude::*;

#[component]
pub fn StatusBar(
    status: RwSignal<Option<String>>,
    errors: RwSignal<Vec<String>>,
    overlay: RwSignal<Option<&'static str>>,
) -> impl IntoView {
    view! {
        <div class="status-bar">
            {move || status.get().map(|text| view! { <p class="status-text">{text}</p> })}
            {move || overlay.get().map(|label| view! { <div class="page-overlay">{label}</div> })}
            {move || {
                errors.get()
                    .into_iter()
                    .map(|message| view! { <p class="error-text">{message}</p> })
                    .collect_view()
            }}
        </div>
    }
}

#[component]
pub fn SyncNoticeBar<FS, FD>(notice: RwSignal<Option<SyncNotice>>, on_save: FS, on_dismiss: FD) -> impl IntoView
where
    FS: Fn(()) + 'static + Clone,
    FD: Fn(()) + 'static + Clone + Send + Sync,
{
    view! {
        <div class="sync-bar">
            <button
                class="btn btn-secondary btn-small"
                on:click={
                    let on_save = on_save.clone();
                    move |_| on_save(())
                }
            >
                "Salva ricerca"
            </button>
            {move || {
                let on_dismiss = on_dismiss.clone();
                notice.get().map(|notice| {
                    let class = if notice.ok { "sync-notice ok" } else { "sync-notice error" };
                    view! {
                        <div class=class on:click=move |_| on_dismiss(())>
                            {notice.message}
                        </div>
                    }
                })
            }}
        </div>
    }
}
