//! 店舗カード

use itinerary_common::Activity;
use leptos::prelude::*;

#[component]
pub fn ActivityCard<FA>(activity: Activity, action_label: &'static str, on_action: FA) -> impl IntoView
where
    FA: Fn(Activity) + 'static + Clone + Send + Sync,
{
    let rating = activity
        .rating
        .map(|r| match activity.review_count {
            Some(count) => format!("⭐ {:.1} ({})", r, count),
            None => format!("⭐ {:.1}", r),
        })
        .unwrap_or_default();
    let maps_url = activity.maps_url();
    let heading = format!("{} {}", activity.category.icon(), activity.name);
    let address = activity.address.clone();
    let image = activity.image_url.clone();
    let place_id = activity.place_id.clone().unwrap_or_default();

    view! {
        <div class="activity-card" data-place-id=place_id>
            {image.map(|src| view! { <img class="activity-image" src=src alt="" /> })}
            <h4>{heading}</h4>
            <p class="activity-address">{address}</p>
            <p class="activity-rating">{rating}</p>
            <a href=maps_url target="_blank" rel="noopener noreferrer">"Google Maps"</a>
            <button
                class="btn btn-small"
                on:click={
                    let on_action = on_action.clone();
                    move |_| on_action(activity.clone())
                }
            >
                {action_label}
            </button>
        </div>
    }
}
