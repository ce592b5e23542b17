pub mod activity_card;
pub mod chat_panel;
pub mod header;
pub mod page_tabs;
pub mod search_bar;
pub mod status_bar;
