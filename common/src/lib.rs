//! Itinerary Common Library
//!
//! CLIとWeb(WASM)で共有される検索ランタイムのコア:
//! ストリームのデコード、イベントの振り分け、選択/提案ストア、ページ遷移、
//! キャッシュ同期、検索セッション。DOM・ネットワーク・ファイルには触れない。

pub mod api;
pub mod cache_sync;
pub mod category;
pub mod context;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod frame;
pub mod html;
pub mod location;
pub mod observe;
pub mod pages;
pub mod persist;
pub mod sanitize;
pub mod session;
pub mod store;
pub mod types;

pub use api::{Endpoints, ItineraryPayload, ProgramDetails, SaveStep, SearchRequest};
pub use cache_sync::{CacheSyncPolicy, CitySnapshot, SyncDecision, SyncNotice};
pub use category::{infer_category, normalize_category, Category, CategoryHints};
pub use context::{AppContext, ContextConfig, Frontend, Headless, SearchStart};
pub use debounce::Debouncer;
pub use dispatch::{Dispatch, EventDispatcher};
pub use error::{Error, Result};
pub use event::{CategoryResults, StreamEvent, ToolPayload};
pub use frame::{pump, FrameDecoder, PumpOutcome};
pub use location::extract_location_from_query;
pub use pages::{CardPlacement, PageEffect, PageStateMachine};
pub use persist::{KeyValueStore, MemoryStore};
pub use session::{SearchFlags, SearchSession, SearchTicket};
pub use store::{ActivityStore, SelectionOrigin, StoreChange, StoreCommand};
pub use types::{Activity, ChatMessage, ChatTurn, Coordinates, ResultPage};
