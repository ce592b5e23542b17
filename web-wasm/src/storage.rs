//! localStorage を使うキー/値ストア

use gloo::storage::{LocalStorage, Storage};
use itinerary_common::{Error, KeyValueStore, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Option<String> {
        LocalStorage::raw().get_item(key).ok().flatten()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        LocalStorage::raw()
            .set_item(key, value)
            .map_err(|e| Error::Storage(format!("{:?}", e)))
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        LocalStorage::raw()
            .remove_item(key)
            .map_err(|e| Error::Storage(format!("{:?}", e)))
    }
}

#[cfg(all(target_arch = "wasm32", test))]
mod wasm_tests {
    use super::*;
    use itinerary_common::persist::{self, keys};
    use itinerary_common::Activity;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn wasm_local_store_roundtrip() {
        let mut store = LocalStore::new();
        store.set(keys::CURRENT_LOCATION, "Lecce").expect("set failed");
        assert_eq!(store.get(keys::CURRENT_LOCATION).as_deref(), Some("Lecce"));

        store.remove(keys::CURRENT_LOCATION).expect("remove failed");
        assert!(store.get(keys::CURRENT_LOCATION).is_none());
    }

    #[wasm_bindgen_test]
    fn wasm_selection_persists() {
        let mut store = LocalStore::new();
        let selection = vec![Activity::new("p1", "Trattoria Le Zie")];
        persist::save_selection(&mut store, &selection).expect("save failed");
        assert_eq!(persist::load_selection(&store), selection);
        store.remove(keys::MANUAL_SELECTION).expect("remove failed");
    }
}
