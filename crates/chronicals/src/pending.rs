//! Pending-message store.
//!
//! Three independent maps of in-flight artifacts, keyed by transaction id
//! or page key. An entry is written immediately before its send attempt
//! and removed on delivery ack or terminal failure; whatever is left in
//! the maps when a connection drops is exactly what the resend engine
//! replays after reconnect.
//!
//! Locks are plain `std::sync::Mutex` — every operation is a pure map
//! set/get/delete and nothing is held across an await.

use std::collections::HashMap;
use std::sync::Mutex;

use chronicals_wire::types::LoadingState;

#[derive(Debug, Default)]
pub struct PendingArtifacts {
    io_calls: Mutex<HashMap<String, String>>,
    layouts: Mutex<HashMap<String, String>>,
    loading: Mutex<HashMap<String, LoadingState>>,
}

impl PendingArtifacts {
    pub fn set_io_call(&self, transaction_id: &str, payload: String) {
        self.lock_io().insert(transaction_id.to_string(), payload);
    }

    pub fn remove_io_call(&self, transaction_id: &str) {
        self.lock_io().remove(transaction_id);
    }

    pub fn io_calls(&self) -> Vec<(String, String)> {
        self.lock_io()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn set_layout(&self, page_key: &str, payload: String) {
        self.lock_layouts().insert(page_key.to_string(), payload);
    }

    pub fn remove_layout(&self, page_key: &str) {
        self.lock_layouts().remove(page_key);
    }

    pub fn layouts(&self) -> Vec<(String, String)> {
        self.lock_layouts()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn set_loading(&self, transaction_id: &str, state: LoadingState) {
        self.lock_loading().insert(transaction_id.to_string(), state);
    }

    pub fn remove_loading(&self, transaction_id: &str) {
        self.lock_loading().remove(transaction_id);
    }

    pub fn loading_states(&self) -> Vec<(String, LoadingState)> {
        self.lock_loading()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Drop every artifact belonging to `id` (a transaction id or page
    /// key). Called when the owner closes.
    pub fn remove_all_for(&self, id: &str) {
        self.lock_io().remove(id);
        self.lock_layouts().remove(id);
        self.lock_loading().remove(id);
    }

    /// Forget everything. Used by `immediately_close`.
    pub fn clear(&self) {
        self.lock_io().clear();
        self.lock_layouts().clear();
        self.lock_loading().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lock_io().is_empty() && self.lock_layouts().is_empty() && self.lock_loading().is_empty()
    }

    fn lock_io(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.io_calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_layouts(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.layouts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_loading(&self) -> std::sync::MutexGuard<'_, HashMap<String, LoadingState>> {
        self.loading.lock().unwrap_or_else(|e| e.into_inner())
    }
}
