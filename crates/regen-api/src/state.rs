//! Application state shared across handlers.

use regen_cache::CacheHandler;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheHandler>,
}

impl AppState {
    pub fn new(cache: Arc<CacheHandler>) -> Self {
        Self { cache }
    }
}
