use std::sync::Arc;

use crate::audit::query::{CursorCodec, PageLimits};
use crate::config::Config;
use crate::store::Store;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Entity + event log persistence. Postgres in production.
    pub store: Arc<dyn Store>,
    pub config: Config,
    /// Signs and verifies pagination cursors with `CURSOR_SECRET`.
    pub cursors: CursorCodec,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let cursors = CursorCodec::new(&config.cursor_secret);
        Self {
            store,
            config,
            cursors,
        }
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_size: self.config.default_page_size,
            max_size: self.config.max_page_size,
        }
    }
}
