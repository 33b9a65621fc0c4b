use std::sync::Arc;

use crate::catalog::store::Store;
use crate::config::Config;
use crate::delivery::coordinator::Coordinator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Catalog backend, used directly by handlers that bypass the coordinator
    /// (style upserts).
    pub store: Arc<dyn Store>,
    pub coordinator: Arc<Coordinator>,
    pub config: Config,
}
