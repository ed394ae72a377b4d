use std::sync::Arc;

use crate::db::JobStore;
use crate::services::queue::JobQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: JobQueue,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            queue: JobQueue::new(Arc::clone(&store)),
            store,
        }
    }
}
