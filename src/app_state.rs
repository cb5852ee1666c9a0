use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{orchestrator::Orchestrator, queue::RedisBus};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub bus: Arc<RedisBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub notification_queue: String,
}

impl AppState {
    pub fn new(
        db: PgPool,
        bus: Arc<RedisBus>,
        orchestrator: Orchestrator,
        notification_queue: impl Into<String>,
    ) -> Self {
        Self {
            db,
            bus,
            orchestrator: Arc::new(orchestrator),
            notification_queue: notification_queue.into(),
        }
    }
}
