use chrono::{DateTime, Utc};

use crate::session::CommandEngine;

/// Shared state handed to every axum handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: CommandEngine,
    /// Serve the diagnostic console on `GET /`.
    pub debug: bool,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: CommandEngine, debug: bool) -> Self {
        Self {
            engine,
            debug,
            started_at: Utc::now(),
        }
    }
}
