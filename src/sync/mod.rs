pub mod cursor;
pub mod engine;

use thiserror::Error;

use crate::steam::session::{SessionError, SessionState};

/// Cycle-level failures. Per-product problems never surface here; they only
/// shrink the result.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("steam session not ready (state: {state}, transport connected: {transport_connected})")]
    NotReady {
        state: SessionState,
        transport_connected: bool,
    },
    #[error("change feed request failed: {0:#}")]
    TransportFailure(anyhow::Error),
    #[error("change cursor unavailable: {0:#}")]
    Cursor(anyhow::Error),
    #[error("scrape cycle cancelled")]
    Cancelled,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SyncError {
    /// Errors the scheduler should simply wait out until the next tick.
    pub fn is_skip(&self) -> bool {
        matches!(self, SyncError::NotReady { .. } | SyncError::Cancelled)
    }
}
