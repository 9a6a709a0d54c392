pub mod config;
pub mod debug_panel;
pub mod errors;
pub mod event_store;
pub mod models;
pub mod sync;
pub mod toast;

pub use crate::config::{load_settings, update_settings};
pub use crate::debug_panel::{DebugPanel, TreeNode};
pub use crate::errors::{AppError, AppResult};
pub use crate::event_store::{EventStore, LoggedError, Subscription};
pub use crate::models::{
    CellRecord, ConflictDecision, Event, EventFilter, EventStats, EventStatus, EventType,
    NotebookDocument, StoreAction, SyncSettings, Toast, ToastKind,
};
pub use crate::sync::{
    ConflictResolver, DirtyFlag, DirtyTracker, FileTransport, HttpTransport, PollerPhase,
    SyncHost, SyncPoller, SyncTransport,
};
pub use crate::toast::Toaster;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the global subscriber. With a log directory, JSON lines go to a daily rolling
/// file; otherwise human-readable output goes to stderr. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(log_dir: Option<&Path>) -> AppResult<()> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let Some(log_dir) = log_dir else {
        return tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|error| AppError::Internal(error.to_string()));
    };

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "notebook-sync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
