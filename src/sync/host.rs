use crate::models::{CellRecord, ConflictPrompt, NotebookInfo, Toast};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The editing surface the poller drives: rendered cells, toolbar, modal and toasts.
pub trait SyncHost: Send + Sync {
    fn render_cells(&self, cells: &[CellRecord]);
    fn refresh_info(&self, info: &NotebookInfo);
    fn show_conflict_dialog(&self, prompt: &ConflictPrompt);
    fn close_conflict_dialog(&self);
    /// Flips the persisted indicator to "saved".
    fn mark_saved(&self);
    fn show_toast(&self, toast: Toast);
}

/// Local-modification flag owned by the editing surface. Read synchronously at check time.
pub trait DirtyTracker: Send + Sync {
    fn is_dirty(&self) -> bool;
    fn mark_clean(&self);
}

#[derive(Debug, Clone, Default)]
pub struct DirtyFlag {
    dirty: Arc<AtomicBool>,
}

impl DirtyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

impl DirtyTracker for DirtyFlag {
    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn mark_clean(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }
}
