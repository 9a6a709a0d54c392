use crate::models::Toast;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_millis(4_000);

#[derive(Default)]
struct ToastSlot {
    current: Option<Toast>,
    dismiss: Option<JoinHandle<()>>,
    generation: u64,
}

/// Single-slot notification surface. A new toast replaces the visible one instead of stacking.
#[derive(Clone)]
pub struct Toaster {
    slot: Arc<Mutex<ToastSlot>>,
    duration: Duration,
}

impl Default for Toaster {
    fn default() -> Self {
        Self::new(DEFAULT_TOAST_DURATION)
    }
}

impl Toaster {
    pub fn new(duration: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(ToastSlot::default())),
            duration,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ToastSlot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Outside a tokio runtime the toast stays until replaced or dismissed.
    pub fn show(&self, toast: Toast) {
        let mut slot = self.lock();
        if let Some(previous) = slot.dismiss.take() {
            previous.abort();
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.current = Some(toast);

        if let Ok(handle) = Handle::try_current() {
            let generation = slot.generation;
            let weak = Arc::downgrade(&self.slot);
            let duration = self.duration;
            slot.dismiss = Some(handle.spawn(async move {
                tokio::time::sleep(duration).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let mut slot = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if slot.generation == generation {
                    slot.current = None;
                    slot.dismiss = None;
                }
            }));
        }
    }

    pub fn current(&self) -> Option<Toast> {
        self.lock().current.clone()
    }

    pub fn dismiss(&self) {
        let mut slot = self.lock();
        if let Some(task) = slot.dismiss.take() {
            task.abort();
        }
        slot.current = None;
    }
}
