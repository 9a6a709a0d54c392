use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio::time::Duration;

#[derive(Debug, Default)]
struct WatchState {
    modified: Option<SystemTime>,
    hash: Option<String>,
    has_changes: bool,
}

#[derive(Debug)]
struct WatchShared {
    path: PathBuf,
    state: Mutex<WatchState>,
}

impl WatchShared {
    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acknowledge_blocking(&self) {
        let mut state = self.lock();
        state.has_changes = false;
        self.rebaseline(&mut state);
    }

    fn rebaseline(&self, state: &mut WatchState) {
        match std::fs::metadata(&self.path).and_then(|metadata| metadata.modified()) {
            Ok(modified) => {
                state.modified = Some(modified);
                state.hash = file_hash(&self.path);
            }
            Err(_) => {
                state.modified = None;
                state.hash = None;
            }
        }
    }

    /// mtime is the cheap gate; the content hash decides. A touch without a content change
    /// only moves the mtime baseline.
    fn probe_blocking(&self) -> bool {
        let Ok(modified) = std::fs::metadata(&self.path).and_then(|metadata| metadata.modified()) else {
            return false;
        };

        let mut state = self.lock();
        if state.modified == Some(modified) {
            return false;
        }
        let hash = file_hash(&self.path);
        if hash != state.hash {
            state.has_changes = true;
            return true;
        }
        state.modified = Some(modified);
        false
    }
}

/// Polls one file for external modification using mtime and a SHA-256 of its content.
#[derive(Debug)]
pub struct FileWatcher {
    shared: Arc<WatchShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let shared = Arc::new(WatchShared {
            path: path.into(),
            state: Mutex::new(WatchState::default()),
        });
        {
            let mut state = shared.lock();
            shared.rebaseline(&mut state);
        }
        Self {
            shared,
            task: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Probes the file once. Returns true when the content differs from the baseline; the
    /// change stays latched until [`FileWatcher::acknowledge`].
    pub fn check_now(&self) -> bool {
        self.shared.probe_blocking()
    }

    /// [`FileWatcher::check_now`] on the blocking pool, for use inside async code.
    pub async fn probe(&self) -> bool {
        let shared = self.shared.clone();
        match tokio::task::spawn_blocking(move || shared.probe_blocking()).await {
            Ok(changed) => changed,
            Err(error) => {
                tracing::warn!(error = %error, "file probe task failed");
                false
            }
        }
    }

    pub fn has_changes(&self) -> bool {
        self.shared.lock().has_changes
    }

    /// Clears the change flag and adopts the file's current state as the new baseline.
    pub fn acknowledge(&self) {
        self.shared.acknowledge_blocking();
    }

    /// [`FileWatcher::acknowledge`] on the blocking pool.
    pub async fn rebaseline(&self) {
        let shared = self.shared.clone();
        if let Err(error) = tokio::task::spawn_blocking(move || shared.acknowledge_blocking()).await {
            tracing::warn!(error = %error, "file rebaseline task failed");
        }
    }

    /// Starts background polling. A running watcher is left as is.
    pub fn spawn(&self, interval: Duration) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().map(|handle| !handle.is_finished()).unwrap_or(false) {
            return;
        }

        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let probe = shared.clone();
                match tokio::task::spawn_blocking(move || probe.probe_blocking()).await {
                    Ok(true) => {
                        tracing::info!(path = %shared.path.display(), "notebook file changed on disk");
                    }
                    Ok(false) => {}
                    Err(error) => tracing::warn!(error = %error, "file probe task failed"),
                }
            }
        }));
    }

    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn file_hash(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(sha256_hex(&bytes))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}
