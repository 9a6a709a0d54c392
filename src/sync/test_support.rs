use crate::errors::{AppError, AppResult};
use crate::event_store::EventStore;
use crate::models::{
    AckResponse, CellRecord, CheckUpdatesResponse, ConflictPrompt, JsonObject, NotebookDocument,
    NotebookInfo, ReloadPayload, SaveResponse, SyncSettings, Toast,
};
use crate::sync::host::{DirtyFlag, SyncHost};
use crate::sync::poller::SyncPoller;
use crate::sync::transport::SyncTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

/// Sleeps on the paused clock, then lets spawned timers run to completion.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub struct MockTransport {
    checks: Mutex<VecDeque<Result<bool, String>>>,
    check_delay: Mutex<Duration>,
    reload: Mutex<Result<Option<Vec<CellRecord>>, String>>,
    ack_error: Mutex<Option<String>>,
    save_error: Mutex<Option<String>>,
    saved: Mutex<Vec<NotebookDocument>>,
    check_calls: AtomicUsize,
    reload_calls: AtomicUsize,
    ack_calls: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            checks: Mutex::new(VecDeque::new()),
            check_delay: Mutex::new(Duration::ZERO),
            reload: Mutex::new(Ok(None)),
            ack_error: Mutex::new(None),
            save_error: Mutex::new(None),
            saved: Mutex::new(Vec::new()),
            check_calls: AtomicUsize::new(0),
            reload_calls: AtomicUsize::new(0),
            ack_calls: AtomicUsize::new(0),
        }
    }
}

impl MockTransport {
    /// Queues the next check result. An empty queue answers "unchanged".
    pub fn push_check(&self, result: Result<bool, String>) {
        self.checks.lock().expect("checks").push_back(result);
    }

    pub fn set_check_delay(&self, delay: Duration) {
        *self.check_delay.lock().expect("delay") = delay;
    }

    pub fn set_reload(&self, result: Result<Option<Vec<CellRecord>>, String>) {
        *self.reload.lock().expect("reload") = result;
    }

    pub fn fail_acknowledge(&self, message: &str) {
        *self.ack_error.lock().expect("ack") = Some(message.to_string());
    }

    pub fn fail_save(&self, message: &str) {
        *self.save_error.lock().expect("save") = Some(message.to_string());
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn reload_calls(&self) -> usize {
        self.reload_calls.load(Ordering::SeqCst)
    }

    pub fn ack_calls(&self) -> usize {
        self.ack_calls.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Vec<NotebookDocument> {
        self.saved.lock().expect("saved").clone()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn check_updates(&self) -> AppResult<CheckUpdatesResponse> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.check_delay.lock().expect("delay");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let next = self.checks.lock().expect("checks").pop_front();
        match next {
            Some(Ok(changed)) => Ok(CheckUpdatesResponse { changed }),
            Some(Err(message)) => Err(AppError::Transport(message)),
            None => Ok(CheckUpdatesResponse { changed: false }),
        }
    }

    async fn reload(&self) -> AppResult<ReloadPayload> {
        self.reload_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.reload.lock().expect("reload").clone();
        match result {
            Ok(Some(cells)) => {
                let mut metadata = JsonObject::new();
                metadata.insert("name".to_string(), Value::String("external".to_string()));
                Ok(ReloadPayload {
                    cells: Some(cells),
                    metadata: Some(metadata),
                })
            }
            Ok(None) => Ok(ReloadPayload::default()),
            Err(message) => Err(AppError::Transport(message)),
        }
    }

    async fn acknowledge(&self) -> AppResult<AckResponse> {
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.ack_error.lock().expect("ack").clone() {
            return Err(AppError::Transport(message));
        }
        Ok(AckResponse::default())
    }

    async fn save(&self, document: &NotebookDocument) -> AppResult<SaveResponse> {
        if let Some(message) = self.save_error.lock().expect("save").clone() {
            return Err(AppError::Io(message));
        }
        self.saved.lock().expect("saved").push(document.clone());
        Ok(SaveResponse {
            status: "saved".to_string(),
            path: None,
        })
    }
}

#[derive(Default)]
pub struct RecordingHost {
    rendered: Mutex<Vec<Vec<CellRecord>>>,
    infos: Mutex<Vec<NotebookInfo>>,
    dialogs: Mutex<Vec<ConflictPrompt>>,
    dialog_visible: AtomicBool,
    toasts: Mutex<Vec<Toast>>,
    saved_marks: AtomicUsize,
}

impl RecordingHost {
    pub fn rendered(&self) -> Vec<Vec<CellRecord>> {
        self.rendered.lock().expect("rendered").clone()
    }

    pub fn infos(&self) -> Vec<NotebookInfo> {
        self.infos.lock().expect("infos").clone()
    }

    pub fn dialogs(&self) -> Vec<ConflictPrompt> {
        self.dialogs.lock().expect("dialogs").clone()
    }

    pub fn dialog_visible(&self) -> bool {
        self.dialog_visible.load(Ordering::SeqCst)
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().expect("toasts").clone()
    }

    pub fn saved_marks(&self) -> usize {
        self.saved_marks.load(Ordering::SeqCst)
    }
}

impl SyncHost for RecordingHost {
    fn render_cells(&self, cells: &[CellRecord]) {
        self.rendered.lock().expect("rendered").push(cells.to_vec());
    }

    fn refresh_info(&self, info: &NotebookInfo) {
        self.infos.lock().expect("infos").push(info.clone());
    }

    fn show_conflict_dialog(&self, prompt: &ConflictPrompt) {
        self.dialogs.lock().expect("dialogs").push(prompt.clone());
        self.dialog_visible.store(true, Ordering::SeqCst);
    }

    fn close_conflict_dialog(&self) {
        self.dialog_visible.store(false, Ordering::SeqCst);
    }

    fn mark_saved(&self) {
        self.saved_marks.fetch_add(1, Ordering::SeqCst);
    }

    fn show_toast(&self, toast: Toast) {
        self.toasts.lock().expect("toasts").push(toast);
    }
}

pub struct Fixture {
    pub poller: SyncPoller,
    pub transport: Arc<MockTransport>,
    pub host: Arc<RecordingHost>,
    pub dirty: DirtyFlag,
}

pub fn fixture(transport: MockTransport, events: Option<EventStore>) -> Fixture {
    let transport = Arc::new(transport);
    let host = Arc::new(RecordingHost::default());
    let dirty = DirtyFlag::new();
    let poller = SyncPoller::new(
        transport.clone(),
        host.clone(),
        Arc::new(dirty.clone()),
        &SyncSettings::default(),
        events,
    );
    Fixture {
        poller,
        transport,
        host,
        dirty,
    }
}
