use crate::event_store::{data, EventStore};
use crate::models::{
    ConflictPrompt, EventType, JsonObject, NotebookInfo, ReloadPayload, SyncSettings, Toast,
};
use crate::sync::conflict::ConflictResolver;
use crate::sync::host::{DirtyTracker, SyncHost};
use crate::sync::transport::SyncTransport;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerPhase {
    Stopped,
    Scheduled,
    Checking,
    DialogOpen,
    /// Polling is enabled but the page is hidden, so no check is scheduled.
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Blocked,
    CoolingDown,
    Unchanged,
    Reloaded,
    Conflict,
    Failed,
    Discarded,
}

#[derive(Default)]
struct SyncState {
    is_polling: bool,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every schedule; a woken timer only acts if it still owns the latest one.
    timer_generation: u64,
    checking: bool,
    dialog_open: bool,
    last_save: Option<Instant>,
    hidden: bool,
}

pub(crate) struct PollerShared {
    state: Mutex<SyncState>,
    pub(crate) transport: Arc<dyn SyncTransport>,
    pub(crate) host: Arc<dyn SyncHost>,
    pub(crate) dirty: Arc<dyn DirtyTracker>,
    pub(crate) events: Option<EventStore>,
    poll_interval: Duration,
    save_cooldown: Duration,
}

impl Drop for PollerShared {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

/// Clears `checking` even when the timer task is aborted mid-check.
struct CheckingGuard<'a> {
    poller: &'a SyncPoller,
}

impl Drop for CheckingGuard<'_> {
    fn drop(&mut self) {
        self.poller.lock().checking = false;
    }
}

/// Detects external modification of the notebook by polling the transport.
///
/// At most one check is ever scheduled. Scheduling spawns onto the current tokio runtime,
/// so `start`, `set_visible` and conflict resolution must run inside one.
#[derive(Clone)]
pub struct SyncPoller {
    pub(crate) shared: Arc<PollerShared>,
}

impl SyncPoller {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        host: Arc<dyn SyncHost>,
        dirty: Arc<dyn DirtyTracker>,
        settings: &SyncSettings,
        events: Option<EventStore>,
    ) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                state: Mutex::new(SyncState::default()),
                transport,
                host,
                dirty,
                events,
                poll_interval: Duration::from_millis(settings.poll_interval_ms),
                save_cooldown: Duration::from_millis(settings.save_cooldown_ms),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) {
        let mut state = self.lock();
        let already_active = state.timer.is_some() || state.checking;
        state.is_polling = true;
        if already_active || state.dialog_open {
            return;
        }
        tracing::debug!(interval_ms = self.shared.poll_interval.as_millis() as u64, "sync polling started");
        self.schedule(&mut state, self.shared.poll_interval);
    }

    /// Stops scheduling. A check already in flight is not cancelled, but its result is dropped.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.is_polling = false;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        tracing::debug!("sync polling stopped");
    }

    pub fn notify_saved(&self) {
        self.lock().last_save = Some(Instant::now());
    }

    pub fn set_visible(&self, visible: bool) {
        let mut state = self.lock();
        state.hidden = !visible;
        if !visible {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            return;
        }
        if state.is_polling && !state.dialog_open && state.timer.is_none() && !state.checking {
            // Catch up right away after the page comes back.
            self.schedule(&mut state, Duration::ZERO);
        }
    }

    pub fn is_polling(&self) -> bool {
        self.lock().is_polling
    }

    pub fn is_dialog_open(&self) -> bool {
        self.lock().dialog_open
    }

    pub fn has_pending_check(&self) -> bool {
        self.lock().timer.is_some()
    }

    pub fn phase(&self) -> PollerPhase {
        let state = self.lock();
        if state.dialog_open {
            PollerPhase::DialogOpen
        } else if state.checking {
            PollerPhase::Checking
        } else if state.timer.is_some() {
            PollerPhase::Scheduled
        } else if state.is_polling {
            PollerPhase::Paused
        } else {
            PollerPhase::Stopped
        }
    }

    pub fn resolver(&self) -> ConflictResolver {
        ConflictResolver::new(self.clone())
    }

    pub fn events(&self) -> Option<&EventStore> {
        self.shared.events.as_ref()
    }

    fn schedule(&self, state: &mut SyncState, delay: Duration) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.timer_generation = state.timer_generation.wrapping_add(1);
        let generation = state.timer_generation;
        let weak = Arc::downgrade(&self.shared);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                SyncPoller { shared }.fire(generation).await;
            }
        }));
    }

    fn reschedule(&self) {
        let mut state = self.lock();
        if state.is_polling && !state.dialog_open && state.timer.is_none() && !state.checking {
            self.schedule(&mut state, self.shared.poll_interval);
        }
    }

    async fn fire(&self, generation: u64) {
        {
            let mut state = self.lock();
            if state.timer_generation != generation {
                // Superseded after waking but before taking the lock.
                return;
            }
            // Dropping our own handle detaches it; the task keeps running.
            state.timer = None;
            if !state.is_polling {
                return;
            }
            state.checking = true;
        }

        let outcome = {
            let _checking = CheckingGuard { poller: self };
            self.check().await
        };
        tracing::trace!(outcome = ?outcome, "sync check finished");

        if outcome != CheckOutcome::Conflict {
            self.reschedule();
        }
    }

    /// One pass of the check routine.
    pub async fn check(&self) -> CheckOutcome {
        {
            let state = self.lock();
            if state.dialog_open || state.hidden {
                return CheckOutcome::Blocked;
            }
            if let Some(last_save) = state.last_save {
                if last_save.elapsed() < self.shared.save_cooldown {
                    tracing::debug!("skipping update check during save cooldown");
                    return CheckOutcome::CoolingDown;
                }
            }
        }

        let polling_at_start = self.is_polling();
        let event_id = self.log_start(EventType::SyncCheck, JsonObject::new(), None);
        let response = self.shared.transport.check_updates().await;

        // stop() landed while the request was in flight.
        if polling_at_start && !self.is_polling() {
            self.log_success(event_id.as_deref(), data(json!({ "discarded": true })));
            return CheckOutcome::Discarded;
        }

        match response {
            Ok(response) if !response.changed => {
                self.log_success(event_id.as_deref(), data(json!({ "changed": false })));
                CheckOutcome::Unchanged
            }
            Ok(_) => {
                if self.shared.dirty.is_dirty() {
                    self.log_success(
                        event_id.as_deref(),
                        data(json!({ "changed": true, "action": "conflict" })),
                    );
                    self.open_dialog();
                    CheckOutcome::Conflict
                } else {
                    self.log_success(
                        event_id.as_deref(),
                        data(json!({ "changed": true, "action": "auto_reload" })),
                    );
                    self.auto_reload(event_id.as_deref()).await;
                    CheckOutcome::Reloaded
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "update check failed");
                if let (Some(events), Some(id)) = (self.shared.events.as_ref(), event_id.as_deref()) {
                    events.log_error(id, &error, JsonObject::new());
                }
                CheckOutcome::Failed
            }
        }
    }

    fn open_dialog(&self) {
        self.lock().dialog_open = true;
        tracing::info!("external change conflicts with unsaved edits");
        self.shared.host.show_conflict_dialog(&ConflictPrompt::default());
    }

    async fn auto_reload(&self, parent_id: Option<&str>) {
        let event_id = self.log_start(
            EventType::SyncReload,
            data(json!({ "trigger": "auto" })),
            parent_id,
        );
        match self.shared.transport.reload().await {
            Ok(payload) => {
                let applied = self.apply_reload(&payload);
                self.log_success(event_id.as_deref(), data(json!({ "applied": applied })));
                if applied {
                    self.shared
                        .host
                        .show_toast(Toast::success("Notebook reloaded (changed externally)"));
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "auto-reload failed");
                if let (Some(events), Some(id)) = (self.shared.events.as_ref(), event_id.as_deref()) {
                    events.log_error(id, &error, JsonObject::new());
                }
                self.shared.host.show_toast(Toast::error(format!(
                    "Failed to reload notebook: {}",
                    error.message()
                )));
            }
        }
    }

    /// Replaces the rendered cells. Returns false when the payload carries no cells.
    pub(crate) fn apply_reload(&self, payload: &ReloadPayload) -> bool {
        let Some(cells) = payload.cells.as_ref() else {
            return false;
        };
        self.shared.host.render_cells(cells);
        let name = payload
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("Untitled");
        self.shared
            .host
            .refresh_info(&NotebookInfo::from_cells(name, cells));
        true
    }

    pub(crate) fn close_dialog_and_resume(&self) {
        {
            let mut state = self.lock();
            state.dialog_open = false;
            if state.is_polling && state.timer.is_none() && !state.checking {
                self.schedule(&mut state, self.shared.poll_interval);
            }
        }
        self.shared.host.close_conflict_dialog();
    }

    pub(crate) fn log_start(
        &self,
        event_type: EventType,
        data: JsonObject,
        parent_id: Option<&str>,
    ) -> Option<String> {
        self.shared
            .events
            .as_ref()
            .and_then(|events| events.log_start(event_type, data, parent_id))
    }

    pub(crate) fn log_success(&self, event_id: Option<&str>, data: JsonObject) {
        if let (Some(events), Some(id)) = (self.shared.events.as_ref(), event_id) {
            events.log_success(id, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CheckOutcome, PollerPhase};
    use crate::event_store::EventStore;
    use crate::models::{CellRecord, EventStatus, EventType, ToastKind};
    use crate::sync::test_support::{advance, fixture, MockTransport};
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn unchanged_check_reschedules_quietly() {
        let fx = fixture(MockTransport::default(), None);
        fx.poller.start();
        advance(4_000).await;

        assert_eq!(fx.transport.check_calls(), 1);
        assert!(fx.host.toasts().is_empty());
        assert!(fx.host.dialogs().is_empty());
        assert_eq!(fx.poller.phase(), PollerPhase::Scheduled);

        advance(4_000).await;
        assert_eq!(fx.transport.check_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_keeps_a_single_timer() {
        let fx = fixture(MockTransport::default(), None);
        fx.poller.start();
        fx.poller.start();
        advance(1_000).await;
        fx.poller.start();
        assert!(fx.poller.has_pending_check());

        advance(3_000).await;
        assert_eq!(fx.transport.check_calls(), 1);
        advance(4_000).await;
        assert_eq!(fx.transport.check_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn save_cooldown_suppresses_the_check() {
        let fx = fixture(MockTransport::default(), None);
        fx.poller.start();
        advance(3_000).await;
        fx.poller.notify_saved();

        advance(1_000).await;
        assert_eq!(fx.transport.check_calls(), 0);

        advance(4_000).await;
        assert_eq!(fx.transport.check_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_boundary_is_exclusive() {
        let fx = fixture(MockTransport::default(), None);
        fx.poller.notify_saved();
        advance(1_999).await;
        assert_eq!(fx.poller.check().await, CheckOutcome::CoolingDown);
        advance(1).await;
        assert_eq!(fx.poller.check().await, CheckOutcome::Unchanged);
        assert_eq!(fx.transport.check_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_change_reloads_automatically() {
        let transport = MockTransport::default();
        transport.push_check(Ok(true));
        transport.set_reload(Ok(Some(vec![CellRecord::code("1", "x=1")])));
        let fx = fixture(transport, None);
        fx.poller.start();
        advance(4_000).await;

        assert_eq!(fx.transport.reload_calls(), 1);
        assert_eq!(fx.host.rendered(), vec![vec![CellRecord::code("1", "x=1")]]);
        assert!(fx.host.dialogs().is_empty());
        assert!(!fx.host.dialog_visible());
        let infos = fx.host.infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].cell_count, 1);
        assert_eq!(
            fx.host.toasts().last().map(|toast| toast.kind),
            Some(ToastKind::Success)
        );
        assert_eq!(fx.poller.phase(), PollerPhase::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_without_cells_leaves_page_alone() {
        let transport = MockTransport::default();
        transport.push_check(Ok(true));
        transport.set_reload(Ok(None));
        let fx = fixture(transport, None);
        fx.poller.start();
        advance(4_000).await;

        assert_eq!(fx.transport.reload_calls(), 1);
        assert!(fx.host.rendered().is_empty());
        assert!(fx.host.toasts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_auto_reload_shows_error_and_keeps_polling() {
        let transport = MockTransport::default();
        transport.push_check(Ok(true));
        transport.set_reload(Err("server exploded".to_string()));
        let fx = fixture(transport, None);
        fx.poller.start();
        advance(4_000).await;

        let toasts = fx.host.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].kind, ToastKind::Error);
        assert!(toasts[0].message.contains("server exploded"));

        advance(4_000).await;
        assert_eq!(fx.transport.check_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dirty_change_opens_dialog_and_blocks_checks() {
        let transport = MockTransport::default();
        transport.push_check(Ok(true));
        let fx = fixture(transport, None);
        fx.dirty.mark_dirty();
        fx.poller.start();
        advance(4_000).await;

        let dialogs = fx.host.dialogs();
        assert_eq!(dialogs.len(), 1);
        assert_eq!(dialogs[0].actions.len(), 2);
        assert!(fx.host.dialog_visible());
        assert_eq!(fx.poller.phase(), PollerPhase::DialogOpen);

        fx.poller.start();
        fx.poller.set_visible(false);
        fx.poller.set_visible(true);
        advance(8_000).await;
        assert_eq!(fx.transport.check_calls(), 1);
        assert_eq!(fx.transport.reload_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_never_stops_polling() {
        let transport = MockTransport::default();
        transport.push_check(Err("connection refused".to_string()));
        transport.push_check(Err("connection refused".to_string()));
        let events = EventStore::default();
        let fx = fixture(transport, Some(events.clone()));
        fx.poller.start();
        advance(12_000).await;

        assert_eq!(fx.transport.check_calls(), 3);
        assert!(fx.poller.is_polling());
        assert!(fx.host.toasts().is_empty());
        assert_eq!(events.get_stats().errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_checks() {
        let fx = fixture(MockTransport::default(), None);
        fx.poller.start();
        advance(4_000).await;
        fx.poller.stop();
        assert_eq!(fx.poller.phase(), PollerPhase::Stopped);
        assert!(!fx.poller.has_pending_check());

        advance(20_000).await;
        assert_eq!(fx.transport.check_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_check_discards_the_result() {
        let transport = MockTransport::default();
        transport.push_check(Ok(true));
        transport.set_check_delay(Duration::from_millis(500));
        let fx = fixture(transport, None);
        fx.dirty.mark_dirty();
        fx.poller.start();
        advance(4_100).await;
        assert_eq!(fx.poller.phase(), PollerPhase::Checking);

        fx.poller.stop();
        advance(1_000).await;
        assert!(fx.host.dialogs().is_empty());
        assert_eq!(fx.poller.phase(), PollerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_timer_does_not_run_or_clear_the_new_one() {
        let fx = fixture(MockTransport::default(), None);
        fx.poller.start();
        let stale = fx.poller.lock().timer_generation;
        fx.poller.set_visible(false);
        fx.poller.set_visible(true);

        fx.poller.fire(stale).await;
        assert_eq!(fx.transport.check_calls(), 0);
        assert!(fx.poller.has_pending_check());

        advance(1).await;
        assert_eq!(fx.transport.check_calls(), 1);
        assert!(fx.poller.has_pending_check());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_check_does_not_leave_checking_set() {
        let transport = MockTransport::default();
        transport.set_check_delay(Duration::from_millis(500));
        let fx = fixture(transport, None);
        fx.poller.start();
        let generation = fx.poller.lock().timer_generation;
        fx.poller.stop();
        fx.poller.lock().is_polling = true;

        let aborted =
            tokio::time::timeout(Duration::from_millis(100), fx.poller.fire(generation)).await;
        assert!(aborted.is_err());
        assert_eq!(fx.transport.check_calls(), 1);
        assert_ne!(fx.poller.phase(), PollerPhase::Checking);

        fx.poller.start();
        assert!(fx.poller.has_pending_check());
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_page_pauses_and_catches_up_on_return() {
        let fx = fixture(MockTransport::default(), None);
        fx.poller.start();
        advance(1_000).await;
        fx.poller.set_visible(false);
        assert!(fx.poller.is_polling());
        assert_eq!(fx.poller.phase(), PollerPhase::Paused);

        advance(20_000).await;
        assert_eq!(fx.transport.check_calls(), 0);

        fx.poller.set_visible(true);
        advance(1).await;
        assert_eq!(fx.transport.check_calls(), 1);
        assert_eq!(fx.poller.phase(), PollerPhase::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_does_not_restart_a_stopped_poller() {
        let fx = fixture(MockTransport::default(), None);
        fx.poller.set_visible(false);
        fx.poller.set_visible(true);
        advance(10_000).await;
        assert_eq!(fx.transport.check_calls(), 0);
        assert_eq!(fx.poller.phase(), PollerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn checks_are_traced_as_a_causal_tree() {
        let transport = MockTransport::default();
        transport.push_check(Ok(true));
        transport.set_reload(Ok(Some(vec![CellRecord::code("1", "x=1")])));
        let events = EventStore::default();
        let fx = fixture(transport, Some(events.clone()));
        fx.poller.start();
        advance(4_000).await;

        let roots = events.get_root_events();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].event_type, EventType::SyncCheck);
        assert_eq!(roots[0].data["action"], "auto_reload");
        let children = events.get_children(&roots[0].id);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].event_type, EventType::SyncReload);
        assert_eq!(children[0].status, EventStatus::Success);
    }
}
