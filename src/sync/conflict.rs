use crate::errors::{AppError, AppResult};
use crate::event_store::data;
use crate::models::{ConflictDecision, EventType, JsonObject, Toast};
use crate::sync::poller::SyncPoller;
use serde_json::json;

/// Applies the user's answer to the conflict dialog.
#[derive(Clone)]
pub struct ConflictResolver {
    poller: SyncPoller,
}

impl ConflictResolver {
    pub(crate) fn new(poller: SyncPoller) -> Self {
        Self { poller }
    }

    pub fn is_pending(&self) -> bool {
        self.poller.is_dialog_open()
    }

    /// Whatever the decision and however the network call ends, the dialog is closed and
    /// polling resumes after one interval.
    pub async fn resolve(&self, decision: ConflictDecision) -> AppResult<()> {
        if !self.is_pending() {
            return Err(AppError::Invalid("no conflict is pending".to_string()));
        }

        let event_id = self.poller.log_start(
            EventType::ConflictResolve,
            data(json!({ "decision": decision })),
            None,
        );
        let result = match decision {
            ConflictDecision::Reload => self.reload_from_disk(event_id.as_deref()).await,
            ConflictDecision::Keep => self.keep_local().await,
            ConflictDecision::Cancel => Ok(()),
        };

        match &result {
            Ok(()) => self.poller.log_success(event_id.as_deref(), JsonObject::new()),
            Err(error) => {
                tracing::warn!(error = %error, decision = ?decision, "conflict resolution failed");
                if let (Some(events), Some(id)) = (self.poller.events(), event_id.as_deref()) {
                    events.log_error(id, error, JsonObject::new());
                }
                let verb = match decision {
                    ConflictDecision::Reload => "reload",
                    _ => "acknowledge",
                };
                self.poller.shared.host.show_toast(Toast::error(format!(
                    "Failed to {}: {}",
                    verb,
                    error.message()
                )));
            }
        }

        self.poller.close_dialog_and_resume();
        result
    }

    async fn reload_from_disk(&self, parent_id: Option<&str>) -> AppResult<()> {
        let shared = &self.poller.shared;
        let reload_id = self.poller.log_start(
            EventType::SyncReload,
            data(json!({ "trigger": "conflict" })),
            parent_id,
        );
        let payload = match shared.transport.reload().await {
            Ok(payload) => payload,
            Err(error) => {
                if let (Some(events), Some(id)) = (shared.events.as_ref(), reload_id.as_deref()) {
                    events.log_error(id, &error, JsonObject::new());
                }
                return Err(error);
            }
        };
        let applied = self.poller.apply_reload(&payload);
        self.poller
            .log_success(reload_id.as_deref(), data(json!({ "applied": applied })));
        if !applied {
            // Nothing replaced the local edits, so they are still unsaved.
            tracing::info!("reload returned no cells, keeping local edits");
            return Ok(());
        }

        shared.dirty.mark_clean();
        shared.host.mark_saved();
        shared
            .host
            .show_toast(Toast::success("Notebook reloaded from disk"));
        Ok(())
    }

    /// Local edits stay in place; the server just stops reporting this change.
    async fn keep_local(&self) -> AppResult<()> {
        self.poller.shared.transport.acknowledge().await?;
        Ok(())
    }
}
