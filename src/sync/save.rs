use crate::errors::AppResult;
use crate::event_store::data;
use crate::models::{EventType, JsonObject, NotebookDocument, SaveResponse, Toast};
use crate::sync::poller::SyncPoller;
use serde_json::json;

impl SyncPoller {
    /// Saves through the transport and starts the post-save cooldown so the poller does not
    /// mistake our own write for an external change.
    pub async fn save_notebook(&self, document: &NotebookDocument) -> AppResult<SaveResponse> {
        let shared = &self.shared;
        let event_id = self.log_start(
            EventType::Save,
            data(json!({ "cells": document.cells.len() })),
            None,
        );

        match shared.transport.save(document).await {
            Ok(response) => {
                self.notify_saved();
                shared.dirty.mark_clean();
                shared.host.mark_saved();
                shared.host.show_toast(Toast::success("Notebook saved"));
                self.log_success(
                    event_id.as_deref(),
                    data(json!({ "status": &response.status, "path": &response.path })),
                );
                Ok(response)
            }
            Err(error) => {
                tracing::warn!(error = %error, "save failed");
                if let (Some(events), Some(id)) = (shared.events.as_ref(), event_id.as_deref()) {
                    events.log_error(id, &error, JsonObject::new());
                }
                shared
                    .host
                    .show_toast(Toast::error(format!("Failed to save: {}", error.message())));
                Err(error)
            }
        }
    }
}
