use crate::errors::AppResult;
use crate::models::{AckResponse, CheckUpdatesResponse, NotebookDocument, ReloadPayload, SaveResponse};
use async_trait::async_trait;

/// Endpoints the sync core consumes. Implemented over HTTP and over a local file.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn check_updates(&self) -> AppResult<CheckUpdatesResponse>;
    async fn reload(&self) -> AppResult<ReloadPayload>;
    /// Marks the current external change as seen so it is not reported again.
    async fn acknowledge(&self) -> AppResult<AckResponse>;
    async fn save(&self, document: &NotebookDocument) -> AppResult<SaveResponse>;
}
