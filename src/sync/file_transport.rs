use crate::errors::{AppError, AppResult};
use crate::models::{
    AckResponse, CheckUpdatesResponse, JsonObject, NotebookDocument, ReloadPayload, SaveResponse,
};
use crate::sync::file_watcher::FileWatcher;
use crate::sync::transport::SyncTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Transport for the terminal variant: the notebook file itself is the authority.
#[derive(Debug)]
pub struct FileTransport {
    path: PathBuf,
    watcher: FileWatcher,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let watcher = FileWatcher::new(&path);
        Self { path, watcher }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn watcher(&self) -> &FileWatcher {
        &self.watcher
    }

    async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
    }

    pub async fn load(&self) -> AppResult<NotebookDocument> {
        if !self.exists().await {
            return Err(AppError::NotFound(format!(
                "notebook {} does not exist",
                self.path.display()
            )));
        }
        read_document(&self.path).await
    }
}

pub async fn read_document(path: &Path) -> AppResult<NotebookDocument> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_json::from_str::<NotebookDocument>(&raw).map_err(|error| {
        AppError::Invalid(format!("{} is not a valid notebook: {}", path.display(), error))
    })
}

pub async fn write_document(path: &Path, document: &NotebookDocument) -> AppResult<()> {
    let serialized = serde_json::to_string_pretty(document)?;
    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    tokio::fs::write(&temp_path, serialized).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

#[async_trait]
impl SyncTransport for FileTransport {
    async fn check_updates(&self) -> AppResult<CheckUpdatesResponse> {
        let changed = self.watcher.probe().await || self.watcher.has_changes();
        Ok(CheckUpdatesResponse { changed })
    }

    async fn reload(&self) -> AppResult<ReloadPayload> {
        if !self.exists().await {
            return Ok(ReloadPayload::default());
        }
        let document = read_document(&self.path).await?;
        self.watcher.rebaseline().await;
        let mut metadata = document.metadata;
        metadata
            .entry("path".to_string())
            .or_insert_with(|| Value::String(self.path.display().to_string()));
        Ok(ReloadPayload {
            cells: Some(document.cells),
            metadata: Some(metadata),
        })
    }

    async fn acknowledge(&self) -> AppResult<AckResponse> {
        self.watcher.rebaseline().await;
        let mut body = JsonObject::new();
        body.insert("ok".to_string(), Value::Bool(true));
        Ok(AckResponse { body })
    }

    async fn save(&self, document: &NotebookDocument) -> AppResult<SaveResponse> {
        let mut document = document.clone();
        document.touch();
        write_document(&self.path, &document).await?;
        // Our own write is the new baseline.
        self.watcher.rebaseline().await;
        Ok(SaveResponse {
            status: "saved".to_string(),
            path: Some(self.path.display().to_string()),
        })
    }
}
