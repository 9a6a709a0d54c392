use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type JsonObject = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    #[default]
    Code,
    Markdown,
}

impl CellType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CellComment {
    pub id: String,
    pub from_line: u32,
    pub from_ch: u32,
    pub to_line: u32,
    pub to_ch: u32,
    pub selected_text: String,
    pub user_comment: String,
    #[serde(default)]
    pub ai_response: String,
    #[serde(default = "default_comment_status")]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_comment_status() -> String {
    "pending".to_string()
}

/// One cell as it travels between the notebook file, the server and the rendered page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub struct CellRecord {
    pub id: String,
    #[serde(rename = "type", default)]
    pub cell_type: CellType,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default)]
    pub execution_count: Option<u64>,
    #[serde(default)]
    pub metadata: JsonObject,
    #[serde(default)]
    pub comments: Vec<CellComment>,
}

impl CellRecord {
    pub fn code(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cell_type: CellType::Code,
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn markdown(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cell_type: CellType::Markdown,
            source: source.into(),
            ..Self::default()
        }
    }
}

/// On-disk `.nblr` notebook document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NotebookDocument {
    #[serde(default = "default_notebook_version")]
    pub version: String,
    #[serde(default)]
    pub cells: Vec<CellRecord>,
    #[serde(default)]
    pub metadata: JsonObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<Value>,
}

fn default_notebook_version() -> String {
    "1.0".to_string()
}

impl NotebookDocument {
    pub fn new(name: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        let mut metadata = JsonObject::new();
        metadata.insert("name".to_string(), Value::String(name.to_string()));
        metadata.insert("created".to_string(), Value::String(now.clone()));
        metadata.insert("modified".to_string(), Value::String(now));
        Self {
            version: default_notebook_version(),
            cells: Vec::new(),
            metadata,
            session_state: None,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Untitled")
    }

    pub fn touch(&mut self) {
        self.metadata
            .insert("modified".to_string(), Value::String(Utc::now().to_rfc3339()));
    }

    pub fn info(&self) -> NotebookInfo {
        NotebookInfo::from_cells(self.name(), &self.cells)
    }
}

/// Summary shown in the toolbar; refreshed whenever the cell set is replaced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotebookInfo {
    pub name: String,
    pub cell_count: usize,
    pub code_count: usize,
    pub md_count: usize,
    pub executed_count: usize,
}

impl NotebookInfo {
    pub fn from_cells(name: &str, cells: &[CellRecord]) -> Self {
        let code_count = cells
            .iter()
            .filter(|cell| cell.cell_type == CellType::Code)
            .count();
        Self {
            name: name.to_string(),
            cell_count: cells.len(),
            code_count,
            md_count: cells.len() - code_count,
            executed_count: cells
                .iter()
                .filter(|cell| cell.execution_count.is_some())
                .count(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CheckUpdatesResponse {
    pub changed: bool,
}

/// Reload payload; `cells: None` means the rendered state must not be touched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReloadPayload {
    #[serde(default)]
    pub cells: Option<Vec<CellRecord>>,
    #[serde(default)]
    pub metadata: Option<JsonObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AckResponse {
    #[serde(flatten)]
    pub body: JsonObject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveResponse {
    pub status: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ApiCall,
    AiCall,
    CommentAdd,
    CommentDelete,
    CellExecute,
    Save,
    Load,
    SyncCheck,
    SyncReload,
    ConflictResolve,
    UserAction,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiCall => "api_call",
            Self::AiCall => "ai_call",
            Self::CommentAdd => "comment_add",
            Self::CommentDelete => "comment_delete",
            Self::CellExecute => "cell_execute",
            Self::Save => "save",
            Self::Load => "load",
            Self::SyncCheck => "sync_check",
            Self::SyncReload => "sync_reload",
            Self::ConflictResolve => "conflict_resolve",
            Self::UserAction => "user_action",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Success,
    Error,
    Timeout,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub status: EventStatus,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Milliseconds; `None` while pending.
    pub duration: Option<u64>,
    pub data: JsonObject,
    pub child_ids: Vec<String>,
}

impl Event {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.data.get("error").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentFilter {
    Root,
    Id(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub status: Option<EventStatus>,
    pub parent: Option<ParentFilter>,
    /// Inclusive lower bound on `Event::timestamp`.
    pub since: Option<i64>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if event.status != status {
                return false;
            }
        }
        match &self.parent {
            Some(ParentFilter::Root) if event.parent_id.is_some() => return false,
            Some(ParentFilter::Id(id)) if event.parent_id.as_deref() != Some(id.as_str()) => {
                return false
            }
            _ => {}
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub avg_duration: u64,
    pub errors: usize,
    pub timeouts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreAction {
    Add,
    Complete,
    Error,
    Timeout,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    Reload,
    Keep,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictAction {
    Reload,
    KeepMine,
}

impl ConflictAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Reload => "Reload from disk",
            Self::KeepMine => "Keep my changes",
        }
    }

    pub fn decision(self) -> ConflictDecision {
        match self {
            Self::Reload => ConflictDecision::Reload,
            Self::KeepMine => ConflictDecision::Keep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPrompt {
    pub title: String,
    pub message: String,
    pub actions: Vec<ConflictAction>,
}

impl Default for ConflictPrompt {
    fn default() -> Self {
        Self {
            title: "Notebook changed on disk".to_string(),
            message: "The notebook was modified externally while you have unsaved changes."
                .to_string(),
            actions: vec![ConflictAction::Reload, ConflictAction::KeepMine],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub poll_interval_ms: u64,
    pub save_cooldown_ms: u64,
    pub event_capacity: usize,
    pub toast_duration_ms: u64,
    pub file_watch_interval_ms: u64,
    pub server_url: String,
    pub log_dir: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 4_000,
            save_cooldown_ms: 2_000,
            event_capacity: 1_000,
            toast_duration_ms: 4_000,
            file_watch_interval_ms: 1_000,
            server_url: "http://127.0.0.1:5000".to_string(),
            log_dir: None,
        }
    }
}
