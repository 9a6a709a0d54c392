//! Bounded, in-memory log of operation lifecycles linked into a causal tree.
//!
//! Every instrumentation call is infallible: unknown ids and a disabled store turn
//! mutations into no-ops so tracing can never break the operation being traced.

use crate::errors::{AppError, AppResult};
use crate::models::{
    Event, EventFilter, EventStats, EventStatus, EventType, JsonObject, ParentFilter, StoreAction,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_EVENT_CAPACITY: usize = 1_000;

type Listener = Arc<dyn Fn(StoreAction, Option<&Event>) + Send + Sync>;

/// Error input accepted by [`EventStore::log_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedError {
    Message(String),
    Kind { kind: String, message: String },
}

impl LoggedError {
    pub fn kind(&self) -> &str {
        match self {
            Self::Message(_) => "Error",
            Self::Kind { kind, .. } => kind,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Message(message) | Self::Kind { message, .. } => message,
        }
    }
}

impl From<&str> for LoggedError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<String> for LoggedError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&AppError> for LoggedError {
    fn from(value: &AppError) -> Self {
        Self::Kind {
            kind: value.kind().to_string(),
            message: value.message().to_string(),
        }
    }
}

impl From<AppError> for LoggedError {
    fn from(value: AppError) -> Self {
        Self::from(&value)
    }
}

struct StoredEvent {
    event: Event,
    started: Instant,
}

struct StoreInner {
    events: VecDeque<StoredEvent>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
    enabled: bool,
    capacity: usize,
}

/// Cheaply cloneable handle; clones share the same events and listeners.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY)),
                listeners: Vec::new(),
                next_listener_id: 0,
                enabled: true,
                capacity: capacity.max(1),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn log_start(
        &self,
        event_type: EventType,
        data: JsonObject,
        parent_id: Option<&str>,
    ) -> Option<String> {
        let event = {
            let mut inner = self.lock();
            if !inner.enabled {
                return None;
            }

            let id = format!("evt_{}", Uuid::new_v4().simple());
            if let Some(parent_id) = parent_id {
                if let Some(parent) = inner
                    .events
                    .iter_mut()
                    .find(|stored| stored.event.id == parent_id)
                {
                    parent.event.child_ids.push(id.clone());
                }
            }

            let event = Event {
                id,
                parent_id: parent_id.map(str::to_string),
                event_type,
                status: EventStatus::Pending,
                timestamp: Utc::now().timestamp_millis(),
                duration: None,
                data,
                child_ids: Vec::new(),
            };

            // Evicted parents leave their children with a dangling parent_id.
            while inner.events.len() >= inner.capacity {
                inner.events.pop_front();
            }
            inner.events.push_back(StoredEvent {
                event: event.clone(),
                started: Instant::now(),
            });
            event
        };

        self.notify(StoreAction::Add, Some(&event));
        Some(event.id)
    }

    /// Finishes an event with `status`. A `Pending` status is ignored; events never re-enter it.
    pub fn log_complete(&self, id: &str, status: EventStatus, result_data: JsonObject) {
        if !status.is_terminal() {
            return;
        }
        self.finish(id, StoreAction::Complete, |stored| {
            stored.event.status = status;
            stored.event.duration = Some(elapsed_ms(stored.started));
            merge_data(&mut stored.event.data, result_data);
        });
    }

    pub fn log_success(&self, id: &str, result_data: JsonObject) {
        self.log_complete(id, EventStatus::Success, result_data);
    }

    pub fn log_error(&self, id: &str, error: impl Into<LoggedError>, extra_data: JsonObject) {
        let error = error.into();
        self.finish(id, StoreAction::Error, |stored| {
            stored.event.status = EventStatus::Error;
            stored.event.duration = Some(elapsed_ms(stored.started));
            stored
                .event
                .data
                .insert("error".to_string(), Value::String(error.message().to_string()));
            stored
                .event
                .data
                .insert("errorType".to_string(), Value::String(error.kind().to_string()));
            merge_data(&mut stored.event.data, extra_data);
        });
    }

    /// Records the caller's budget as the duration, not the measured elapsed time.
    pub fn log_timeout(&self, id: &str, timeout_ms: u64) {
        self.finish(id, StoreAction::Timeout, |stored| {
            stored.event.status = EventStatus::Timeout;
            stored.event.duration = Some(timeout_ms);
            stored.event.data.insert(
                "error".to_string(),
                Value::String(format!("Operation timed out after {}ms", timeout_ms)),
            );
            stored
                .event
                .data
                .insert("errorType".to_string(), Value::String("TimeoutError".to_string()));
        });
    }

    fn finish(&self, id: &str, action: StoreAction, apply: impl FnOnce(&mut StoredEvent)) {
        let event = {
            let mut inner = self.lock();
            if !inner.enabled {
                return;
            }
            let Some(stored) = inner.events.iter_mut().find(|stored| stored.event.id == id) else {
                return;
            };
            apply(stored);
            stored.event.clone()
        };
        self.notify(action, Some(&event));
    }

    pub fn find_event(&self, id: &str) -> Option<Event> {
        self.lock()
            .events
            .iter()
            .find(|stored| stored.event.id == id)
            .map(|stored| stored.event.clone())
    }

    pub fn get_events(&self, filter: &EventFilter) -> Vec<Event> {
        self.lock()
            .events
            .iter()
            .filter(|stored| filter.matches(&stored.event))
            .map(|stored| stored.event.clone())
            .collect()
    }

    pub fn get_root_events(&self) -> Vec<Event> {
        self.get_events(&EventFilter {
            parent: Some(ParentFilter::Root),
            ..EventFilter::default()
        })
    }

    /// Direct children only.
    pub fn get_children(&self, id: &str) -> Vec<Event> {
        self.get_events(&EventFilter {
            parent: Some(ParentFilter::Id(id.to_string())),
            ..EventFilter::default()
        })
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn clear(&self) {
        self.lock().events.clear();
        self.notify(StoreAction::Clear, None);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Registers a listener called synchronously after every mutation.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(StoreAction, Option<&Event>) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    fn notify(&self, action: StoreAction, event: Option<&Event>) {
        // Listeners run without the store lock so they may query the store.
        let listeners = self
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(action, event))).is_err() {
                tracing::warn!(
                    action = ?action,
                    event_id = event.map(|event| event.id.as_str()).unwrap_or(""),
                    "event store listener panicked"
                );
            }
        }
    }

    pub fn get_stats(&self) -> EventStats {
        let inner = self.lock();
        let mut by_type = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let mut duration_sum = 0u64;
        let mut duration_count = 0u64;
        let mut errors = 0usize;
        let mut timeouts = 0usize;

        for stored in &inner.events {
            let event = &stored.event;
            *by_type.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
            *by_status.entry(event.status.as_str().to_string()).or_insert(0) += 1;
            if let Some(duration) = event.duration {
                duration_sum = duration_sum.saturating_add(duration);
                duration_count += 1;
            }
            match event.status {
                EventStatus::Error => errors += 1,
                EventStatus::Timeout => timeouts += 1,
                _ => {}
            }
        }

        let avg_duration = if duration_count == 0 {
            0
        } else {
            (duration_sum as f64 / duration_count as f64).round() as u64
        };

        EventStats {
            total: inner.events.len(),
            by_type,
            by_status,
            avg_duration,
            errors,
            timeouts,
        }
    }

    /// Runs `operation` inside a traced event. The operation receives the new event id so
    /// nested work can be parented under it.
    pub async fn trace<T, F, Fut>(
        &self,
        event_type: EventType,
        data: JsonObject,
        parent_id: Option<&str>,
        operation: F,
    ) -> AppResult<T>
    where
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let id = self.log_start(event_type, data, parent_id);
        let result = operation(id.clone()).await;
        if let Some(id) = id.as_deref() {
            self.record_result(id, &result);
        }
        result
    }

    /// Like [`EventStore::trace`], but gives up after `budget` and records a timeout.
    pub async fn trace_with_timeout<T, F, Fut>(
        &self,
        event_type: EventType,
        data: JsonObject,
        parent_id: Option<&str>,
        budget: Duration,
        operation: F,
    ) -> AppResult<T>
    where
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let id = self.log_start(event_type, data, parent_id);
        match tokio::time::timeout(budget, operation(id.clone())).await {
            Ok(result) => {
                if let Some(id) = id.as_deref() {
                    self.record_result(id, &result);
                }
                result
            }
            Err(_) => {
                let budget_ms = duration_ms(budget);
                if let Some(id) = id.as_deref() {
                    self.log_timeout(id, budget_ms);
                }
                tracing::warn!(event_type = event_type.as_str(), budget_ms, "traced operation timed out");
                Err(AppError::Timeout(format!(
                    "{} timed out after {}ms",
                    event_type.as_str(),
                    budget_ms
                )))
            }
        }
    }

    fn record_result<T>(&self, id: &str, result: &AppResult<T>) {
        match result {
            Ok(_) => self.log_success(id, JsonObject::new()),
            Err(error) => self.log_error(id, error, JsonObject::new()),
        }
    }
}

/// Handle returned by [`EventStore::subscribe`].
pub struct Subscription {
    id: u64,
    store: Weak<Mutex<StoreInner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.store.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            inner.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

fn merge_data(target: &mut JsonObject, update: JsonObject) {
    for (key, value) in update {
        target.insert(key, value);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builds a data map from `json!({...})`; non-object values yield an empty map.
pub fn data(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}
