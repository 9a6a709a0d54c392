//! Live tree view over an [`EventStore`], re-rendered from store notifications.

use crate::event_store::{EventStore, Subscription};
use crate::models::{Event, EventStats, EventStatus, EventType};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub event: Event,
    pub depth: usize,
    pub collapsed: bool,
    pub selected: bool,
    /// Children present in the store, counted even when collapsed or filtered out.
    pub child_count: usize,
    pub children: Vec<TreeNode>,
}

#[derive(Default)]
struct PanelState {
    collapsed: HashSet<String>,
    selected: Option<String>,
    type_filter: Option<EventType>,
    status_filter: Option<EventStatus>,
    paused: bool,
    tree: Vec<TreeNode>,
    stats: EventStats,
    render_count: usize,
}

struct ViewOptions {
    collapsed: HashSet<String>,
    selected: Option<String>,
    type_filter: Option<EventType>,
    status_filter: Option<EventStatus>,
}

impl ViewOptions {
    fn shows(&self, event: &Event) -> bool {
        self.type_filter.map_or(true, |event_type| event.event_type == event_type)
            && self.status_filter.map_or(true, |status| event.status == status)
    }
}

struct PanelInner {
    store: EventStore,
    state: Mutex<PanelState>,
}

impl PanelInner {
    fn lock(&self) -> MutexGuard<'_, PanelState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // The panel lock is never held while the store is queried, so store listeners can't
    // deadlock against panel methods.
    fn render(&self) {
        let options = {
            let state = self.lock();
            ViewOptions {
                collapsed: state.collapsed.clone(),
                selected: state.selected.clone(),
                type_filter: state.type_filter,
                status_filter: state.status_filter,
            }
        };
        let tree = build_nodes(&self.store, self.store.get_root_events(), 0, &options);
        let stats = self.store.get_stats();

        let mut state = self.lock();
        state.tree = tree;
        state.stats = stats;
        state.render_count += 1;
    }
}

fn build_nodes(store: &EventStore, events: Vec<Event>, depth: usize, options: &ViewOptions) -> Vec<TreeNode> {
    let mut nodes = Vec::new();
    for event in events {
        let children = store.get_children(&event.id);
        if !options.shows(&event) {
            // Matching descendants move up to the nearest shown ancestor.
            nodes.extend(build_nodes(store, children, depth, options));
            continue;
        }
        let collapsed = options.collapsed.contains(&event.id);
        let child_count = children.len();
        let children = if collapsed {
            Vec::new()
        } else {
            build_nodes(store, children, depth + 1, options)
        };
        nodes.push(TreeNode {
            selected: options.selected.as_deref() == Some(event.id.as_str()),
            event,
            depth,
            collapsed,
            child_count,
            children,
        });
    }
    nodes
}

/// Collapsible view of the event log. Dropping the panel unsubscribes it.
pub struct DebugPanel {
    inner: Arc<PanelInner>,
    subscription: Option<Subscription>,
}

impl DebugPanel {
    pub fn attach(store: &EventStore) -> Self {
        let inner = Arc::new(PanelInner {
            store: store.clone(),
            state: Mutex::new(PanelState::default()),
        });
        let weak: Weak<PanelInner> = Arc::downgrade(&inner);
        let subscription = store.subscribe(move |_, _| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.lock().paused {
                inner.render();
            }
        });
        inner.render();
        Self {
            inner,
            subscription: Some(subscription),
        }
    }

    pub fn refresh(&self) {
        self.inner.render();
    }

    pub fn tree(&self) -> Vec<TreeNode> {
        self.inner.lock().tree.clone()
    }

    pub fn stats(&self) -> EventStats {
        self.inner.lock().stats.clone()
    }

    pub fn render_count(&self) -> usize {
        self.inner.lock().render_count
    }

    pub fn select(&self, id: Option<&str>) {
        self.inner.lock().selected = id.map(str::to_string);
        self.inner.render();
    }

    /// Full record of the selected event, if it is still in the store.
    pub fn selected_event(&self) -> Option<Event> {
        let selected = self.inner.lock().selected.clone()?;
        self.inner.store.find_event(&selected)
    }

    pub fn toggle_collapsed(&self, id: &str) {
        {
            let mut state = self.inner.lock();
            if !state.collapsed.remove(id) {
                state.collapsed.insert(id.to_string());
            }
        }
        self.inner.render();
    }

    pub fn set_filter(&self, event_type: Option<EventType>, status: Option<EventStatus>) {
        {
            let mut state = self.inner.lock();
            state.type_filter = event_type;
            state.status_filter = status;
        }
        self.inner.render();
    }

    /// Pausing stops re-rendering only; events keep accumulating in the store.
    pub fn set_paused(&self, paused: bool) {
        let was_paused = std::mem::replace(&mut self.inner.lock().paused, paused);
        if was_paused && !paused {
            self.inner.render();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn clear(&self) {
        self.inner.lock().selected = None;
        self.inner.store.clear();
        if self.is_paused() {
            self.inner.render();
        }
    }

    pub fn render_text(&self) -> String {
        let state = self.inner.lock();
        let stats = &state.stats;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "events: {} | errors: {} | timeouts: {} | avg: {}ms",
            stats.total, stats.errors, stats.timeouts, stats.avg_duration
        );
        for node in &state.tree {
            write_node(&mut out, node);
        }
        out
    }
}

impl Drop for DebugPanel {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

fn status_glyph(status: EventStatus) -> &'static str {
    match status {
        EventStatus::Pending => "[..]",
        EventStatus::Success => "[ok]",
        EventStatus::Error => "[err]",
        EventStatus::Timeout => "[timeout]",
    }
}

fn write_node(out: &mut String, node: &TreeNode) {
    let toggle = if node.child_count == 0 {
        " "
    } else if node.collapsed {
        "+"
    } else {
        "-"
    };
    let _ = write!(
        out,
        "{}{} {} {}",
        "  ".repeat(node.depth),
        toggle,
        status_glyph(node.event.status),
        node.event.event_type.as_str()
    );
    if let Some(duration) = node.event.duration {
        let _ = write!(out, " ({}ms)", duration);
    }
    if let Some(error) = node.event.error_message() {
        let _ = write!(out, ": {}", error);
    }
    if node.collapsed {
        let _ = write!(out, " [{} hidden]", node.child_count);
    }
    if node.selected {
        out.push_str(" *");
    }
    out.push('\n');
    for child in &node.children {
        write_node(out, child);
    }
}
