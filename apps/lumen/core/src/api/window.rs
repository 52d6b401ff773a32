//! Window facade: messages, status bar items and output channels

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

use super::disposable::Disposable;
use crate::events::{EventBus, HostEvent};
use crate::types::{MessageKind, StatusBarAlignment, StatusBarItem};

/// Lines an output channel keeps; older ones are dropped
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1000;

struct StatusEntry {
    item: StatusBarItem,
    visible: bool,
    /// Creation order, used to break priority ties
    seq: u64,
}

/// All status bar items of one host
#[derive(Default)]
pub(crate) struct StatusBarTable {
    next_seq: Mutex<u64>,
    entries: RwLock<HashMap<String, StatusEntry>>,
}

impl StatusBarTable {
    fn insert(&self, item: StatusBarItem) {
        let seq = {
            let mut next = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.id.clone(), StatusEntry { item, visible: false, seq });
    }

    /// Apply `f` to an item; returns whether the visible set may have changed
    fn update(&self, id: &str, f: impl FnOnce(&mut StatusEntry)) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(id) {
            Some(entry) => {
                let was_visible = entry.visible;
                f(entry);
                was_visible || entry.visible
            }
            None => false,
        }
    }

    fn remove(&self, id: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some_and(|e| e.visible)
    }

    /// Visible items: left side first, then higher priority first
    pub(crate) fn visible(&self) -> Vec<StatusBarItem> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut visible: Vec<&StatusEntry> = entries.values().filter(|e| e.visible).collect();
        visible.sort_by(|a, b| {
            let side = |e: &StatusEntry| match e.item.alignment {
                StatusBarAlignment::Left => 0,
                StatusBarAlignment::Right => 1,
            };
            side(a)
                .cmp(&side(b))
                .then(b.item.priority.cmp(&a.item.priority))
                .then(a.seq.cmp(&b.seq))
        });
        visible.into_iter().map(|e| e.item.clone()).collect()
    }

    /// Remove every item owned by an extension; returns whether any was visible
    pub(crate) fn remove_extension(&self, extension_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before_visible = entries
            .values()
            .any(|e| e.visible && e.item.extension_id == extension_id);
        entries.retain(|_, e| e.item.extension_id != extension_id);
        before_visible
    }
}

/// The `window` namespace handed to one extension
#[derive(Clone)]
pub struct Window {
    pub(crate) extension_id: String,
    pub(crate) events: EventBus,
    pub(crate) status_bar: Arc<StatusBarTable>,
}

impl Window {
    fn show_message(&self, kind: MessageKind, text: &str, actions: &[&str]) {
        debug!("[{}] {:?} message: {}", self.extension_id, kind, text);
        self.events.emit(HostEvent::ShowMessage {
            kind,
            text: text.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        });
    }

    pub fn show_information_message(&self, text: &str, actions: &[&str]) {
        self.show_message(MessageKind::Info, text, actions);
    }

    pub fn show_warning_message(&self, text: &str, actions: &[&str]) {
        self.show_message(MessageKind::Warning, text, actions);
    }

    pub fn show_error_message(&self, text: &str, actions: &[&str]) {
        self.show_message(MessageKind::Error, text, actions);
    }

    /// Create a hidden status bar item
    pub fn create_status_bar_item(&self, alignment: StatusBarAlignment, priority: i32) -> StatusBarItemHandle {
        let id = uuid::Uuid::new_v4().to_string();
        self.status_bar.insert(StatusBarItem {
            id: id.clone(),
            extension_id: self.extension_id.clone(),
            text: String::new(),
            tooltip: None,
            alignment,
            priority,
        });
        StatusBarItemHandle {
            id,
            events: self.events.clone(),
            table: self.status_bar.clone(),
        }
    }

    pub fn create_output_channel(&self, name: &str) -> OutputChannel {
        OutputChannel {
            name: name.to_string(),
            extension_id: self.extension_id.clone(),
            lines: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

/// Extension-side handle to one status bar item
#[derive(Clone)]
pub struct StatusBarItemHandle {
    id: String,
    events: EventBus,
    table: Arc<StatusBarTable>,
}

impl StatusBarItemHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn apply(&self, f: impl FnOnce(&mut StatusEntry)) {
        if self.table.update(&self.id, f) {
            self.publish();
        }
    }

    fn publish(&self) {
        self.events.emit(HostEvent::StatusBarUpdate {
            items: self.table.visible(),
        });
    }

    pub fn set_text(&self, text: &str) {
        let text = text.to_string();
        self.apply(|e| e.item.text = text);
    }

    pub fn set_tooltip(&self, tooltip: Option<&str>) {
        let tooltip = tooltip.map(str::to_string);
        self.apply(|e| e.item.tooltip = tooltip);
    }

    pub fn show(&self) {
        self.apply(|e| e.visible = true);
    }

    pub fn hide(&self) {
        self.apply(|e| e.visible = false);
    }

    pub fn dispose(&self) {
        if self.table.remove(&self.id) {
            self.publish();
        }
    }

    /// A [`Disposable`] that removes this item, for context subscriptions
    pub fn as_disposable(&self) -> Disposable {
        let handle = self.clone();
        Disposable::new(move || handle.dispose())
    }
}

/// Named log sink; lines go to tracing and are kept for inspection
#[derive(Clone)]
pub struct OutputChannel {
    name: String,
    extension_id: String,
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl OutputChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append_line(&self, line: &str) {
        info!(extension = %self.extension_id, channel = %self.name, "{}", line);
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == OUTPUT_CHANNEL_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
