//! Session history for the fragment router.
//!
//! A linear entry list with a cursor. Pushing from the middle truncates
//! the forward entries, matching browser semantics; back/forward move the
//! cursor without creating entries.

use std::time::Instant;

/// How a history entry was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavigationType {
    /// Programmatic navigation (link click, `navigate_to`).
    #[default]
    Navigate,
    /// In-place replacement of the current entry.
    Replace,
    /// Back/forward traversal.
    BackForward,
}

impl NavigationType {
    /// Check if this creates a new history entry.
    pub fn creates_entry(self) -> bool {
        matches!(self, NavigationType::Navigate)
    }
}

/// A history entry for one visited route.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Unique ID for this entry.
    pub id: u64,

    /// The route path of this entry.
    pub path: String,

    /// Navigation type that created this entry.
    pub navigation_type: NavigationType,

    /// Timestamp when this entry was created.
    pub created_at: Instant,
}

impl HistoryEntry {
    /// Create a new history entry.
    pub fn new(path: impl Into<String>) -> Self {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            path: path.into(),
            navigation_type: NavigationType::Navigate,
            created_at: Instant::now(),
        }
    }

    /// Set the navigation type.
    pub fn with_navigation_type(mut self, navigation_type: NavigationType) -> Self {
        self.navigation_type = navigation_type;
        self
    }
}

/// The session history for one routing context.
#[derive(Debug, Default)]
pub struct SessionHistory {
    entries: Vec<HistoryEntry>,
    current_index: usize,
}

impl SessionHistory {
    /// Create an empty session history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn length(&self) -> usize {
        self.entries.len()
    }

    /// The current entry.
    pub fn current_entry(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.current_index)
    }

    /// The current route path.
    pub fn current_path(&self) -> Option<&str> {
        self.current_entry().map(|e| e.path.as_str())
    }

    /// Current cursor position.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Push a new entry, truncating any forward history.
    pub fn push(&mut self, path: impl Into<String>) {
        if self.current_index + 1 < self.entries.len() {
            self.entries.truncate(self.current_index + 1);
        }
        self.entries.push(HistoryEntry::new(path));
        self.current_index = self.entries.len() - 1;
    }

    /// Replace the current entry in place. With no entries yet, this
    /// seeds the history instead.
    pub fn replace(&mut self, path: impl Into<String>) {
        let entry = HistoryEntry::new(path).with_navigation_type(NavigationType::Replace);
        match self.entries.get_mut(self.current_index) {
            Some(current) => *current = entry,
            None => {
                self.entries.push(entry);
                self.current_index = self.entries.len() - 1;
            }
        }
    }

    /// Check if can go back.
    pub fn can_go_back(&self) -> bool {
        self.current_index > 0
    }

    /// Check if can go forward.
    pub fn can_go_forward(&self) -> bool {
        self.current_index + 1 < self.entries.len()
    }

    /// Go back one entry.
    pub fn back(&mut self) -> Option<&HistoryEntry> {
        self.go(-1)
    }

    /// Go forward one entry.
    pub fn forward(&mut self) -> Option<&HistoryEntry> {
        self.go(1)
    }

    /// Go by delta entries (negative = back, positive = forward).
    pub fn go(&mut self, delta: i32) -> Option<&HistoryEntry> {
        let new_index = if delta >= 0 {
            self.current_index.checked_add(delta as usize)?
        } else {
            self.current_index.checked_sub((-delta) as usize)?
        };
        if new_index >= self.entries.len() {
            return None;
        }
        self.current_index = new_index;
        self.current_entry()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}
