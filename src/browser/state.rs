use std::collections::BTreeSet;
use std::ops::Range;

use crate::remote::RemoteEntry;

/// Where the browser is and what the operator has marked.
///
/// `directory_stack` is never empty; its last element is the directory
/// `entries` were listed from.
#[derive(Clone, Debug)]
pub struct NavigationState {
    pub directory_stack: Vec<String>,
    pub entries: Vec<RemoteEntry>,
    pub cursor: usize,
    /// Indices into `entries`, iterated in ascending order.
    pub selected: BTreeSet<usize>,
    pub show_hidden: bool,
    pub scroll_offset: usize,
    pub viewport_height: usize,
}

impl NavigationState {
    pub fn new(start_dir: impl Into<String>, show_hidden: bool) -> Self {
        Self {
            directory_stack: vec![start_dir.into()],
            entries: Vec::new(),
            cursor: 0,
            selected: BTreeSet::new(),
            show_hidden,
            scroll_offset: 0,
            viewport_height: 1,
        }
    }

    pub fn current_dir(&self) -> &str {
        self.directory_stack
            .last()
            .map(String::as_str)
            .unwrap_or("/")
    }

    /// The directory `back` would return to, if any.
    pub fn parent_dir(&self) -> Option<&str> {
        match self.directory_stack.len() {
            0 | 1 => None,
            n => Some(self.directory_stack[n - 2].as_str()),
        }
    }

    pub fn current_entry(&self) -> Option<&RemoteEntry> {
        self.entries.get(self.cursor)
    }

    /// Selected entries in ascending index order.
    pub fn selected_entries(&self) -> Vec<RemoteEntry> {
        self.selected
            .iter()
            .filter_map(|&idx| self.entries.get(idx).cloned())
            .collect()
    }

    /// Swap in a fresh listing: cursor, selection and scroll start over.
    pub fn replace_entries(&mut self, entries: Vec<RemoteEntry>) {
        self.entries = entries;
        self.reset_cursor();
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
        self.scroll_offset = 0;
        self.selected.clear();
    }

    pub fn push_dir(&mut self, dir: String) {
        self.directory_stack.push(dir);
    }

    /// Pop the current directory. Never pops the last element.
    pub fn pop_dir(&mut self) -> bool {
        if self.directory_stack.len() > 1 {
            self.directory_stack.pop();
            true
        } else {
            false
        }
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.entries.is_empty() {
            self.cursor = 0;
        } else {
            let last = self.entries.len() - 1;
            self.cursor = self.cursor.saturating_add_signed(delta).min(last);
        }
        self.adjust_scroll();
    }

    pub fn move_to_start(&mut self) {
        self.cursor = 0;
        self.adjust_scroll();
    }

    pub fn move_to_end(&mut self) {
        self.cursor = self.entries.len().saturating_sub(1);
        self.adjust_scroll();
    }

    pub fn page(&mut self, pages: isize) {
        let step = self.viewport_height.max(1) as isize;
        self.move_cursor(step * pages);
    }

    pub fn toggle_selected(&mut self) {
        if self.cursor >= self.entries.len() {
            return;
        }
        if !self.selected.remove(&self.cursor) {
            self.selected.insert(self.cursor);
        }
    }

    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height.max(1);
        self.adjust_scroll();
    }

    /// Keep the cursor row inside `[scroll_offset, scroll_offset + viewport_height)`.
    fn adjust_scroll(&mut self) {
        let height = self.viewport_height.max(1);
        if self.cursor < self.scroll_offset {
            self.scroll_offset = self.cursor;
        } else if self.cursor >= self.scroll_offset + height {
            self.scroll_offset = self.cursor + 1 - height;
        }
        let max_offset = self.entries.len().saturating_sub(height);
        self.scroll_offset = self.scroll_offset.min(max_offset);
    }

    pub fn visible_range(&self) -> Range<usize> {
        let start = self.scroll_offset.min(self.entries.len());
        let end = (start + self.viewport_height.max(1)).min(self.entries.len());
        start..end
    }
}
