// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Browser-style selection history

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What a history entry points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SelectionEntry {
    /// A resource id
    Resource(String),
    /// A file or directory path
    Path(String),
}

/// Direction of a history move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards older entries
    Back,
    /// Towards newer entries
    Forward,
}

/// Bounded linear history with a cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionHistory {
    entries: VecDeque<SelectionEntry>,
    cursor: Option<usize>,
    capacity: usize,
}

impl Default for SelectionHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SelectionHistory {
    /// Empty history holding at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: None,
            capacity: capacity.max(1),
        }
    }

    /// Record a selection
    ///
    /// Entries after the cursor are discarded. Selecting the entry under the
    /// cursor again is not recorded twice.
    pub fn push(&mut self, entry: SelectionEntry) {
        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        }
        if self.entries.back() == Some(&entry) {
            self.cursor = Some(self.entries.len() - 1);
            return;
        }
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    /// Move the cursor, returning the entry to restore
    pub fn navigate(&mut self, direction: Direction) -> Option<&SelectionEntry> {
        let cursor = self.cursor?;
        let next = match direction {
            Direction::Back => cursor.checked_sub(1)?,
            Direction::Forward if cursor + 1 < self.entries.len() => cursor + 1,
            Direction::Forward => return None,
        };
        self.cursor = Some(next);
        self.entries.get(next)
    }

    /// Move back
    pub fn back(&mut self) -> Option<&SelectionEntry> {
        self.navigate(Direction::Back)
    }

    /// Move forward
    pub fn forward(&mut self) -> Option<&SelectionEntry> {
        self.navigate(Direction::Forward)
    }

    /// Start over from a single entry, or from nothing
    pub fn reset(&mut self, initial: Option<SelectionEntry>) {
        self.entries.clear();
        self.cursor = None;
        if let Some(entry) = initial {
            self.push(entry);
        }
    }

    /// Drop entries whose target no longer exists, keeping the cursor on the same entry when possible
    pub fn retain(&mut self, mut keep: impl FnMut(&SelectionEntry) -> bool) {
        let mut new_cursor = None;
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for (i, entry) in self.entries.drain(..).enumerate() {
            if keep(&entry) {
                kept.push_back(entry);
            }
            if Some(i) == self.cursor {
                new_cursor = kept.len().checked_sub(1);
            }
        }
        self.entries = kept;
        self.cursor = new_cursor.or_else(|| (!self.entries.is_empty()).then_some(0));
    }

    /// Entry under the cursor
    #[must_use]
    pub fn current(&self) -> Option<&SelectionEntry> {
        self.entries.get(self.cursor?)
    }

    /// Cursor position
    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Every entry, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &SelectionEntry> {
        self.entries.iter()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Can [`Self::back`] move?
    #[must_use]
    pub fn can_go_back(&self) -> bool {
        self.cursor.is_some_and(|c| c > 0)
    }

    /// Can [`Self::forward`] move?
    #[must_use]
    pub fn can_go_forward(&self) -> bool {
        self.cursor.is_some_and(|c| c + 1 < self.entries.len())
    }
}
