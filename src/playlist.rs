//! Playlist engine
//!
//! Ordered, path-deduplicated list of playable items with a current index.
//! Every index-taking operation validates its input and reports
//! `IndexOutOfRange` instead of clamping or panicking.

use crate::models::{LoopMode, PlaylistItem};
use std::collections::HashSet;
use thiserror::Error;

/// Errors from playlist operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaylistError {
    #[error("Index {index} out of range (playlist has {len} items)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// What `previous()` does at the first item under `LoopMode::All`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviousWrap {
    /// Jump straight to the last item
    #[default]
    Wrap,
    /// Stay on the first item and return None
    Stop,
}

/// Playlist state and the only way to mutate it
#[derive(Debug, Clone, Default)]
pub struct PlaylistEngine {
    items: Vec<PlaylistItem>,
    current: Option<usize>,
    loop_mode: LoopMode,
    previous_wrap: PreviousWrap,
}

impl PlaylistEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an external list, dropping repeated paths
    pub fn from_items(items: impl IntoIterator<Item = PlaylistItem>) -> Self {
        let mut engine = Self::new();
        engine.add(items);
        engine
    }

    pub fn with_loop_mode(mut self, mode: LoopMode) -> Self {
        self.loop_mode = mode;
        self
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn previous_wrap(&self) -> PreviousWrap {
        self.previous_wrap
    }

    pub fn set_previous_wrap(&mut self, wrap: PreviousWrap) {
        self.previous_wrap = wrap;
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistItem> {
        self.items.get(index)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&PlaylistItem> {
        self.current.and_then(|i| self.items.get(i))
    }

    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.items.iter().position(|item| item.path == path)
    }

    fn check(&self, index: usize) -> Result<(), PlaylistError> {
        if index < self.items.len() {
            Ok(())
        } else {
            Err(PlaylistError::IndexOutOfRange {
                index,
                len: self.items.len(),
            })
        }
    }

    /// Append items whose path is not present yet, keeping first-seen order.
    /// Returns how many were added.
    pub fn add(&mut self, items: impl IntoIterator<Item = PlaylistItem>) -> usize {
        let before = self.items.len();
        let mut seen: HashSet<String> = self.items.iter().map(|i| i.path.clone()).collect();

        for item in items {
            if seen.insert(item.path.clone()) {
                self.items.push(item);
            }
        }

        self.items.len() - before
    }

    /// Remove and return the item at `index`
    pub fn remove(&mut self, index: usize) -> Result<PlaylistItem, PlaylistError> {
        self.check(index)?;
        let removed = self.items.remove(index);

        self.current = match self.current {
            Some(c) if index < c => Some(c - 1),
            Some(_) if self.items.is_empty() => None,
            Some(c) if index == c => Some(c.min(self.items.len() - 1)),
            other => other,
        };

        Ok(removed)
    }

    /// Take the item at `from` out and reinsert it at `to` in the shortened
    /// list (splice, not swap). The current item stays current.
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), PlaylistError> {
        self.check(from)?;
        self.check(to)?;

        let item = self.items.remove(from);
        self.items.insert(to, item);

        if let Some(c) = self.current {
            self.current = Some(if c == from {
                to
            } else {
                let mut shifted = if from < c { c - 1 } else { c };
                if to <= shifted {
                    shifted += 1;
                }
                shifted
            });
        }

        Ok(())
    }

    /// Make `index` current
    pub fn select(&mut self, index: usize) -> Result<&PlaylistItem, PlaylistError> {
        self.check(index)?;
        self.current = Some(index);
        Ok(&self.items[index])
    }

    /// Index `next()` would select, without selecting it
    pub fn next_index(&self) -> Option<usize> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }

        match (self.current, self.loop_mode) {
            (None, _) => Some(0),
            (Some(c), LoopMode::One) => Some(c),
            (Some(c), _) if c + 1 < len => Some(c + 1),
            (Some(_), LoopMode::All) => Some(0),
            (Some(_), LoopMode::None) => None,
        }
    }

    /// Index `previous()` would select, without selecting it
    pub fn previous_index(&self) -> Option<usize> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }

        let wrap = self.previous_wrap == PreviousWrap::Wrap;
        match (self.current, self.loop_mode) {
            (None, LoopMode::All) if wrap => Some(len - 1),
            (None, _) => None,
            (Some(c), LoopMode::One) => Some(c),
            (Some(c), _) if c > 0 => Some(c - 1),
            (Some(_), LoopMode::All) if wrap => Some(len - 1),
            (Some(_), _) => None,
        }
    }

    /// Advance honoring the loop mode. Under `None` the index stays on the
    /// last item and None is returned past the end.
    pub fn next(&mut self) -> Option<PlaylistItem> {
        let index = self.next_index()?;
        self.current = Some(index);
        Some(self.items[index].clone())
    }

    /// Step back honoring the loop mode and the `PreviousWrap` policy
    pub fn previous(&mut self) -> Option<PlaylistItem> {
        let index = self.previous_index()?;
        self.current = Some(index);
        Some(self.items[index].clone())
    }

    /// Drop every item and the current index
    pub fn clear(&mut self) {
        self.items.clear();
        self.current = None;
    }
}
