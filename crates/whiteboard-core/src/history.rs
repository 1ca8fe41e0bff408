//! Local undo/redo over full page-list snapshots.
//!
//! History is never shared between peers. Undo and redo hand back a page list
//! that the caller installs and broadcasts as a whole.

use std::collections::VecDeque;

use crate::config::DEFAULT_HISTORY_LIMIT;
use crate::operations::Page;

/// Bounded undo stack plus an unbounded redo stack.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    undo_stack: VecDeque<Vec<Page>>,
    redo_stack: Vec<Vec<Page>>,
    limit: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A limit of zero is treated as one.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Record `pages` as the state to return to on the next undo.
    ///
    /// Evicts the oldest snapshot past the limit and always clears redo.
    pub fn push_state(&mut self, pages: &[Page]) {
        self.undo_stack.push_back(pages.to_vec());
        while self.undo_stack.len() > self.limit {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
    }

    /// Pop the most recent snapshot, saving `current` for redo.
    ///
    /// Returns `None` without touching either stack when there is nothing to undo.
    pub fn undo(&mut self, current: &[Page]) -> Option<Vec<Page>> {
        let previous = self.undo_stack.pop_back()?;
        self.redo_stack.push(current.to_vec());
        Some(previous)
    }

    /// Pop the most recently undone state.
    ///
    /// The state being replaced is not pushed back onto the undo stack.
    pub fn redo(&mut self) -> Option<Vec<Page>> {
        self.redo_stack.pop()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drop both stacks.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{add_operation_to_page, create_empty_page, create_stroke, Point, Tool};

    fn page_with_strokes(n: usize) -> Vec<Page> {
        let mut page = create_empty_page();
        for i in 0..n {
            let op = create_stroke(
                vec![Point::new(i as f64, 0.0), Point::new(i as f64, 1.0)],
                "#000000",
                3.0,
                Tool::Pen,
            );
            page = add_operation_to_page(&page, op);
        }
        vec![page]
    }

    #[test]
    fn test_empty_history() {
        let mut history = HistoryManager::new();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert!(history.undo(&page_with_strokes(0)).is_none());
        assert!(history.redo().is_none());
        // Failed undo must not seed the redo stack
        assert!(!history.can_redo());
    }

    #[test]
    fn test_undo_returns_pushed_state() {
        let mut history = HistoryManager::new();
        let before = page_with_strokes(0);
        let after = page_with_strokes(1);

        history.push_state(&before);
        let restored = history.undo(&after).unwrap();

        assert_eq!(restored, before);
        assert!(history.can_redo());
        assert_eq!(history.redo().unwrap(), after);
    }

    #[test]
    fn test_redo_does_not_repush_undo() {
        let mut history = HistoryManager::new();
        history.push_state(&page_with_strokes(0));
        history.undo(&page_with_strokes(1)).unwrap();

        assert_eq!(history.undo_depth(), 0);
        history.redo().unwrap();
        assert_eq!(history.undo_depth(), 0);
        assert!(!history.can_undo());
    }

    #[test]
    fn test_push_clears_redo() {
        let mut history = HistoryManager::new();
        history.push_state(&page_with_strokes(0));
        history.undo(&page_with_strokes(1)).unwrap();
        assert!(history.can_redo());

        history.push_state(&page_with_strokes(2));
        assert!(!history.can_redo());
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_history_bound_evicts_oldest() {
        let mut history = HistoryManager::new();
        let states: Vec<_> = (0..51).map(page_with_strokes).collect();
        for state in &states {
            history.push_state(state);
        }

        assert_eq!(history.undo_depth(), 50);

        let current = page_with_strokes(99);
        let mut last = None;
        while let Some(state) = history.undo(&current) {
            last = Some(state);
        }
        // The very first snapshot was evicted; the oldest reachable is the second
        assert_eq!(last.unwrap(), states[1]);
    }

    #[test]
    fn test_custom_limit() {
        let mut history = HistoryManager::with_limit(2);
        for n in 0..5 {
            history.push_state(&page_with_strokes(n));
        }
        assert_eq!(history.undo_depth(), 2);
        assert_eq!(HistoryManager::with_limit(0).limit(), 1);
    }

    #[test]
    fn test_snapshots_are_deep_copies() {
        let mut history = HistoryManager::new();
        let mut pages = page_with_strokes(1);
        history.push_state(&pages);

        pages[0].operations.clear();

        let restored = history.undo(&pages).unwrap();
        assert_eq!(restored[0].operations.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut history = HistoryManager::new();
        history.push_state(&page_with_strokes(0));
        history.push_state(&page_with_strokes(1));
        history.undo(&page_with_strokes(2));

        history.clear();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }
}
