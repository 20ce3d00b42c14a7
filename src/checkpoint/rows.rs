//! Per-row completion counting and in-order sealing

use crate::grid::GridSpace;

/// Tracks how many coordinates of each row reached a terminal state.
///
/// Rows become ready out of order but are sealed strictly in row order, so
/// everything up to `last_sealed` is final on disk.
#[derive(Debug, Clone)]
pub struct RowTracker {
    space: GridSpace,
    done: Vec<u32>,
    ready: Vec<bool>,
    last_sealed: Option<u32>,
}

impl RowTracker {
    /// Rows up to and including `last_sealed` start out sealed
    pub fn new(space: GridSpace, last_sealed: Option<u32>) -> Self {
        let height = space.height() as usize;
        let mut tracker = Self {
            space,
            done: vec![0; height],
            ready: vec![false; height],
            last_sealed,
        };

        if let Some(last) = last_sealed {
            let width = space.width();
            for row in space.min_row..=last.min(space.max_row) {
                if let Some(slot) = tracker.slot(row) {
                    tracker.done[slot] = width;
                    tracker.ready[slot] = true;
                }
            }
        }
        tracker
    }

    fn slot(&self, row: u32) -> Option<usize> {
        if self.space.is_empty() || row < self.space.min_row || row > self.space.max_row {
            None
        } else {
            Some((row - self.space.min_row) as usize)
        }
    }

    /// Count one terminal coordinate. Returns true when this completes the row.
    pub fn record(&mut self, row: u32) -> bool {
        let Some(slot) = self.slot(row) else {
            return false;
        };
        if self.ready[slot] {
            return false;
        }

        self.done[slot] += 1;
        if self.done[slot] >= self.space.width() {
            self.ready[slot] = true;
            return true;
        }
        false
    }

    pub fn completed(&self, row: u32) -> u32 {
        self.slot(row).map_or(0, |slot| self.done[slot])
    }

    pub fn is_ready(&self, row: u32) -> bool {
        self.slot(row).is_some_and(|slot| self.ready[slot])
    }

    pub fn is_sealed(&self, row: u32) -> bool {
        self.last_sealed.is_some_and(|last| row <= last)
    }

    pub fn last_sealed(&self) -> Option<u32> {
        self.last_sealed
    }

    /// The row right after the last sealed one, when it is ready
    pub fn next_sealable(&self) -> Option<u32> {
        let next = self
            .last_sealed
            .map_or(self.space.min_row, |row| row.saturating_add(1));
        if next <= self.space.max_row && self.is_ready(next) {
            Some(next)
        } else {
            None
        }
    }

    pub fn mark_sealed(&mut self, row: u32) {
        debug_assert_eq!(self.next_sealable(), Some(row));
        self.last_sealed = Some(row);
    }

    pub fn all_sealed(&self) -> bool {
        self.space.is_empty() || self.last_sealed == Some(self.space.max_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_ready_only_after_every_column() {
        let mut tracker = RowTracker::new(GridSpace::new(0, 1, 0, 3), None);

        for col_done in 0..3 {
            assert!(!tracker.record(0), "column {} should not complete row", col_done);
        }
        assert!(!tracker.is_ready(0));
        assert_eq!(tracker.next_sealable(), None);

        assert!(tracker.record(0));
        assert!(tracker.is_ready(0));
        assert_eq!(tracker.next_sealable(), Some(0));
    }

    #[test]
    fn test_rows_seal_in_order() {
        let mut tracker = RowTracker::new(GridSpace::new(0, 2, 0, 1), None);

        tracker.record(1);
        tracker.record(1);
        assert!(tracker.is_ready(1));
        assert_eq!(tracker.next_sealable(), None);

        tracker.record(0);
        tracker.record(0);
        assert_eq!(tracker.next_sealable(), Some(0));
        tracker.mark_sealed(0);
        assert_eq!(tracker.next_sealable(), Some(1));
        tracker.mark_sealed(1);
        assert_eq!(tracker.next_sealable(), None);
        assert!(tracker.is_sealed(1));
        assert!(!tracker.all_sealed());
    }

    #[test]
    fn test_resumed_rows_start_sealed() {
        let mut tracker = RowTracker::new(GridSpace::new(0, 3, 0, 1), Some(1));
        assert!(tracker.is_sealed(0));
        assert!(tracker.is_ready(1));
        assert_eq!(tracker.completed(1), 2);
        assert!(!tracker.record(1));
        assert_eq!(tracker.next_sealable(), None);
    }

    #[test]
    fn test_ignores_rows_outside_space() {
        let mut tracker = RowTracker::new(GridSpace::new(5, 6, 0, 0), None);
        assert!(!tracker.record(4));
        assert!(!tracker.record(7));
        assert!(tracker.record(5));
        assert_eq!(tracker.next_sealable(), Some(5));
    }
}
