//! Lazy row-major enumeration of a rectangular index space

use crate::grid::coord::Coordinate;
use std::marker::PhantomData;

/// Inclusive rectangular index space. Every row has the same width, which the
/// row-sealing writer relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpace {
    pub min_row: u32,
    pub max_row: u32,
    pub min_col: u32,
    pub max_col: u32,
}

impl GridSpace {
    pub fn new(min_row: u32, max_row: u32, min_col: u32, max_col: u32) -> Self {
        Self {
            min_row,
            max_row,
            min_col,
            max_col,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_row < self.min_row || self.max_col < self.min_col
    }

    /// Number of coordinates in one row
    pub fn width(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.max_col - self.min_col + 1
        }
    }

    pub fn height(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.max_row - self.min_row + 1
        }
    }

    pub fn len(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.min_row..=self.max_row).contains(&row) && (self.min_col..=self.max_col).contains(&col)
    }

    /// Position of `(row, col)` in the row-major enumeration
    pub fn index_of(&self, row: u32, col: u32) -> u64 {
        u64::from(row - self.min_row) * u64::from(self.width()) + u64::from(col - self.min_col)
    }

    /// Linear index of the first coordinate of `row`
    pub fn row_start(&self, row: u32) -> u64 {
        u64::from(row.saturating_sub(self.min_row)) * u64::from(self.width())
    }

    /// The same columns restricted to rows `min_row..=max_row`
    pub fn with_rows(&self, min_row: u32, max_row: u32) -> Self {
        Self::new(min_row, max_row, self.min_col, self.max_col)
    }
}

/// Finite, single-pass producer of coordinates in row-major order.
///
/// The cursor is explicit, so a sweep resumes by building a new source at a
/// checkpointed row instead of replaying a generator.
#[derive(Debug, Clone)]
pub struct WorkSource<C> {
    space: GridSpace,
    next_row: u32,
    next_col: u32,
    exhausted: bool,
    _coord: PhantomData<fn() -> C>,
}

impl<C: Coordinate> WorkSource<C> {
    pub fn new(space: GridSpace) -> Self {
        Self {
            space,
            next_row: space.min_row,
            next_col: space.min_col,
            exhausted: space.is_empty(),
            _coord: PhantomData,
        }
    }

    /// Start enumeration at the first coordinate of `row`
    pub fn starting_at_row(space: GridSpace, row: u32) -> Self {
        let mut source = Self::new(space);
        if row > space.max_row {
            source.exhausted = true;
        } else if row > space.min_row {
            source.next_row = row;
        }
        source
    }

    pub fn space(&self) -> GridSpace {
        self.space
    }

    /// Linear index of the next coordinate to be produced; equals `len()` once exhausted
    pub fn cursor(&self) -> u64 {
        if self.exhausted {
            self.space.len()
        } else {
            self.space.index_of(self.next_row, self.next_col)
        }
    }

    /// Coordinates not yet produced
    pub fn remaining(&self) -> u64 {
        self.space.len() - self.cursor()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl<C: Coordinate> Iterator for WorkSource<C> {
    type Item = C;

    fn next(&mut self) -> Option<C> {
        if self.exhausted {
            return None;
        }

        let coord = C::from_row_col(self.next_row, self.next_col);

        if self.next_col < self.space.max_col {
            self.next_col += 1;
        } else if self.next_row < self.space.max_row {
            self.next_row += 1;
            self.next_col = self.space.min_col;
        } else {
            self.exhausted = true;
        }

        Some(coord)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}
