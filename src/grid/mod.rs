//! Coordinates and the lazy work source that enumerates them

pub mod coord;
pub mod source;

pub use coord::{Coordinate, PixelCoord, TileCoord};
pub use source::{GridSpace, WorkSource};
