//! Coordinates of work items

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// One addressable unit of work in a 2-D index space.
///
/// `row` is the primary axis (the unit of checkpoint sealing and of splitting),
/// `col` the secondary axis that sealed rows are sorted by.
pub trait Coordinate:
    Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display + Serialize + Send + Sync + 'static
{
    fn row(&self) -> u32;

    fn col(&self) -> u32;

    fn from_row_col(row: u32, col: u32) -> Self;

    /// Substitute this coordinate into a request URL template
    fn fill_template(&self, template: &str) -> String;
}

/// A map tile; `x` is the primary axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl Coordinate for TileCoord {
    fn row(&self) -> u32 {
        self.x
    }

    fn col(&self) -> u32 {
        self.y
    }

    fn from_row_col(row: u32, col: u32) -> Self {
        Self::new(row, col)
    }

    /// Fills `{x}` and `{y}`
    fn fill_template(&self, template: &str) -> String {
        template
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.x, self.y)
    }
}

/// One pixel inside a tile; rows run along `tile_y`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelCoord {
    pub tile_x: u32,
    pub tile_y: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
}

impl PixelCoord {
    pub fn new(tile_x: u32, tile_y: u32, pixel_x: u32, pixel_y: u32) -> Self {
        Self {
            tile_x,
            tile_y,
            pixel_x,
            pixel_y,
        }
    }

    pub fn tile(&self) -> TileCoord {
        TileCoord::new(self.tile_x, self.tile_y)
    }
}

impl Coordinate for PixelCoord {
    fn row(&self) -> u32 {
        self.tile_y
    }

    fn col(&self) -> u32 {
        self.tile_x
    }

    /// The sweep samples each tile's origin pixel
    fn from_row_col(row: u32, col: u32) -> Self {
        Self::new(col, row, 0, 0)
    }

    /// Fills `{x}`/`{y}` with the tile and `{px}`/`{py}` with the pixel
    fn fill_template(&self, template: &str) -> String {
        template
            .replace("{px}", &self.pixel_x.to_string())
            .replace("{py}", &self.pixel_y.to_string())
            .replace("{x}", &self.tile_x.to_string())
            .replace("{y}", &self.tile_y.to_string())
    }
}

impl fmt::Display for PixelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{},{}",
            self.tile_x, self.tile_y, self.pixel_x, self.pixel_y
        )
    }
}
