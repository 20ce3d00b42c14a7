//! Persisters for tile payloads

pub mod tiles;

pub use tiles::{write_stream, TileFileWriter};
