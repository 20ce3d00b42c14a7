//! Row-sealed checkpointing for the full-grid pixel sweep

pub mod rows;
pub mod state;
pub mod writer;

pub use rows::RowTracker;
pub use state::{Checkpoint, CheckpointFile, CHECKPOINT_FILE};
pub use writer::{RowLine, RowShardWriter, CHECKPOINT_INTERVAL};
