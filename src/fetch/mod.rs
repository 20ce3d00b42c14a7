//! Collaborator seams of the scheduler
//!
//! A [`Fetcher`] turns one coordinate into a raw outcome through a given
//! proxy; a [`Persister`] stores payloads and observes terminal outcomes. The
//! scheduler classifies statuses itself, so fetchers only report what they saw.

pub mod pixel;
pub mod tile;

use crate::error::{FetchError, PersistError};
use crate::grid::Coordinate;
use crate::proxy::PooledProxy;
use crate::sched::task::ResultCode;
use async_trait::async_trait;

pub use pixel::{PixelFetcher, RegionRecord, PIXEL_URL_TEMPLATE};
pub use tile::{TileFetcher, TILE_URL_TEMPLATE};

/// Raw result of one request
#[derive(Debug)]
pub enum Fetched<P> {
    /// Success carrying data to persist
    Payload { status: u16, payload: P },
    /// Success with nothing worth keeping
    Empty { status: u16 },
    /// Any other status; classified by the scheduler
    Status(u16),
}

impl<P> Fetched<P> {
    pub fn status(&self) -> u16 {
        match self {
            Fetched::Payload { status, .. } | Fetched::Empty { status } | Fetched::Status(status) => {
                *status
            }
        }
    }
}

/// Fetch the resource for one coordinate via one proxy
#[async_trait]
pub trait Fetcher<C: Coordinate>: Send + Sync + 'static {
    type Payload: Send + 'static;

    async fn fetch(
        &self,
        coord: &C,
        proxy: &PooledProxy,
    ) -> Result<Fetched<Self::Payload>, FetchError>;
}

/// Persist payloads and observe items reaching a terminal state
#[async_trait]
pub trait Persister<C: Coordinate, P: Send + 'static>: Send + Sync + 'static {
    /// Store the payload; an error sends the item back through retry
    async fn persist(&self, coord: &C, payload: P) -> Result<(), PersistError>;

    /// Called once per coordinate when it becomes Done or Failed.
    ///
    /// `frontier` is the linear index of the next coordinate the work source
    /// will produce; nothing at or past it has been attempted yet.
    fn on_terminal(&self, _coord: &C, _code: &ResultCode, _frontier: u64) {}

    /// Called every report period with the current frontier
    fn on_tick(&self, _frontier: u64) {}

    /// Called once after the active set drains
    fn finish(&self) {}
}

pub(crate) fn map_transport(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(error)
    }
}
