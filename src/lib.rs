//! wplace-pull - bulk, resumable, proxy-rotated tile and pixel acquisition
//!
//! The acquisition engine turns a huge, lazily enumerated grid of coordinates
//! into a bounded window of in-flight requests. Requests rotate through a proxy
//! pool under a global concurrency and pacing limit, failures are retried with
//! backoff, stuck work is reclaimed through leases, and the full-grid pixel
//! sweep checkpoints progress row by row so restarts never redo sealed rows.

pub mod checkpoint;
pub mod error;
pub mod fetch;
pub mod grid;
pub mod logging;
pub mod output;
pub mod proxy;
pub mod sched;
pub mod split;

pub use error::{ConfigError, FetchError, PersistError};
pub use grid::{Coordinate, GridSpace, PixelCoord, TileCoord, WorkSource};
pub use proxy::{ProxyEndpoint, ProxyPool};
pub use sched::{RetryPolicy, Scheduler, SchedulerConfig, SweepStats};

use std::path::{Path, PathBuf};

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Default number of split workers
pub const DEFAULT_SPLITS: usize = 6;

/// Default global concurrency per worker
pub const DEFAULT_CONCURRENCY: usize = 1200;

/// Inclusive bounds of the tile grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl Default for TileBounds {
    fn default() -> Self {
        Self {
            min_x: 0,
            max_x: 2047,
            min_y: 0,
            max_y: 2047,
        }
    }
}

impl TileBounds {
    /// The bounds as a row-major index space, `x` being the primary axis
    pub fn space(&self) -> GridSpace {
        GridSpace::new(self.min_x, self.max_x, self.min_y, self.max_y)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.min_x > self.max_x || self.min_y > self.max_y {
            return Err(ConfigError::Invalid(format!(
                "empty bounds x {}..={} y {}..={}",
                self.min_x, self.max_x, self.min_y, self.max_y
            )));
        }
        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root folder for tiles, logs and archives
    pub base_path: PathBuf,
    /// Number of worker processes for the split sweep
    pub splits: usize,
    /// Maximum in-flight requests per worker
    pub concurrency: usize,
    /// Tile bounds swept by the split orchestrator
    pub bounds: TileBounds,
    /// URL or file path of the proxy list
    pub proxy_source: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            splits: DEFAULT_SPLITS,
            concurrency: DEFAULT_CONCURRENCY,
            bounds: TileBounds::default(),
            proxy_source: None,
        }
    }
}

impl Config {
    pub fn logs_dir(&self) -> PathBuf {
        self.base_path.join("logs")
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.base_path.join("tiles")
    }

    /// The proxy source, or a config error when none was supplied
    pub fn require_proxy_source(&self) -> std::result::Result<&str, ConfigError> {
        self.proxy_source
            .as_deref()
            .ok_or(ConfigError::MissingProxySource)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

fn default_base_path() -> PathBuf {
    if cfg!(target_os = "windows") {
        PathBuf::from("C:/wplace")
    } else if cfg!(target_os = "linux") {
        PathBuf::from("/srv/wplace")
    } else {
        PathBuf::from("/wplace")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.splits, DEFAULT_SPLITS);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.bounds, TileBounds::default());
        assert!(config.proxy_source.is_none());
    }

    #[test]
    fn test_missing_proxy_source_is_config_error() {
        let config = Config::default();
        assert!(matches!(
            config.require_proxy_source(),
            Err(ConfigError::MissingProxySource)
        ));
    }

    #[test]
    fn test_bounds_space_size() {
        let bounds = TileBounds {
            min_x: 0,
            max_x: 3,
            min_y: 0,
            max_y: 3,
        };
        assert_eq!(bounds.space().len(), 16);
    }

    #[test]
    fn test_inverted_bounds_are_invalid() {
        let bounds = TileBounds {
            min_x: 5,
            max_x: 4,
            min_y: 0,
            max_y: 0,
        };
        assert!(matches!(bounds.validate(), Err(ConfigError::Invalid(_))));
        assert!(TileBounds::default().validate().is_ok());
    }
}
