//! Error types shared across the engine

use std::path::PathBuf;
use thiserror::Error;

/// Fatal startup errors. Nothing else in the engine aborts a sweep.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no proxy list source configured (set --proxy-source or PROXY_LIST_URL)")]
    MissingProxySource,

    #[error("proxy list at {source_uri} unreachable after {attempts} attempts: {reason}")]
    ProxySourceUnreachable {
        source_uri: String,
        attempts: u32,
        reason: String,
    },

    #[error("proxy list at {0} contained no usable proxies")]
    EmptyProxyList(String),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// A single network operation failed before yielding a status
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("could not build client for proxy: {0}")]
    Client(String),
}

/// Writing a payload or record to local storage failed
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("payload stream failed: {0}")]
    Stream(#[from] reqwest::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PersistError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The rate controller was shut down while an operation waited for a slot
#[derive(Debug, Error)]
#[error("rate limiter closed")]
pub struct LimiterClosed;
