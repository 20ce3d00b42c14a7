//! Proxy module
//!
//! This module provides functionality for:
//! - Parsing provider proxy lists (`ip:port:user:pass` and friends)
//! - Loading the list once at startup with bounded retries
//! - Handing proxies out round-robin, each with one long-lived pooled client

pub mod models;
pub mod parser;
pub mod pool;

pub use models::{ProxyAuth, ProxyEndpoint, ProxyScheme};
pub use parser::ProxyParser;
pub use pool::{ClientSettings, PoolConfig, PooledProxy, ProxyPool};
