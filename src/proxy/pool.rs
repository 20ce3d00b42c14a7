//! Proxy pool: load once, rotate round-robin, one pooled client per proxy

use crate::error::{ConfigError, FetchError};
use crate::proxy::models::ProxyEndpoint;
use crate::proxy::parser::ProxyParser;
use once_cell::sync::OnceCell;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default number of attempts at fetching the proxy list
const DEFAULT_LOAD_ATTEMPTS: u32 = 10;

/// Timeout for one proxy list fetch
const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 30;

/// First retry delay when fetching the proxy list; doubles per attempt
const LOAD_RETRY_BASE: Duration = Duration::from_secs(2);

/// Ceiling on the proxy list retry delay
const LOAD_RETRY_MAX: Duration = Duration::from_secs(30);

const MINUTE: Duration = Duration::from_secs(60);

/// Settings applied once to every per-proxy client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    /// Whole-request timeout, kept shorter than the scheduler lease
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub keep_alive: Duration,
    pub user_agent: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: MINUTE,
            request_timeout: MINUTE,
            pool_max_idle_per_host: 64,
            keep_alive: 5 * MINUTE,
            user_agent: None,
        }
    }
}

/// Configuration for loading a proxy pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Keep at most this many proxies from the list
    pub max_proxies: Option<usize>,
    pub load_attempts: u32,
    pub load_timeout: Duration,
    /// Where the resolved list is written for operators
    pub side_file: Option<PathBuf>,
    pub client: ClientSettings,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_proxies: None,
            load_attempts: DEFAULT_LOAD_ATTEMPTS,
            load_timeout: Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS),
            side_file: None,
            client: ClientSettings::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_proxies(mut self, max: usize) -> Self {
        self.max_proxies = Some(max);
        self
    }

    pub fn with_load_attempts(mut self, attempts: u32) -> Self {
        self.load_attempts = attempts.max(1);
        self
    }

    pub fn with_side_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.side_file = Some(path.into());
        self
    }

    pub fn with_client(mut self, client: ClientSettings) -> Self {
        self.client = client;
        self
    }
}

/// A proxy endpoint together with its lazily built connection-pooling client
#[derive(Debug)]
pub struct PooledProxy {
    endpoint: ProxyEndpoint,
    settings: ClientSettings,
    client: OnceCell<Client>,
}

impl PooledProxy {
    fn new(endpoint: ProxyEndpoint, settings: ClientSettings) -> Self {
        Self {
            endpoint,
            settings,
            client: OnceCell::new(),
        }
    }

    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn label(&self) -> String {
        self.endpoint.label()
    }

    /// The client routed through this proxy, built on first use and reused after
    pub fn client(&self) -> Result<&Client, FetchError> {
        self.client.get_or_try_init(|| self.build_client())
    }

    fn build_client(&self) -> Result<Client, FetchError> {
        let proxy_url = self.endpoint.url();
        // Targets are https, so http proxies must cover every scheme too.
        let reqwest_proxy =
            ReqwestProxy::all(&proxy_url).map_err(|e| FetchError::Client(e.to_string()))?;

        let mut builder = Client::builder()
            .proxy(reqwest_proxy)
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .pool_max_idle_per_host(self.settings.pool_max_idle_per_host)
            .pool_idle_timeout(self.settings.keep_alive)
            .tcp_keepalive(self.settings.keep_alive);
        if let Some(agent) = &self.settings.user_agent {
            builder = builder.user_agent(agent.as_str());
        }

        builder.build().map_err(|e| FetchError::Client(e.to_string()))
    }
}

/// Ordered, read-mostly set of proxies handed out in rotation
#[derive(Debug)]
pub struct ProxyPool {
    proxies: Vec<Arc<PooledProxy>>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    /// Build a pool from already resolved endpoints
    pub fn from_endpoints(
        endpoints: Vec<ProxyEndpoint>,
        settings: ClientSettings,
    ) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::EmptyProxyList("<inline>".to_string()));
        }

        let proxies = endpoints
            .into_iter()
            .map(|endpoint| Arc::new(PooledProxy::new(endpoint, settings.clone())))
            .collect();

        Ok(Self {
            proxies,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Fetch, parse and cap the proxy list, retrying with exponential backoff.
    ///
    /// `source` is an `http(s)://` URL or a local file path. An unreachable or
    /// empty source after every attempt is the one fatal startup error.
    pub async fn load(source: &str, config: &PoolConfig) -> Result<Self, ConfigError> {
        let attempts = config.load_attempts.max(1);
        let mut last_error = String::new();
        let mut last_was_empty = false;

        for attempt in 1..=attempts {
            info!(attempt, attempts, "fetching proxy list");

            match fetch_source(source, config.load_timeout).await {
                Ok(content) => {
                    let mut endpoints = ProxyParser::parse_list(&content);
                    if let Some(max) = config.max_proxies {
                        endpoints.truncate(max);
                    }
                    if !endpoints.is_empty() {
                        if let Some(path) = &config.side_file {
                            write_side_file(path, &endpoints);
                        }
                        info!(count = endpoints.len(), "fetched proxies");
                        return Self::from_endpoints(endpoints, config.client.clone());
                    }
                    last_error = "list was empty".to_string();
                    last_was_empty = true;
                }
                Err(e) => {
                    last_error = e;
                    last_was_empty = false;
                }
            }

            warn!(attempt, error = %last_error, "proxy list fetch failed");
            if attempt < attempts {
                let delay = load_retry_delay(attempt);
                info!(delay_ms = delay.as_millis() as u64, "retrying proxy list fetch");
                tokio::time::sleep(delay).await;
            }
        }

        if last_was_empty {
            return Err(ConfigError::EmptyProxyList(source.to_string()));
        }
        Err(ConfigError::ProxySourceUnreachable {
            source_uri: source.to_string(),
            attempts,
            reason: last_error,
        })
    }

    /// Next proxy in round-robin order; never blocks
    pub fn next(&self) -> Arc<PooledProxy> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Arc::clone(&self.proxies[idx])
    }

    /// The pooled client for `proxy`, created once per endpoint
    pub fn client_for<'a>(&self, proxy: &'a PooledProxy) -> Result<&'a Client, FetchError> {
        proxy.client()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ProxyEndpoint> {
        self.proxies.iter().map(|p| p.endpoint())
    }
}

/// `min(2s * 2^(attempt-1), 30s)`
fn load_retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    LOAD_RETRY_BASE.saturating_mul(factor).min(LOAD_RETRY_MAX)
}

async fn fetch_source(source: &str, timeout: Duration) -> Result<String, String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;
        let response = client
            .get(source)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        response.text().await.map_err(|e| e.to_string())
    } else {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| format!("{}: {}", source, e))
    }
}

fn write_side_file(path: &std::path::Path, endpoints: &[ProxyEndpoint]) {
    let urls: Vec<String> = endpoints.iter().map(|e| e.url()).collect();
    let result = (|| -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let body = serde_json::to_string(&urls).map_err(std::io::Error::other)?;
        std::fs::write(path, body)
    })();

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "could not write proxy side file");
    }
}
