//! Tile image fetcher

use crate::error::FetchError;
use crate::fetch::{map_transport, Fetched, Fetcher};
use crate::grid::{Coordinate, TileCoord};
use crate::proxy::PooledProxy;
use async_trait::async_trait;
use reqwest::Response;
use std::time::Duration;

/// Where tile images live; `{x}` and `{y}` are the tile coordinate
pub const TILE_URL_TEMPLATE: &str = "https://backend.wplace.live/files/s0/tiles/{x}/{y}.png";

/// Time allowed for response headers; the body is bounded by the client timeout
const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Requests one tile and hands back the unread response on 200, so the
/// body can be streamed straight to disk
#[derive(Debug, Clone)]
pub struct TileFetcher {
    template: String,
    header_timeout: Duration,
}

impl Default for TileFetcher {
    fn default() -> Self {
        Self::new(TILE_URL_TEMPLATE)
    }
}

impl TileFetcher {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            header_timeout: DEFAULT_HEADER_TIMEOUT,
        }
    }

    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    pub fn url_for(&self, coord: &TileCoord) -> String {
        coord.fill_template(&self.template)
    }
}

#[async_trait]
impl Fetcher<TileCoord> for TileFetcher {
    type Payload = Response;

    async fn fetch(
        &self,
        coord: &TileCoord,
        proxy: &PooledProxy,
    ) -> Result<Fetched<Response>, FetchError> {
        let client = proxy.client()?;
        let request = client.get(self.url_for(coord)).send();

        let response = tokio::time::timeout(self.header_timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(map_transport)?;

        let status = response.status().as_u16();
        if status == 200 {
            Ok(Fetched::Payload {
                status,
                payload: response,
            })
        } else {
            Ok(Fetched::Status(status))
        }
    }
}
