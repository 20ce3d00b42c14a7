//! Pixel ownership fetcher for the region sweep

use crate::error::FetchError;
use crate::fetch::{map_transport, Fetched, Fetcher};
use crate::grid::{Coordinate, PixelCoord};
use crate::proxy::PooledProxy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `{x}`/`{y}` are the tile, `{px}`/`{py}` the pixel inside it
pub const PIXEL_URL_TEMPLATE: &str = "https://backend.wplace.live/s0/pixel/{x}/{y}?x={px}&y={py}";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SITE_ORIGIN: &str = "https://wplace.live";

const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Who painted a pixel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Painter {
    pub id: i64,
    pub name: String,
    pub alliance_id: i64,
    pub alliance_name: String,
    pub equipped_flag: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// The region a pixel belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: i64,
    pub city_id: i64,
    pub name: String,
    pub number: i64,
    pub country_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaintedPixel {
    #[allow(dead_code)]
    painted_by: Painter,
    region: Region,
}

/// Tile position stored with each region record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilePosition {
    pub tile_x: u32,
    pub tile_y: u32,
}

/// One line of a region row file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRecord {
    #[serde(flatten)]
    pub region: Region,
    pub coord: TilePosition,
}

impl RegionRecord {
    /// Decode a pixel response body; `None` unless it names both painter and region
    pub fn from_body(coord: &PixelCoord, body: &[u8]) -> Option<Self> {
        let pixel: PaintedPixel = serde_json::from_slice(body).ok()?;
        Some(Self {
            region: pixel.region,
            coord: TilePosition {
                tile_x: coord.tile_x,
                tile_y: coord.tile_y,
            },
        })
    }
}

/// Requests pixel ownership with browser-like headers
#[derive(Debug, Clone)]
pub struct PixelFetcher {
    template: String,
    header_timeout: Duration,
}

impl Default for PixelFetcher {
    fn default() -> Self {
        Self::new(PIXEL_URL_TEMPLATE)
    }
}

impl PixelFetcher {
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

    pub fn url_for(&self, coord: &PixelCoord) -> String {
        coord.fill_template(&self.template)
    }
}

#[async_trait]
impl Fetcher<PixelCoord> for PixelFetcher {
    type Payload = RegionRecord;

    async fn fetch(
        &self,
        coord: &PixelCoord,
        proxy: &PooledProxy,
    ) -> Result<Fetched<RegionRecord>, FetchError> {
        let client = proxy.client()?;
        let request = client
            .get(self.url_for(coord))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-AU,en;q=0.9")
            .header(reqwest::header::REFERER, format!("{}/", SITE_ORIGIN))
            .header(reqwest::header::ORIGIN, SITE_ORIGIN)
            .send();

        let response = tokio::time::timeout(self.header_timeout, request)
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(map_transport)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Ok(Fetched::Status(status));
        }

        let body = response.bytes().await.map_err(map_transport)?;
        Ok(match RegionRecord::from_body(coord, &body) {
            Some(payload) => Fetched::Payload { status, payload },
            None => Fetched::Empty { status },
        })
    }
}
