//! Catalog listing client: one HTTP GET per page, no retries.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::FetchError;
use crate::settings::Settings;

/// One page of the catalog listing. Products stay untyped here; the
/// decomposer gives each qualifying record its schema.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogPage {
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub count: u64,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub page: u64,
    #[serde(default)]
    pub products: Vec<serde_json::Value>,
}

impl CatalogPage {
    pub fn from_json(body: &str) -> Result<Self, FetchError> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Number of pages needed to hold `count` items, rounding up.
pub fn page_count(count: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    count.div_ceil(u64::from(page_size)) as u32
}

/// Anything that can hand the orchestrator a page by number.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    async fn fetch_page(&self, page: u32) -> Result<CatalogPage, FetchError>;
}

pub struct CatalogClient {
    http: reqwest::Client,
    listing_url: String,
}

impl CatalogClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(settings.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(http, &settings.base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        CatalogClient {
            http,
            listing_url: format!("{}/.json", base_url.trim_end_matches('/')),
        }
    }
}

impl PageSource for CatalogClient {
    async fn fetch_page(&self, page: u32) -> Result<CatalogPage, FetchError> {
        debug!(page, url = %self.listing_url, "fetching catalog page");
        let response = self
            .http
            .get(&self.listing_url)
            .query(&[("page", page)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        CatalogPage::from_json(&body)
    }
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
