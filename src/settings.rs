use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const CONFIG_FILE: &str = "food_catalog";
const ENV_PREFIX: &str = "FOODCAT";

pub const DEFAULT_BASE_URL: &str = "https://us.openfoodfacts.org";
/// Items per listing page; fixed by the catalog, only used to size the crawl.
pub const DEFAULT_PAGE_SIZE: u32 = 24;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_path: PathBuf,
    pub base_url: String,
    pub page_size: u32,
    pub start_page: u32,
    pub progress_every: u32,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Settings {
    /// Defaults, then `food_catalog.{toml,yaml,json}` if present, then `FOODCAT_*` env vars.
    pub fn load() -> Result<Self> {
        Self::builder()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("database_path", "data/food_catalog.sqlite")?
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("page_size", DEFAULT_PAGE_SIZE as i64)?
            .set_default("start_page", 1_i64)?
            .set_default("progress_every", 10_i64)?
            .set_default("request_timeout_secs", 30_i64)?
            .set_default(
                "user_agent",
                concat!("food_catalog_ingest/", env!("CARGO_PKG_VERSION")),
            )?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
