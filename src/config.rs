use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "merchant_scraper.toml";
const ENV_PREFIX: &str = "MERCHANT";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub seeds_path: PathBuf,
    pub storefront: StorefrontSettings,
    pub browser: BrowserSettings,
    pub pagination: PaginationSettings,
    pub registry: PassSettings,
    pub schedule: PassSettings,
    pub lookup: LookupSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorefrontSettings {
    /// Card links are relative to this origin.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Persistent profile, so a session logged in by hand is reused.
    pub user_data_dir: Option<PathBuf>,
    pub executable: Option<PathBuf>,
    pub request_timeout_ms: u64,
    /// How long a single wait-for-selector may take inside a task.
    pub element_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub settle_ms: u64,
    pub poll_ms: u64,
    pub max_clicks: usize,
}

/// Deadline policy for a browser-driven enrichment pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PassSettings {
    pub deadline_ms: u64,
    pub retry_factor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigitStripping {
    /// Only the legal-name fallback loses its digits.
    LegalName,
    /// Officer names are cleaned the same way.
    AllNames,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookupSettings {
    pub base_url: String,
    pub attempts: u32,
    pub delay_ms: u64,
    pub request_timeout_ms: u64,
    pub workers: usize,
    pub strip_digits: DigitStripping,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_path: PathBuf::from("data/merchants.sqlite"),
            seeds_path: PathBuf::from("links.json"),
            storefront: StorefrontSettings::default(),
            browser: BrowserSettings::default(),
            pagination: PaginationSettings::default(),
            registry: PassSettings {
                deadline_ms: 30_000,
                retry_factor: 2,
            },
            schedule: PassSettings::default(),
            lookup: LookupSettings::default(),
        }
    }
}

impl Default for StorefrontSettings {
    fn default() -> Self {
        StorefrontSettings {
            base_url: "https://www.ifood.com.br".to_string(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        BrowserSettings {
            headless: true,
            user_data_dir: None,
            executable: None,
            request_timeout_ms: 60_000,
            element_timeout_ms: 10_000,
        }
    }
}

impl Default for PaginationSettings {
    fn default() -> Self {
        PaginationSettings {
            settle_ms: 1_500,
            poll_ms: 250,
            max_clicks: 200,
        }
    }
}

impl Default for PassSettings {
    fn default() -> Self {
        PassSettings {
            deadline_ms: 5_000,
            retry_factor: 2,
        }
    }
}

impl Default for LookupSettings {
    fn default() -> Self {
        LookupSettings {
            base_url: "https://brasilapi.com.br/api/cnpj/v1".to_string(),
            attempts: 3,
            delay_ms: 3_000,
            request_timeout_ms: 30_000,
            workers: 1,
            strip_digits: DigitStripping::LegalName,
        }
    }
}

impl PassSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl BrowserSettings {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }
}

/// Defaults, then the optional TOML file, then `MERCHANT_*` environment
/// variables (`__` separates sections, e.g. `MERCHANT_LOOKUP__WORKERS=4`).
pub fn load(path: &Path) -> Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read settings from {:?}", path))?;

    settings
        .try_deserialize::<Settings>()
        .context("Invalid settings")
}
