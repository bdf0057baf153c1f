use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, warn};

use crate::config::{DigitStripping, LookupSettings};

const RATE_LIMITED: u16 = 429;
const UPSTREAM_TIMEOUT: u16 = 524;

/// Registry answer for one CNPJ. Only the fields we store are decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegistryPayload {
    #[serde(rename = "razao_social", default)]
    pub legal_name: Option<String>,
    #[serde(rename = "qsa", default)]
    pub owners: Option<Vec<Partner>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Partner {
    #[serde(rename = "nome_socio", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unreadable response: {0}")]
    Decode(String),
}

impl FetchError {
    fn retryable(&self) -> bool {
        matches!(self, FetchError::Status(RATE_LIMITED | UPSTREAM_TIMEOUT))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FetchError },
    #[error(transparent)]
    Terminal(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// Non-empty, in registry order.
    Found(Vec<String>),
    NoData,
    Failed(LookupError),
}

#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<RegistryPayload, FetchError>;
}

/// BrasilAPI's public CNPJ endpoint.
pub struct BrasilApi {
    client: reqwest::Client,
    base_url: String,
}

impl BrasilApi {
    pub fn new(settings: &LookupSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .user_agent(concat!("merchant_scraper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(BrasilApi {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RegistrySource for BrasilApi {
    async fn fetch(&self, key: &str) -> Result<RegistryPayload, FetchError> {
        let url = format!("{}/{}", self.base_url, key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Wraps a source with the fixed-delay retry policy for 429/524.
pub struct LookupClient<S> {
    source: S,
    attempts: u32,
    delay: Duration,
    strip_digits: DigitStripping,
}

impl<S: RegistrySource> LookupClient<S> {
    pub fn new(source: S, settings: &LookupSettings) -> Self {
        LookupClient {
            source,
            attempts: settings.attempts.max(1),
            delay: Duration::from_millis(settings.delay_ms),
            strip_digits: settings.strip_digits,
        }
    }

    pub async fn lookup(&self, key: &str) -> LookupResult {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.source.fetch(key).await {
                Ok(payload) => return self.names(payload),
                Err(e) => e,
            };

            if !err.retryable() {
                error!("Lookup for {} failed: {}", key, err);
                return LookupResult::Failed(LookupError::Terminal(err));
            }
            if attempt >= self.attempts {
                error!("Lookup for {} still failing after {} attempts: {}", key, attempt, err);
                return LookupResult::Failed(LookupError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            match err {
                FetchError::Status(RATE_LIMITED) => {
                    warn!("429: too many requests for {}, waiting {:?}", key, self.delay)
                }
                _ => warn!(
                    "524: upstream timeout for {}, retrying ({}/{})",
                    key, attempt, self.attempts
                ),
            }
            tokio::time::sleep(self.delay).await;
        }
    }

    fn names(&self, payload: RegistryPayload) -> LookupResult {
        let owners: Vec<String> = payload
            .owners
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.name)
            .map(|n| match self.strip_digits {
                DigitStripping::AllNames => strip_digits(&n),
                DigitStripping::LegalName => n.trim().to_string(),
            })
            .filter(|n| !n.is_empty())
            .collect();
        if !owners.is_empty() {
            return LookupResult::Found(owners);
        }

        match payload.legal_name.as_deref().map(strip_digits) {
            Some(name) if !name.is_empty() => LookupResult::Found(vec![name]),
            _ => LookupResult::NoData,
        }
    }
}

/// Drop every digit, then trim the ends. Inner spacing is kept.
pub fn strip_digits(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_ascii_digit())
        .collect::<String>()
        .trim()
        .to_string()
}
