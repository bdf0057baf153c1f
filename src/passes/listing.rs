use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{error, info, warn};
use url::Url;

use crate::browser::{Browser, WaitPolicy};
use crate::config::Settings;
use crate::dedup::{InsertCounts, KnownNames, NewMerchant};
use crate::extract::NOT_FOUND;
use crate::paginate::{self, PaginationPolicy};
use crate::selectors::{LOAD_MORE, MERCHANT_CARD, MERCHANT_CARDS};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingSummary {
    pub pages: usize,
    pub failed_pages: usize,
    pub truncated_pages: usize,
    pub found: usize,
    pub unnamed: usize,
    pub counts: InsertCounts,
}

impl ListingSummary {
    pub fn print(&self) {
        println!(
            "Listing: {} pages ({} failed, {} truncated), {} merchants found, {} saved, {} duplicates, {} unnamed, {} errors.",
            self.pages,
            self.failed_pages,
            self.truncated_pages,
            self.found,
            self.counts.inserted,
            self.counts.duplicates,
            self.unnamed,
            self.counts.errors,
        );
    }
}

struct PageScrape {
    merchants: Vec<NewMerchant>,
    unnamed: usize,
    truncated: bool,
}

/// Scrape every seed page in order, saving new merchants as each page
/// completes. A failing page is logged and the next one is tried.
pub async fn run<B: Browser + ?Sized>(
    browser: &mut B,
    conn: &Connection,
    seeds: &[String],
    settings: &Settings,
) -> Result<ListingSummary> {
    let base = Url::parse(&settings.storefront.base_url)
        .with_context(|| format!("Invalid storefront base URL {:?}", settings.storefront.base_url))?;
    let policy = PaginationPolicy::from(&settings.pagination);
    let mut known = KnownNames::load(conn)?;
    let mut summary = ListingSummary::default();

    for url in seeds {
        summary.pages += 1;
        info!("Visiting: {}", url);
        let page = match scrape_page(browser, url, &base, &policy).await {
            Ok(page) => page,
            Err(e) => {
                error!("Failed to process {}: {:#}", url, e);
                summary.failed_pages += 1;
                continue;
            }
        };

        info!("Found {} merchants on {}", page.merchants.len(), url);
        summary.found += page.merchants.len() + page.unnamed;
        summary.unnamed += page.unnamed;
        summary.truncated_pages += usize::from(page.truncated);
        summary.counts += known.insert_new(conn, &page.merchants);
    }

    info!("{} merchant names known after listing", known.len());
    Ok(summary)
}

async fn scrape_page<B: Browser + ?Sized>(
    browser: &mut B,
    url: &str,
    base: &Url,
    policy: &PaginationPolicy,
) -> Result<PageScrape> {
    browser.navigate(url, WaitPolicy::DocumentComplete).await?;

    let pagination = paginate::expand_all(browser, LOAD_MORE, MERCHANT_CARD, policy).await;
    if let Some(reason) = &pagination.interrupted {
        warn!("Pagination of {} stopped after {} clicks: {}", url, pagination.clicks, reason);
    }

    let html = browser.snapshot().await?;
    let mut merchants = Vec::new();
    let mut unnamed = 0;
    for card in MERCHANT_CARDS.extract(&html) {
        let name = card.get("name");
        if name == NOT_FOUND {
            warn!("Card without a name: {}", card.key);
            unnamed += 1;
            continue;
        }
        match base.join(&card.key) {
            Ok(link) => merchants.push(NewMerchant {
                name: name.to_string(),
                url: link.to_string(),
            }),
            Err(e) => warn!("Bad merchant link {:?}: {}", card.key, e),
        }
    }

    Ok(PageScrape {
        merchants,
        unnamed,
        truncated: pagination.truncated,
    })
}
