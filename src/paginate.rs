use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::Browser;
use crate::config::PaginationSettings;

#[derive(Debug, Clone, Copy)]
pub struct PaginationPolicy {
    /// Upper bound on how long one click may take to show new content.
    pub settle: Duration,
    pub poll: Duration,
    pub max_clicks: usize,
}

impl From<&PaginationSettings> for PaginationPolicy {
    fn from(s: &PaginationSettings) -> Self {
        PaginationPolicy {
            settle: Duration::from_millis(s.settle_ms),
            poll: Duration::from_millis(s.poll_ms.max(1)),
            max_clicks: s.max_clicks,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub clicks: usize,
    /// The click cap was reached while the control was still present.
    pub truncated: bool,
    /// Interaction error that ended pagination early.
    pub interrupted: Option<String>,
}

/// Keep clicking `control` until it disappears. Errors end the loop but are
/// reported in the outcome, so the caller still extracts what was loaded.
pub async fn expand_all<B: Browser + ?Sized>(
    browser: &mut B,
    control: &str,
    items: &str,
    policy: &PaginationPolicy,
) -> Pagination {
    let mut outcome = Pagination::default();

    loop {
        match browser.count(control).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                outcome.interrupted = Some(format!("{:#}", e));
                break;
            }
        }

        if outcome.clicks >= policy.max_clicks {
            warn!(
                "Load-more still present after {} clicks, stopping here",
                outcome.clicks
            );
            outcome.truncated = true;
            break;
        }

        let before = match browser.count(items).await {
            Ok(n) => n,
            Err(e) => {
                outcome.interrupted = Some(format!("{:#}", e));
                break;
            }
        };
        info!("Loading more merchants...");
        if let Err(e) = browser.click(control).await {
            warn!("Failed to click load-more: {:#}", e);
            outcome.interrupted = Some(format!("{:#}", e));
            break;
        }
        outcome.clicks += 1;

        settle(browser, control, items, before, policy).await;
    }

    outcome
}

/// Wait until more items render or the control goes away, at most
/// `policy.settle`.
async fn settle<B: Browser + ?Sized>(
    browser: &mut B,
    control: &str,
    items: &str,
    before: usize,
    policy: &PaginationPolicy,
) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < policy.settle {
        tokio::time::sleep(policy.poll).await;
        let grown = matches!(browser.count(items).await, Ok(n) if n > before);
        let gone = matches!(browser.count(control).await, Ok(0));
        if grown || gone {
            return;
        }
    }
    debug!("Settle delay of {:?} elapsed without new items", policy.settle);
}
