use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::db;
use crate::lookup::{BrasilApi, LookupClient, LookupResult, RegistrySource};
use crate::runner::progress_bar;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OwnersSummary {
    pub selected: usize,
    /// Registry ids that got names written.
    pub updated: usize,
    pub rows: usize,
    pub no_data: usize,
    pub failed: usize,
    /// Answers that could not be written.
    pub errors: usize,
}

impl OwnersSummary {
    pub fn print(&self) {
        println!(
            "Owners: {} registry ids selected, {} updated ({} merchant rows), {} without data, {} failed, {} errors.",
            self.selected, self.updated, self.rows, self.no_data, self.failed, self.errors,
        );
    }
}

pub async fn run_with_brasilapi(
    conn: &Connection,
    settings: &Settings,
    limit: Option<usize>,
) -> Result<OwnersSummary> {
    let keys = db::fetch_missing_owners(conn, limit)?;
    info!("Found {} registry ids without owners", keys.len());
    if keys.is_empty() {
        return Ok(OwnersSummary::default());
    }
    let client = LookupClient::new(BrasilApi::new(&settings.lookup)?, &settings.lookup);
    run(conn, Arc::new(client), keys, settings.lookup.workers).await
}

/// Look up every key, at most `workers` at a time, writing each answer to
/// the store as it arrives. The connection never leaves this task.
pub async fn run<S: RegistrySource + 'static>(
    conn: &Connection,
    client: Arc<LookupClient<S>>,
    keys: Vec<String>,
    workers: usize,
) -> Result<OwnersSummary> {
    let workers = workers.max(1);
    let mut summary = OwnersSummary {
        selected: keys.len(),
        ..Default::default()
    };
    let semaphore = Arc::new(Semaphore::new(workers));
    let (tx, mut rx) = mpsc::channel::<(String, LookupResult)>(workers * 2);

    for key in keys {
        let client = Arc::clone(&client);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = client.lookup(&key).await;
            let _ = tx.send((key, result)).await;
        });
    }
    drop(tx);

    let pb = progress_bar(summary.selected);
    while let Some((key, result)) = rx.recv().await {
        match result {
            LookupResult::Found(names) => match db::set_owners(conn, &key, &names) {
                Ok(0) => warn!("Owners of {} were already set", key),
                Ok(rows) => {
                    info!("Saved {} owners for {} ({} rows)", names.len().min(db::MAX_OWNERS), key, rows);
                    summary.updated += 1;
                    summary.rows += rows;
                }
                Err(e) => {
                    error!("Failed to save owners of {}: {:#}", key, e);
                    summary.errors += 1;
                }
            },
            LookupResult::NoData => {
                warn!("No owner data for {}", key);
                summary.no_data += 1;
            }
            LookupResult::Failed(e) => {
                warn!("Owners of {} left pending: {}", key, e);
                summary.failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(summary)
}
