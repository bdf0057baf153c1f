use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::db;

/// Identity key of a merchant: trimmed and case-folded display name.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A freshly scraped merchant card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMerchant {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InsertCounts {
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl std::ops::AddAssign for InsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.duplicates += rhs.duplicates;
        self.errors += rhs.errors;
    }
}

/// Keys already in the store, loaded once per run and grown as rows are
/// inserted so duplicates across seed pages are caught too.
pub struct KnownNames {
    keys: HashSet<String>,
}

impl KnownNames {
    pub fn load(conn: &Connection) -> Result<Self> {
        let keys: HashSet<String> = db::fetch_names(conn)?
            .iter()
            .map(|n| normalize_key(n))
            .collect();
        info!("Loaded {} known merchant names", keys.len());
        Ok(KnownNames { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Insert every merchant whose key is new. Store errors are logged per
    /// row and do not stop the batch.
    pub fn insert_new(&mut self, conn: &Connection, merchants: &[NewMerchant]) -> InsertCounts {
        let mut counts = InsertCounts::default();
        for m in merchants {
            let key = normalize_key(&m.name);
            if self.keys.contains(&key) {
                info!("Skipped (duplicate): {}", m.name);
                counts.duplicates += 1;
                continue;
            }

            match db::insert_merchant(conn, m.name.trim(), &key, &m.url) {
                Ok(true) => {
                    info!("Saved: {}", m.name);
                    counts.inserted += 1;
                    self.keys.insert(key);
                }
                Ok(false) => {
                    warn!("Skipped (already stored): {}", m.name);
                    counts.duplicates += 1;
                    self.keys.insert(key);
                }
                Err(e) => {
                    error!("Failed to save {}: {:#}", m.name, e);
                    counts.errors += 1;
                }
            }
        }
        counts
    }
}
