use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tracing::info;

use crate::schedule::{Schedule, Weekday};

/// Upper bound of ownership slots kept per merchant.
pub const MAX_OWNERS: usize = 10;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS merchants (
            id          INTEGER PRIMARY KEY,
            name        TEXT NOT NULL,
            name_key    TEXT NOT NULL UNIQUE,
            url         TEXT,
            registry_id TEXT,
            seg         TEXT,
            ter         TEXT,
            qua         TEXT,
            qui         TEXT,
            sex         TEXT,
            sab         TEXT,
            dom         TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_merchants_registry ON merchants(registry_id);
        ",
    )?;
    let added = ensure_owner_columns(conn, MAX_OWNERS)?;
    if added > 0 {
        info!("Added {} owner columns to merchants", added);
    }
    Ok(())
}

/// Widen `merchants` with any missing `owner1..ownerN` column. Safe to rerun.
pub fn ensure_owner_columns(conn: &Connection, slots: usize) -> Result<usize> {
    let existing: HashSet<String> = {
        let mut stmt = conn.prepare("PRAGMA table_info(merchants)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        names
    };

    let mut added = 0;
    for column in owner_columns(slots) {
        if !existing.contains(&column) {
            conn.execute(&format!("ALTER TABLE merchants ADD COLUMN {} TEXT", column), [])?;
            added += 1;
        }
    }
    Ok(added)
}

fn owner_columns(slots: usize) -> impl Iterator<Item = String> {
    (1..=slots).map(|i| format!("owner{}", i))
}

fn all_null(columns: impl Iterator<Item = String>) -> String {
    columns
        .map(|c| format!("{} IS NULL", c))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn schedule_unset() -> String {
    all_null(Weekday::ALL.iter().map(|d| d.column().to_string()))
}

fn owners_unset() -> String {
    all_null(owner_columns(MAX_OWNERS))
}

fn limit_clause(limit: Option<usize>) -> String {
    match limit {
        Some(n) => format!(" LIMIT {}", n),
        None => String::new(),
    }
}

// ── Listing ──

/// Every stored display name, as written. Callers normalise.
pub fn fetch_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM merchants")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns false when the key already exists in the store.
pub fn insert_merchant(conn: &Connection, name: &str, name_key: &str, url: &str) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO merchants (name, name_key, url) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, name_key, url],
    )?;
    Ok(changed > 0)
}

// ── Enrichment targets ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPage {
    pub id: i64,
    pub url: String,
}

impl std::fmt::Display for PendingPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "merchant {} ({})", self.id, self.url)
    }
}

pub fn fetch_missing_registry(conn: &Connection, limit: Option<usize>) -> Result<Vec<PendingPage>> {
    let sql = format!(
        "SELECT id, url FROM merchants
         WHERE registry_id IS NULL AND url IS NOT NULL
         ORDER BY id{}",
        limit_clause(limit)
    );
    fetch_pending_pages(conn, &sql)
}

pub fn fetch_missing_schedule(conn: &Connection, limit: Option<usize>) -> Result<Vec<PendingPage>> {
    let sql = format!(
        "SELECT id, url FROM merchants
         WHERE {} AND url IS NOT NULL
         ORDER BY id{}",
        schedule_unset(),
        limit_clause(limit)
    );
    fetch_pending_pages(conn, &sql)
}

fn fetch_pending_pages(conn: &Connection, sql: &str) -> Result<Vec<PendingPage>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PendingPage {
                id: row.get(0)?,
                url: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Distinct registry ids whose owner slots are all still empty.
pub fn fetch_missing_owners(conn: &Connection, limit: Option<usize>) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT registry_id FROM merchants
         WHERE registry_id IS NOT NULL AND {}
         GROUP BY registry_id
         ORDER BY MIN(id){}",
        owners_unset(),
        limit_clause(limit)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Enrichment writes ──
//
// Each update repeats its selection predicate, so a second run over the same
// rows changes nothing.

pub fn set_registry_id(conn: &Connection, id: i64, registry_id: &str) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE merchants SET registry_id = ?1, updated_at = datetime('now')
         WHERE id = ?2 AND registry_id IS NULL",
        rusqlite::params![registry_id, id],
    )?;
    Ok(changed)
}

/// Writes up to `MAX_OWNERS` names in one statement; extra names are dropped.
pub fn set_owners(conn: &Connection, registry_id: &str, names: &[String]) -> Result<usize> {
    let names = &names[..names.len().min(MAX_OWNERS)];
    if names.is_empty() {
        return Ok(0);
    }
    let sets = names
        .iter()
        .enumerate()
        .map(|(i, _)| format!("owner{} = ?{}", i + 1, i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE merchants SET {}, updated_at = datetime('now')
         WHERE registry_id = ?1 AND {}",
        sets,
        owners_unset()
    );

    let values = std::iter::once(registry_id).chain(names.iter().map(String::as_str));
    let changed = conn.execute(&sql, params_from_iter(values))?;
    Ok(changed)
}

pub fn set_schedule(conn: &Connection, id: i64, schedule: &Schedule) -> Result<usize> {
    let sql = format!(
        "UPDATE merchants SET seg = ?1, ter = ?2, qua = ?3, qui = ?4, sex = ?5, sab = ?6, dom = ?7,
                updated_at = datetime('now')
         WHERE id = ?8 AND {}",
        schedule_unset()
    );
    let [seg, ter, qua, qui, sex, sab, dom] = schedule.slots();
    let changed = conn.execute(
        &sql,
        rusqlite::params![seg, ter, qua, qui, sex, sab, dom, id],
    )?;
    Ok(changed)
}

// ── Records ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantRow {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
    pub registry_id: Option<String>,
    pub owners: [Option<String>; MAX_OWNERS],
    pub schedule: Schedule,
}

impl MerchantRow {
    pub fn owner_names(&self) -> Vec<&str> {
        self.owners.iter().flatten().map(String::as_str).collect()
    }
}

pub fn fetch_by_key(conn: &Connection, name_key: &str) -> Result<Option<MerchantRow>> {
    let owners = owner_columns(MAX_OWNERS).collect::<Vec<_>>().join(", ");
    let days = Weekday::ALL
        .iter()
        .map(|d| d.column())
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT id, name, url, registry_id, {}, {} FROM merchants WHERE name_key = ?1",
        owners, days
    );

    let row = conn
        .query_row(&sql, [name_key], |row| {
            let mut owners: [Option<String>; MAX_OWNERS] = Default::default();
            for (i, slot) in owners.iter_mut().enumerate() {
                *slot = row.get(4 + i)?;
            }
            let mut schedule = Schedule::default();
            for (i, day) in Weekday::ALL.iter().enumerate() {
                if let Some(hours) = row.get::<_, Option<String>>(4 + MAX_OWNERS + i)? {
                    schedule.set(*day, hours);
                }
            }
            Ok(MerchantRow {
                id: row.get(0)?,
                name: row.get(1)?,
                url: row.get(2)?,
                registry_id: row.get(3)?,
                owners,
                schedule,
            })
        })
        .optional()?;
    Ok(row)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub with_registry: usize,
    pub with_owners: usize,
    pub with_schedule: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |filter: &str| -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM merchants{}", filter);
        Ok(conn.query_row(&sql, [], |r| r.get(0))?)
    };
    Ok(Stats {
        total: count("")?,
        with_registry: count(" WHERE registry_id IS NOT NULL")?,
        with_owners: count(&format!(" WHERE NOT ({})", owners_unset()))?,
        with_schedule: count(&format!(" WHERE NOT ({})", schedule_unset()))?,
    })
}

#[cfg(test)]
pub fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}
