//! Per-page audit trail. Append-only; a page attempted twice gets two rows.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

use crate::db::PageCounts;
use crate::error::PageError;

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS logging (
        id               INTEGER PRIMARY KEY,
        run_id           VARCHAR(64) NOT NULL,
        page             INTEGER NOT NULL,
        products         INTEGER NOT NULL,
        allergens        INTEGER NOT NULL,
        ingredients      INTEGER NOT NULL,
        nutrients        INTEGER NOT NULL,
        brands           INTEGER NOT NULL DEFAULT 0,
        categories       INTEGER NOT NULL DEFAULT 0,
        error_processing BOOLEAN NOT NULL,
        error_kind       VARCHAR(32),
        error_message    TEXT,
        logged_at        TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_logging_page ON logging(page);
    CREATE INDEX IF NOT EXISTS idx_logging_run ON logging(run_id);
";

const INSERT: &str = "INSERT INTO logging
     (run_id, page, products, allergens, ingredients, nutrients, brands, categories,
      error_processing, error_kind, error_message, logged_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

pub fn new_run_id() -> String {
    Utc::now().format("run-%Y%m%dT%H%M%S%.3fZ").to_string()
}

pub struct PageLedger<'c> {
    conn: &'c Connection,
    run_id: String,
}

impl<'c> PageLedger<'c> {
    pub fn new(conn: &'c Connection, run_id: String) -> Self {
        PageLedger { conn, run_id }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record_success(&self, page: u32, counts: &PageCounts) -> Result<()> {
        self.conn
            .execute(
                INSERT,
                params![
                    self.run_id,
                    page,
                    counts.products,
                    counts.allergens,
                    counts.ingredients,
                    counts.nutrients,
                    counts.brands,
                    counts.categories,
                    false,
                    None::<&str>,
                    None::<String>,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to log page {}", page))?;
        Ok(())
    }

    /// Failure rows carry zero counts even if some tables were already
    /// appended to before the error.
    pub fn record_failure(&self, page: u32, error: &PageError) -> Result<()> {
        self.conn
            .execute(
                INSERT,
                params![
                    self.run_id,
                    page,
                    0,
                    0,
                    0,
                    0,
                    0,
                    0,
                    true,
                    error.kind().as_str(),
                    error.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to log failure of page {}", page))?;
        Ok(())
    }
}

// ── Read-back ──

/// Highest page that has ever been logged as a success.
pub fn last_completed_page(conn: &Connection) -> Result<Option<u32>> {
    let page: Option<u32> = conn.query_row(
        "SELECT MAX(page) FROM logging WHERE error_processing = 0",
        [],
        |r| r.get(0),
    )?;
    Ok(page)
}

/// Pages whose most recent attempt failed, ascending.
pub fn failed_pages(conn: &Connection) -> Result<Vec<u32>> {
    let mut stmt = conn.prepare(
        "SELECT l.page
         FROM logging l
         WHERE l.error_processing = 1
           AND l.id = (SELECT MAX(id) FROM logging WHERE page = l.page)
         ORDER BY l.page",
    )?;
    let pages = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<u32>, _>>()?;
    Ok(pages)
}

pub struct FailureRow {
    pub run_id: String,
    pub page: u32,
    pub kind: Option<String>,
    pub message: Option<String>,
    pub logged_at: String,
}

pub fn recent_failures(conn: &Connection, limit: usize) -> Result<Vec<FailureRow>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, page, error_kind, error_message, logged_at
         FROM logging
         WHERE error_processing = 1
         ORDER BY id DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(FailureRow {
                run_id: row.get(0)?,
                page: row.get(1)?,
                kind: row.get(2)?,
                message: row.get(3)?,
                logged_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct LedgerSummary {
    pub rows: usize,
    pub runs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending_failures: usize,
    pub last_completed: Option<u32>,
}

pub fn summary(conn: &Connection) -> Result<LedgerSummary> {
    let (rows, runs, succeeded): (usize, usize, usize) = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT run_id),
                COALESCE(SUM(CASE WHEN error_processing = 0 THEN 1 ELSE 0 END), 0)
         FROM logging",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    Ok(LedgerSummary {
        rows,
        runs,
        succeeded,
        failed: rows - succeeded,
        pending_failures: failed_pages(conn)?.len(),
        last_completed: last_completed_page(conn)?,
    })
}
