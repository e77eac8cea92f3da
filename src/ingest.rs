//! Sequential page loop: fetch → decompose → write → ledger.
//!
//! A page either ends up logged as a success or logged as a failure with
//! its cause; no page error ever ends the run. The only fatal errors are
//! failing to size the crawl and failing to write the ledger itself.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::catalog::{page_count, PageSource};
use crate::db::{self, PageCounts};
use crate::decompose;
use crate::error::PageError;
use crate::ledger::PageLedger;

/// Inclusive page window. `end` is capped at the catalog's last page.
#[derive(Debug, Clone, Copy)]
pub struct PageRange {
    pub start: u32,
    pub end: Option<u32>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub run_id: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows: PageCounts,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Run {}: {} pages ({} ok, {} failed).",
            self.run_id, self.attempted, self.succeeded, self.failed
        );
        println!(
            "Saved {} products, {} ingredients, {} allergens, {} nutrients, {} brands, {} categories.",
            self.rows.products,
            self.rows.ingredients,
            self.rows.allergens,
            self.rows.nutrients,
            self.rows.brands,
            self.rows.categories,
        );
    }
}

pub struct Ingestor<'c, S> {
    source: S,
    conn: &'c Connection,
    ledger: PageLedger<'c>,
    page_size: u32,
    progress_every: usize,
    show_progress: bool,
}

impl<'c, S: PageSource> Ingestor<'c, S> {
    pub fn new(source: S, conn: &'c Connection, ledger: PageLedger<'c>, page_size: u32) -> Self {
        Ingestor {
            source,
            conn,
            ledger,
            page_size,
            progress_every: 10,
            show_progress: false,
        }
    }

    pub fn progress_every(mut self, pages: u32) -> Self {
        self.progress_every = pages as usize;
        self
    }

    pub fn show_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    /// Probe page 1 for the catalog's item count and derive the last page.
    pub async fn last_page(&self) -> Result<u32> {
        let probe = self
            .source
            .fetch_page(1)
            .await
            .context("Failed to fetch page 1 to size the crawl")?;
        Ok(page_count(probe.count, self.page_size))
    }

    pub async fn run(&self, range: PageRange) -> Result<RunSummary> {
        let total = self.last_page().await?;
        let last = range.end.map_or(total, |end| end.min(total));
        let start = range.start.max(1);
        info!(
            run_id = self.ledger.run_id(),
            start, last, total, "Starting catalog ingestion"
        );

        let pages: Vec<u32> = (start..=last).collect();
        self.run_pages(&pages).await
    }

    /// Process exactly these pages, in order, with the same failure policy.
    pub async fn run_pages(&self, pages: &[u32]) -> Result<RunSummary> {
        let pb = progress_bar(pages.len(), self.show_progress)?;
        let mut summary = RunSummary {
            run_id: self.ledger.run_id().to_string(),
            ..Default::default()
        };

        for &page in pages {
            match self.process_page(page).await {
                Ok(counts) => {
                    self.ledger.record_success(page, &counts)?;
                    summary.succeeded += 1;
                    summary.rows.add(&counts);
                }
                Err(e) => {
                    warn!(page, kind = e.kind().as_str(), "Page failed: {}", e);
                    self.ledger.record_failure(page, &e)?;
                    summary.failed += 1;
                    pb.set_message(format!("{} failed", summary.failed));
                }
            }
            summary.attempted += 1;
            pb.inc(1);

            if self.progress_every > 0 && summary.attempted % self.progress_every == 0 {
                info!(
                    done = summary.attempted,
                    total = pages.len(),
                    ok = summary.succeeded,
                    failed = summary.failed,
                    "Progress"
                );
            }
        }

        pb.finish_and_clear();
        info!(
            run_id = %summary.run_id,
            attempted = summary.attempted,
            failed = summary.failed,
            "Ingestion finished"
        );
        Ok(summary)
    }

    async fn process_page(&self, page: u32) -> Result<PageCounts, PageError> {
        debug!(page, "fetching");
        let payload = self.source.fetch_page(page).await?;

        debug!(
            page,
            reported_page = payload.page,
            records = payload.products.len(),
            "decomposing"
        );
        let rows = decompose::decompose_page(&payload.products)?;
        if rows.is_empty() {
            debug!(page, "no qualifying products");
        }

        debug!(page, rows = rows.counts().total(), "writing");
        Ok(db::write_page(self.conn, &rows)?)
    }
}

fn progress_bar(len: usize, visible: bool) -> Result<ProgressBar> {
    if !visible {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} pages ({per_sec}, eta {eta}) {msg}")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use serde_json::{json, Value};

    use super::*;
    use crate::catalog::CatalogPage;
    use crate::db::{count, test_conn};
    use crate::error::FetchError;
    use crate::ledger;

    #[derive(Default)]
    struct StubCatalog {
        count: u64,
        pages: HashMap<u32, Vec<Value>>,
        down: HashSet<u32>,
    }

    impl StubCatalog {
        fn with_count(count: u64) -> Self {
            StubCatalog {
                count,
                ..Default::default()
            }
        }

        fn page(mut self, n: u32, products: Vec<Value>) -> Self {
            self.pages.insert(n, products);
            self
        }

        fn down(mut self, n: u32) -> Self {
            self.down.insert(n);
            self
        }
    }

    impl PageSource for StubCatalog {
        async fn fetch_page(&self, page: u32) -> Result<CatalogPage, FetchError> {
            if self.down.contains(&page) {
                return Err(FetchError::Status { status: 503 });
            }
            Ok(CatalogPage {
                count: self.count,
                page: u64::from(page),
                products: self.pages.get(&page).cloned().unwrap_or_default(),
            })
        }
    }

    fn food(id: &str) -> Value {
        json!({
            "id": id, "_id": id, "lang": "en", "product_name": format!("Food {id}"),
            "brands_tags": ["acme"],
            "nutriments": {"salt_100g": 0.1}
        })
    }

    fn ingestor<'c>(conn: &'c Connection, source: StubCatalog) -> Ingestor<'c, StubCatalog> {
        Ingestor::new(source, conn, PageLedger::new(conn, "run-test".into()), 24)
    }

    type LedgerRow = (u32, usize, usize, usize, usize, bool, Option<String>);

    fn ledger_rows(conn: &Connection) -> Vec<LedgerRow> {
        let mut stmt = conn
            .prepare(
                "SELECT page, products, ingredients, allergens, nutrients, error_processing, error_kind
                 FROM logging ORDER BY id",
            )
            .unwrap();
        stmt.query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
    }

    #[tokio::test]
    async fn worked_example_end_to_end() {
        let conn = test_conn();
        let source = StubCatalog::with_count(1).page(
            1,
            vec![json!({
                "id": "0001", "_id": "0001", "lang": "en", "product_name": "Butter",
                "ingredients": [{"id": "i1", "text": "Salt"}],
                "allergens_tags": ["en:milk"],
                "nutriments": {"fat_100g": 1.2, "sugar_100g": 3.4}
            })],
        );

        let summary = ingestor(&conn, source)
            .run(PageRange { start: 1, end: None })
            .await
            .unwrap();

        assert_eq!((summary.attempted, summary.succeeded, summary.failed), (1, 1, 0));
        assert_eq!(ledger_rows(&conn), vec![(1, 1, 1, 1, 2, false, None)]);
        assert_eq!(count(&conn, "products"), 1);
        assert_eq!(count(&conn, "product_ingredients"), 1);
        assert_eq!(count(&conn, "product_allergens"), 1);
        assert_eq!(count(&conn, "product_nutrients"), 2);
        assert_eq!(count(&conn, "product_brands"), 0);
        assert_eq!(count(&conn, "product_categories"), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_logged_and_skipped() {
        let conn = test_conn();
        let source = StubCatalog::with_count(72)
            .page(1, vec![food("a")])
            .page(2, vec![food("b")])
            .page(3, vec![food("c")])
            .down(2);

        let summary = ingestor(&conn, source)
            .run(PageRange { start: 1, end: None })
            .await
            .unwrap();

        assert_eq!((summary.attempted, summary.failed), (3, 1));
        let rows = ledger_rows(&conn);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], (2, 0, 0, 0, 0, true, Some("fetch".into())));
        assert_eq!(count(&conn, "products"), 2);
        let b: i64 = conn
            .query_row("SELECT COUNT(*) FROM product_brands WHERE product_id = 'b'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(b, 0);
    }

    #[tokio::test]
    async fn decompose_failure_writes_nothing_for_that_page() {
        let conn = test_conn();
        let bad = json!({"id": "x", "_id": "x", "lang": "en", "product_name": "X", "allergens_tags": [1, 2]});
        let source = StubCatalog::with_count(48)
            .page(1, vec![food("a"), bad])
            .page(2, vec![food("b")]);

        ingestor(&conn, source)
            .run(PageRange { start: 1, end: None })
            .await
            .unwrap();

        let rows = ledger_rows(&conn);
        assert_eq!(rows[0], (1, 0, 0, 0, 0, true, Some("decompose".into())));
        assert!(!rows[1].5);
        assert_eq!(count(&conn, "products"), 1);
    }

    #[tokio::test]
    async fn write_failure_keeps_partial_rows_but_logs_failure() {
        let conn = test_conn();
        conn.execute_batch("DROP TABLE product_brands").unwrap();
        let source = StubCatalog::with_count(24).page(1, vec![food("a")]);

        let summary = ingestor(&conn, source)
            .run(PageRange { start: 1, end: None })
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(ledger_rows(&conn), vec![(1, 0, 0, 0, 0, true, Some("write".into()))]);
        assert_eq!(count(&conn, "products"), 1);
        assert_eq!(count(&conn, "product_nutrients"), 1);
    }

    #[tokio::test]
    async fn one_ledger_row_per_page_in_range() {
        let conn = test_conn();
        let source = StubCatalog::with_count(24 * 9 + 1).down(4).down(7);

        let summary = ingestor(&conn, source)
            .run(PageRange { start: 3, end: None })
            .await
            .unwrap();

        let pages: Vec<u32> = ledger_rows(&conn).iter().map(|r| r.0).collect();
        assert_eq!(pages, (3..=10).collect::<Vec<_>>());
        assert_eq!(summary.attempted, 8);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test]
    async fn end_page_caps_the_range() {
        let conn = test_conn();
        let source = StubCatalog::with_count(240);

        ingestor(&conn, source)
            .run(PageRange { start: 2, end: Some(4) })
            .await
            .unwrap();
        assert_eq!(count(&conn, "logging"), 3);

        let conn = test_conn();
        ingestor(&conn, StubCatalog::with_count(48))
            .run(PageRange { start: 1, end: Some(50) })
            .await
            .unwrap();
        assert_eq!(count(&conn, "logging"), 2);
    }

    #[tokio::test]
    async fn start_past_last_page_does_nothing() {
        let conn = test_conn();
        let summary = ingestor(&conn, StubCatalog::with_count(24))
            .run(PageRange { start: 5, end: None })
            .await
            .unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(count(&conn, "logging"), 0);
    }

    #[tokio::test]
    async fn rerunning_a_range_duplicates_rows() {
        let conn = test_conn();
        for _ in 0..2 {
            let source = StubCatalog::with_count(24).page(1, vec![food("a"), food("b")]);
            ingestor(&conn, source)
                .run(PageRange { start: 1, end: None })
                .await
                .unwrap();
        }
        assert_eq!(count(&conn, "products"), 4);
        assert_eq!(count(&conn, "product_brands"), 4);
        assert_eq!(count(&conn, "logging"), 2);
    }

    #[tokio::test]
    async fn unsized_crawl_aborts_without_ledger_rows() {
        let conn = test_conn();
        let err = ingestor(&conn, StubCatalog::with_count(100).down(1))
            .run(PageRange { start: 1, end: None })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("page 1"));
        assert_eq!(count(&conn, "logging"), 0);
    }

    #[tokio::test]
    async fn retrying_failed_pages_clears_them() {
        let conn = test_conn();
        let flaky = StubCatalog::with_count(72).down(2).down(3);
        ingestor(&conn, flaky)
            .run(PageRange { start: 1, end: None })
            .await
            .unwrap();
        assert_eq!(ledger::failed_pages(&conn).unwrap(), vec![2, 3]);

        let healed = StubCatalog::with_count(72).page(2, vec![food("b")]).down(3);
        let pages = ledger::failed_pages(&conn).unwrap();
        let summary = ingestor(&conn, healed).run_pages(&pages).await.unwrap();

        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        assert_eq!(ledger::failed_pages(&conn).unwrap(), vec![3]);
        assert_eq!(count(&conn, "logging"), 5);
    }
}
