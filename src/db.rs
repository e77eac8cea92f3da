use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, ToSql};

use crate::decompose::DecomposedPage;
use crate::error::WriteError;
use crate::ledger;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    for table in ENTITY_TABLES {
        conn.execute(&table.create_sql(), [])
            .with_context(|| format!("Failed to create table {}", table.name))?;
    }
    conn.execute_batch(ledger::SCHEMA)
        .context("Failed to create ledger table")?;
    Ok(())
}

// ── Column contract ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Varchar(u16),
    Integer,
}

impl SqlType {
    fn ddl(&self) -> String {
        match self {
            SqlType::Varchar(n) => format!("VARCHAR({})", n),
            SqlType::Integer => "INTEGER".to_string(),
        }
    }
}

const ID: SqlType = SqlType::Varchar(255);
const NAME: SqlType = SqlType::Varchar(255);

/// Fixed projection and types of one entity table. Used for both the DDL
/// and the insert statement so they cannot drift apart.
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [(&'static str, SqlType)],
}

impl TableSpec {
    pub fn create_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {}", name, ty.ddl()))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            cols.join(", ")
        )
    }

    pub fn insert_sql(&self) -> String {
        let cols: Vec<&str> = self.columns.iter().map(|(name, _)| *name).collect();
        let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.name,
            cols.join(", "),
            placeholders.join(", ")
        )
    }
}

pub const PRODUCTS: TableSpec = TableSpec {
    name: "products",
    columns: &[("product_id", ID), ("internal_id", ID), ("product_name", NAME)],
};

pub const INGREDIENTS: TableSpec = TableSpec {
    name: "product_ingredients",
    columns: &[
        ("product_id", ID),
        ("ingredient_id", ID),
        ("ingredient_name", NAME),
    ],
};

pub const ALLERGENS: TableSpec = TableSpec {
    name: "product_allergens",
    columns: &[("product_id", ID), ("allergen_id", ID)],
};

pub const NUTRIENTS: TableSpec = TableSpec {
    name: "product_nutrients",
    columns: &[
        ("product_id", ID),
        ("nutrient_name", NAME),
        ("nutrient_value", SqlType::Varchar(255)),
    ],
};

pub const BRANDS: TableSpec = TableSpec {
    name: "product_brands",
    columns: &[("product_id", ID), ("brand_id", ID)],
};

pub const CATEGORIES: TableSpec = TableSpec {
    name: "product_categories",
    columns: &[("product_id", ID), ("category_id", ID)],
};

/// In write order.
pub const ENTITY_TABLES: [&TableSpec; 6] = [
    &PRODUCTS,
    &INGREDIENTS,
    &ALLERGENS,
    &NUTRIENTS,
    &BRANDS,
    &CATEGORIES,
];

// ── Rows ──

/// A row bound positionally to its table's column list.
pub trait EntityRow {
    const TABLE: &'static TableSpec;

    fn params(&self) -> Vec<&dyn ToSql>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    pub product_id: String,
    pub internal_id: Option<String>,
    pub product_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngredientRow {
    pub product_id: String,
    pub ingredient_id: String,
    pub ingredient_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllergenRow {
    pub product_id: String,
    pub allergen_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NutrientRow {
    pub product_id: String,
    pub nutrient_name: String,
    pub nutrient_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrandRow {
    pub product_id: String,
    pub brand_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRow {
    pub product_id: String,
    pub category_id: String,
}

impl EntityRow for ProductRow {
    const TABLE: &'static TableSpec = &PRODUCTS;

    fn params(&self) -> Vec<&dyn ToSql> {
        vec![&self.product_id, &self.internal_id, &self.product_name]
    }
}

impl EntityRow for IngredientRow {
    const TABLE: &'static TableSpec = &INGREDIENTS;

    fn params(&self) -> Vec<&dyn ToSql> {
        vec![&self.product_id, &self.ingredient_id, &self.ingredient_name]
    }
}

impl EntityRow for AllergenRow {
    const TABLE: &'static TableSpec = &ALLERGENS;

    fn params(&self) -> Vec<&dyn ToSql> {
        vec![&self.product_id, &self.allergen_id]
    }
}

impl EntityRow for NutrientRow {
    const TABLE: &'static TableSpec = &NUTRIENTS;

    fn params(&self) -> Vec<&dyn ToSql> {
        vec![&self.product_id, &self.nutrient_name, &self.nutrient_value]
    }
}

impl EntityRow for BrandRow {
    const TABLE: &'static TableSpec = &BRANDS;

    fn params(&self) -> Vec<&dyn ToSql> {
        vec![&self.product_id, &self.brand_id]
    }
}

impl EntityRow for CategoryRow {
    const TABLE: &'static TableSpec = &CATEGORIES;

    fn params(&self) -> Vec<&dyn ToSql> {
        vec![&self.product_id, &self.category_id]
    }
}

// ── Writing ──

/// Rows appended per entity for one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounts {
    pub products: usize,
    pub ingredients: usize,
    pub allergens: usize,
    pub nutrients: usize,
    pub brands: usize,
    pub categories: usize,
}

impl PageCounts {
    pub fn total(&self) -> usize {
        self.products + self.ingredients + self.allergens + self.nutrients + self.brands
            + self.categories
    }

    pub fn add(&mut self, other: &PageCounts) {
        self.products += other.products;
        self.ingredients += other.ingredients;
        self.allergens += other.allergens;
        self.nutrients += other.nutrients;
        self.brands += other.brands;
        self.categories += other.categories;
    }
}

/// Append every non-empty row set, one transaction per table. Tables
/// written before a failure stay committed.
pub fn write_page(conn: &Connection, page: &DecomposedPage) -> Result<PageCounts, WriteError> {
    Ok(PageCounts {
        products: append(conn, &page.products)?,
        ingredients: append(conn, &page.ingredients)?,
        allergens: append(conn, &page.allergens)?,
        nutrients: append(conn, &page.nutrients)?,
        brands: append(conn, &page.brands)?,
        categories: append(conn, &page.categories)?,
    })
}

/// Plain INSERT of `rows` into the row type's table. Empty input is a no-op.
pub fn append<R: EntityRow>(conn: &Connection, rows: &[R]) -> Result<usize, WriteError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let table = R::TABLE.name;
    let fail = |source: rusqlite::Error| WriteError { table, source };

    let tx = conn.unchecked_transaction().map_err(fail)?;
    {
        let mut stmt = tx.prepare(&R::TABLE.insert_sql()).map_err(fail)?;
        for row in rows {
            stmt.execute(row.params().as_slice()).map_err(fail)?;
        }
    }
    tx.commit().map_err(fail)?;
    Ok(rows.len())
}

// ── Stats ──

pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    ENTITY_TABLES
        .iter()
        .map(|t| -> Result<(&'static str, i64)> {
            let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", t.name), [], |r| {
                r.get(0)
            })?;
            Ok((t.name, n))
        })
        .collect()
}

#[cfg(test)]
pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}

#[cfg(test)]
pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .unwrap()
}
