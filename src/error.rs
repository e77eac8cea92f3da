use thiserror::Error;

/// Failure to obtain a usable page payload from the catalog.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("catalog answered HTTP {status}")]
    Status { status: u16 },
    #[error("malformed page payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A qualifying product record whose optional fields have an unexpected shape.
#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("product #{index} ({product}) has a malformed record: {source}")]
    Shape {
        index: usize,
        product: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("product #{index} ({product}) is missing `{field}`")]
    MissingField {
        index: usize,
        product: String,
        field: &'static str,
    },
}

#[derive(Debug, Error)]
#[error("append to {table} failed: {source}")]
pub struct WriteError {
    pub table: &'static str,
    #[source]
    pub source: rusqlite::Error,
}

/// Everything that can go wrong while processing one page. Caught at the
/// page boundary and recorded in the ledger, never propagated past it.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("decompose: {0}")]
    Decompose(#[from] DecomposeError),
    #[error("write: {0}")]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Fetch,
    Decompose,
    Write,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Decompose => "decompose",
            FailureKind::Write => "write",
        }
    }
}

impl PageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PageError::Fetch(_) => FailureKind::Fetch,
            PageError::Decompose(_) => FailureKind::Decompose,
            PageError::Write(_) => FailureKind::Write,
        }
    }
}
