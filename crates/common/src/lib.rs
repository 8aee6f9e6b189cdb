
use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;

/// Logical identifier for a 4 KiB page in the data file.
///
/// Page numbers start at 0 and grow densely; page 0 is always the index root.
/// Examples:
/// - `let root = PageId::ROOT;`
/// - `let leaf = PageId(42);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// The index root. Also doubles as the "no parent / end of chain"
    /// sentinel inside node headers, since no node links back to the root.
    pub const ROOT: PageId = PageId(0);
}

/// Row identifier handed out by the row heap. The index stores and orders
/// rowIds but never interprets them.
pub type RowId = u32;

/// Canonical error type shared across the storage subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A page number beyond the next allocatable page was requested.
    #[error("invalid page number {0}")]
    InvalidPageNumber(u32),
    /// A non-full insert path was invoked on a full node. Split logic bug.
    #[error("node overflow on page {0}")]
    NodeOverflow(u32),
    /// Malformed header, wrong node type at traversal, or a broken
    /// structural invariant. Fatal to the current operation.
    #[error("corrupt: {0}")]
    Corrupt(String),
    /// The page count would overflow the u32 page-number space.
    #[error("page address space exhausted")]
    CapacityExhausted,
    #[error("storage: {0}")]
    Storage(String),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the storage core.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .path(PathBuf::from("./db.pages"))
///     .cache_pages(256)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Path of the page file backing the index.
    pub path: PathBuf,
    /// Number of pages the buffer cache keeps resident (~200 MiB at the
    /// default of 50,000 4 KiB pages).
    #[builder(default = 50_000)]
    pub cache_pages: usize,
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, PageId, RowId};
}
