//! Row-deletion capability consumed by the index.

use common::{DbError, DbResult, RowId};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};

fn bincode_config() -> impl Config {
    config::legacy()
}

/// What the index needs to know about rows: whether one is tombstoned, and
/// how to tombstone it. Any row heap satisfying this works; the index never
/// learns how rows are stored.
pub trait RowStore {
    fn is_row_deleted(&self, row_id: RowId) -> bool;
    fn mark_row_deleted(&mut self, row_id: RowId);
}

/// Reference `RowStore`: a plain set of tombstoned rowIds.
///
/// Callers with a real row heap implement [`RowStore`] on it directly; this
/// set exists for tests and for embedders that track deletion out of band.
/// `save`/`load` snapshot the set to a sidecar file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TombstoneSet {
    deleted: HashSet<RowId>,
}

impl TombstoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }

    pub fn save(&self, path: &Path) -> DbResult<()> {
        let bytes = encode_to_vec(self, bincode_config())
            .map_err(|e| DbError::Storage(format!("encode tombstones failed: {e}")))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: &Path) -> DbResult<Self> {
        let bytes = std::fs::read(path)?;
        let (set, _) = decode_from_slice(&bytes, bincode_config())
            .map_err(|e| DbError::Storage(format!("decode tombstones failed: {e}")))?;
        Ok(set)
    }
}

impl RowStore for TombstoneSet {
    fn is_row_deleted(&self, row_id: RowId) -> bool {
        self.deleted.contains(&row_id)
    }

    fn mark_row_deleted(&mut self, row_id: RowId) {
        self.deleted.insert(row_id);
    }
}
