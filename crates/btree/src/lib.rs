//! Disk-backed B+-tree index over `(key, rowId)` pairs.
//!
//! Nodes live in 4 KiB pages addressed through a [`buffer::Pager`]; page 0 is
//! always the root. All navigation uses the composite `(key, rowId)` order,
//! so duplicate keys are addressable and every insert lands deterministically.
//! Leaves form a singly-linked chain in ascending order, which range scans
//! walk directly.
//!
//! Deletes are logical: the [`RowStore`] collaborator tombstones rows, and
//! the next scan pass over a leaf physically drops the dead cells. Nodes are
//! never merged or freed.


use std::marker::PhantomData;

use buffer::Pager;
use common::{DbError, DbResult, PageId, RowId};
use storage::layout::{self, NodeType, PAGE_SIZE};
use storage::{IndexKey, RowStore};
use tracing::debug;

/// A separator promoted out of a split, waiting to be wired into the parent.
#[derive(Clone, Copy, Debug)]
struct SplitInfo<K> {
    key: K,
    row_id: RowId,
    right_page: PageId,
}

/// Ordered secondary index mapping `(key, rowId)` to rowIds.
///
/// Generic over the key type and the pager, so tests can run the same tree
/// over tiny caches. The tree owns its pager; nothing else may touch the
/// page file while the index is live.
pub struct BTreeIndex<K: IndexKey, P: Pager> {
    pager: P,
    leaf_max: u16,
    internal_max: u16,
    _key: PhantomData<K>,
}

impl<K: IndexKey, P: Pager> BTreeIndex<K, P> {
    /// Initialize a new index: page 0 becomes an empty root leaf.
    pub fn create(mut pager: P) -> DbResult<Self> {
        let page = pager.get_page(PageId::ROOT, true)?;
        layout::init_leaf(page);
        layout::set_is_root(page, true);
        Ok(Self {
            pager,
            leaf_max: layout::leaf_max_cells::<K>(),
            internal_max: layout::internal_max_cells::<K>(),
            _key: PhantomData,
        })
    }

    /// Re-attach to an existing page file. The root is page 0; the header is
    /// validated before any operation runs.
    pub fn open(mut pager: P) -> DbResult<Self> {
        if pager.num_pages() == 0 {
            return Err(DbError::Storage("page file has no root page".into()));
        }
        {
            let page = pager.get_page(PageId::ROOT, false)?;
            if layout::node_type(page).is_none() || !layout::is_root(page) {
                return Err(corrupt(PageId::ROOT, "malformed root header"));
            }
        }
        Ok(Self {
            pager,
            leaf_max: layout::leaf_max_cells::<K>(),
            internal_max: layout::internal_max_cells::<K>(),
            _key: PhantomData,
        })
    }

    /// Override the derived node capacities. Intended for tests that want
    /// small fanouts; must be applied at creation time, before any insert,
    /// and consistently across reopen.
    ///
    /// # Panics
    ///
    /// Panics if either capacity is below 2 or above the derived maximum.
    pub fn with_node_capacity(mut self, leaf_max: u16, internal_max: u16) -> Self {
        assert!(leaf_max >= 2 && leaf_max <= layout::leaf_max_cells::<K>());
        assert!(internal_max >= 2 && internal_max <= layout::internal_max_cells::<K>());
        self.leaf_max = leaf_max;
        self.internal_max = internal_max;
        self
    }

    /// COMMIT: make every mutation since the last flush durable.
    pub fn flush(&mut self) -> DbResult<()> {
        self.pager.flush_all()
    }

    /// Insert one `(key, rowId)` cell. Identical cells are accepted; the
    /// caller is expected to keep rowIds unique.
    pub fn insert(&mut self, key: K, row_id: RowId) -> DbResult<()> {
        let leaf = self.find_leaf(PageId::ROOT, key, row_id)?;
        if let Some(split) = self.leaf_insert(leaf, key, row_id)? {
            let was_root = {
                let page = self.pager.get_page(leaf, false)?;
                layout::is_root(page)
            };
            if was_root {
                self.create_new_root(split)?;
            } else {
                self.insert_into_parent(leaf, split)?;
            }
        }
        Ok(())
    }

    /// Collect the rowIds of all live entries with `low <= key <= high`, in
    /// ascending `(key, rowId)` order.
    ///
    /// The pass doubles as leaf compaction: cells whose rows the store
    /// reports deleted are physically dropped on the way through. This is
    /// the only place tombstones are reclaimed from the index.
    pub fn select_range<S: RowStore>(
        &mut self,
        low: K,
        high: K,
        store: &mut S,
    ) -> DbResult<Vec<RowId>> {
        let mut out = Vec::new();
        if low > high {
            return Ok(out);
        }
        let mut page_no = self.find_leaf(PageId::ROOT, low, 0)?;
        loop {
            let (next, last_key, compacted) = {
                let page = self.pager.get_page(page_no, false)?;
                expect_leaf(page, page_no)?;
                let n = layout::num_cells(page);
                let mut write = 0u16;
                for read in 0..n {
                    let key = layout::leaf_key::<K>(page, read);
                    let row_id = layout::leaf_row_id::<K>(page, read);
                    if store.is_row_deleted(row_id) {
                        continue;
                    }
                    if low <= key && key <= high {
                        out.push(row_id);
                    }
                    if write != read {
                        layout::copy_leaf_cell::<K>(page, read, write);
                    }
                    write += 1;
                }
                let compacted = write != n;
                if compacted {
                    layout::set_num_cells(page, write);
                }
                let last_key = (write > 0).then(|| layout::leaf_key::<K>(page, write - 1));
                (layout::next_leaf(page), last_key, compacted)
            };
            if compacted {
                self.pager.mark_dirty(page_no)?;
            }
            if last_key.is_some_and(|k| k > high) || next == PageId(0) {
                break;
            }
            page_no = next;
        }
        Ok(out)
    }

    /// Tombstone every live entry with `low <= key <= high` and drop its
    /// cell from the leaf. Returns the number of entries removed. Repeating
    /// the call removes nothing further.
    pub fn delete_range<S: RowStore>(&mut self, low: K, high: K, store: &mut S) -> DbResult<u32> {
        let mut removed = 0u32;
        if low > high {
            return Ok(removed);
        }
        let mut page_no = self.find_leaf(PageId::ROOT, low, 0)?;
        loop {
            let (next, last_key, compacted) = {
                let page = self.pager.get_page(page_no, false)?;
                expect_leaf(page, page_no)?;
                let n = layout::num_cells(page);
                let mut write = 0u16;
                for read in 0..n {
                    let key = layout::leaf_key::<K>(page, read);
                    let row_id = layout::leaf_row_id::<K>(page, read);
                    if store.is_row_deleted(row_id) {
                        // stale cell from an earlier tombstone; drop silently
                        continue;
                    }
                    if low <= key && key <= high {
                        store.mark_row_deleted(row_id);
                        removed += 1;
                        continue;
                    }
                    if write != read {
                        layout::copy_leaf_cell::<K>(page, read, write);
                    }
                    write += 1;
                }
                let compacted = write != n;
                if compacted {
                    layout::set_num_cells(page, write);
                }
                let last_key = (write > 0).then(|| layout::leaf_key::<K>(page, write - 1));
                (layout::next_leaf(page), last_key, compacted)
            };
            if compacted {
                self.pager.mark_dirty(page_no)?;
            }
            if last_key.is_some_and(|k| k > high) || next == PageId(0) {
                break;
            }
            page_no = next;
        }
        Ok(removed)
    }

    /// Verify the structural invariants: node typing, sorted cells,
    /// separator bounds, uniform leaf depth, parent pointers, capacity, and
    /// the leaf chain. Intended for tests and debugging; cost is a full
    /// tree walk.
    pub fn check_integrity(&mut self) -> DbResult<()> {
        {
            let page = self.pager.get_page(PageId::ROOT, false)?;
            if !layout::is_root(page) {
                return Err(corrupt(PageId::ROOT, "root page lost its root flag"));
            }
        }
        let mut leaf_depth = None;
        let mut leaves = Vec::new();
        self.check_node(
            PageId::ROOT,
            PageId::ROOT,
            0,
            None,
            None,
            &mut leaf_depth,
            &mut leaves,
        )?;

        // The chain must visit exactly the leaves the tree reaches, in
        // order, with globally ascending cells.
        let mut prev: Option<(K, RowId)> = None;
        for (i, &leaf) in leaves.iter().enumerate() {
            let page = self.pager.get_page(leaf, false)?;
            for idx in 0..layout::num_cells(page) {
                let cell = (layout::leaf_key::<K>(page, idx), layout::leaf_row_id::<K>(page, idx));
                if prev.is_some_and(|p| p >= cell) {
                    return Err(corrupt(leaf, "leaf chain not strictly ascending"));
                }
                prev = Some(cell);
            }
            let next = layout::next_leaf(page);
            let expected = leaves.get(i + 1).copied().unwrap_or(PageId(0));
            if next != expected {
                return Err(corrupt(leaf, "leaf chain does not match tree order"));
            }
        }
        Ok(())
    }

    // ---- Descent ----

    fn find_leaf(&mut self, start: PageId, key: K, row_id: RowId) -> DbResult<PageId> {
        let mut current = start;
        loop {
            let page = self.pager.get_page(current, false)?;
            match layout::node_type(page) {
                Some(NodeType::Leaf) => return Ok(current),
                Some(NodeType::Internal) => {
                    let idx = internal_find_child::<K>(page, key, row_id);
                    current = if idx < layout::num_cells(page) {
                        layout::internal_child::<K>(page, idx)
                    } else {
                        layout::right_child(page)
                    };
                }
                None => return Err(corrupt(current, "unknown node type")),
            }
        }
    }

    // ---- Insertion ----

    fn leaf_insert(&mut self, leaf: PageId, key: K, row_id: RowId) -> DbResult<Option<SplitInfo<K>>> {
        {
            let page = self.pager.get_page(leaf, true)?;
            expect_leaf(page, leaf)?;
            if layout::num_cells(page) < self.leaf_max {
                leaf_insert_non_full::<K>(page, self.leaf_max, key, row_id, leaf)?;
                return Ok(None);
            }
        }
        self.leaf_split_insert(leaf, key, row_id).map(Some)
    }

    /// Split a full leaf, then place the incoming cell on whichever side the
    /// promotion key routes it to.
    fn leaf_split_insert(&mut self, leaf: PageId, key: K, row_id: RowId) -> DbResult<SplitInfo<K>> {
        // Copy the node image out: the pager may recycle the buffer while
        // the right sibling is being built.
        let mut old = [0u8; PAGE_SIZE];
        old.copy_from_slice(self.pager.get_page(leaf, false)?);
        let n = layout::num_cells(&old);
        let split_idx = (self.leaf_max + 1) / 2;

        let right_page = PageId(self.pager.num_pages());
        {
            let page = self.pager.get_page(right_page, true)?;
            layout::init_leaf(page);
            layout::set_parent(page, layout::parent(&old));
            layout::set_next_leaf(page, layout::next_leaf(&old));
            page[layout::leaf_cell_range::<K>(0, n - split_idx)]
                .copy_from_slice(&old[layout::leaf_cell_range::<K>(split_idx, n)]);
            layout::set_num_cells(page, n - split_idx);
        }
        {
            let page = self.pager.get_page(leaf, true)?;
            layout::set_num_cells(page, split_idx);
            layout::set_next_leaf(page, right_page);
        }

        let promo_key = layout::leaf_key::<K>(&old, split_idx);
        let promo_rid = layout::leaf_row_id::<K>(&old, split_idx);
        let target = if (key, row_id) >= (promo_key, promo_rid) {
            right_page
        } else {
            leaf
        };
        {
            let page = self.pager.get_page(target, true)?;
            leaf_insert_non_full::<K>(page, self.leaf_max, key, row_id, target)?;
        }

        debug!(left = leaf.0, right = right_page.0, "split leaf");
        Ok(SplitInfo {
            key: promo_key,
            row_id: promo_rid,
            right_page,
        })
    }

    /// Wire a promoted separator into the parent of `left`, splitting
    /// upwards as far as needed.
    fn insert_into_parent(&mut self, left: PageId, split: SplitInfo<K>) -> DbResult<()> {
        // A parent field of 0 names the root page itself
        let parent = {
            let page = self.pager.get_page(left, false)?;
            layout::parent(page)
        };
        if let Some(promoted) = self.internal_insert(parent, split)? {
            let parent_is_root = {
                let page = self.pager.get_page(parent, false)?;
                layout::is_root(page)
            };
            if parent_is_root {
                self.create_new_root(promoted)
            } else {
                self.insert_into_parent(parent, promoted)
            }
        } else {
            Ok(())
        }
    }

    fn internal_insert(&mut self, node: PageId, split: SplitInfo<K>) -> DbResult<Option<SplitInfo<K>>> {
        {
            let page = self.pager.get_page(node, true)?;
            if layout::node_type(page) != Some(NodeType::Internal) {
                return Err(corrupt(node, "expected internal node"));
            }
            if layout::num_cells(page) < self.internal_max {
                internal_insert_non_full::<K>(page, self.internal_max, split, node)?;
                return Ok(None);
            }
        }
        self.internal_split_insert(node, split).map(Some)
    }

    /// Split a full internal node. The middle cell is promoted: its key and
    /// rowId travel up, its child becomes the left node's new right child.
    fn internal_split_insert(
        &mut self,
        node: PageId,
        pending: SplitInfo<K>,
    ) -> DbResult<SplitInfo<K>> {
        let mut old = [0u8; PAGE_SIZE];
        old.copy_from_slice(self.pager.get_page(node, false)?);
        let n = layout::num_cells(&old);
        let split_idx = self.internal_max / 2;

        let promo_key = layout::internal_key::<K>(&old, split_idx);
        let promo_rid = layout::internal_row_id::<K>(&old, split_idx);
        let promo_child = layout::internal_child::<K>(&old, split_idx);

        let right_page = PageId(self.pager.num_pages());
        {
            let page = self.pager.get_page(right_page, true)?;
            layout::init_internal(page);
            layout::set_parent(page, layout::parent(&old));
            page[layout::internal_cell_range::<K>(0, n - split_idx - 1)]
                .copy_from_slice(&old[layout::internal_cell_range::<K>(split_idx + 1, n)]);
            layout::set_num_cells(page, n - split_idx - 1);
            layout::set_right_child(page, layout::right_child(&old));
        }
        {
            let page = self.pager.get_page(node, true)?;
            layout::set_num_cells(page, split_idx);
            layout::set_right_child(page, promo_child);
        }

        let target = if (pending.key, pending.row_id) < (promo_key, promo_rid) {
            node
        } else {
            right_page
        };
        {
            let page = self.pager.get_page(target, true)?;
            internal_insert_non_full::<K>(page, self.internal_max, pending, target)?;
        }
        self.update_child_parents(right_page)?;

        debug!(left = node.0, right = right_page.0, "split internal node");
        Ok(SplitInfo {
            key: promo_key,
            row_id: promo_rid,
            right_page,
        })
    }

    /// The root split: the old root's image moves to a fresh page and page 0
    /// is rebuilt as an internal node over the two halves, so the root page
    /// number never changes.
    fn create_new_root(&mut self, split: SplitInfo<K>) -> DbResult<()> {
        let mut old_root = [0u8; PAGE_SIZE];
        old_root.copy_from_slice(self.pager.get_page(PageId::ROOT, false)?);

        let left_page = PageId(self.pager.num_pages());
        {
            let page = self.pager.get_page(left_page, true)?;
            page.copy_from_slice(&old_root);
            layout::set_is_root(page, false);
            layout::set_parent(page, PageId::ROOT);
        }
        {
            let page = self.pager.get_page(split.right_page, true)?;
            layout::set_parent(page, PageId::ROOT);
        }
        {
            let page = self.pager.get_page(PageId::ROOT, true)?;
            layout::init_internal(page);
            layout::set_is_root(page, true);
            layout::set_num_cells(page, 1);
            layout::set_internal_cell::<K>(page, 0, split.key, split.row_id, left_page);
            layout::set_right_child(page, split.right_page);
        }
        // Children of a relocated internal node still point at page 0
        if layout::node_type(&old_root) == Some(NodeType::Internal) {
            self.update_child_parents(left_page)?;
            self.update_child_parents(split.right_page)?;
        }
        debug!(left = left_page.0, right = split.right_page.0, "promoted new root");
        Ok(())
    }

    /// Point every child of `node` back at it. Needed after cells move to a
    /// freshly split sibling or a relocated root.
    fn update_child_parents(&mut self, node: PageId) -> DbResult<()> {
        let children = {
            let page = self.pager.get_page(node, false)?;
            let n = layout::num_cells(page);
            let mut children = Vec::with_capacity(n as usize + 1);
            for idx in 0..n {
                children.push(layout::internal_child::<K>(page, idx));
            }
            children.push(layout::right_child(page));
            children
        };
        for child in children {
            let page = self.pager.get_page(child, true)?;
            layout::set_parent(page, node);
        }
        Ok(())
    }

    // ---- Integrity walk ----

    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &mut self,
        page_no: PageId,
        expected_parent: PageId,
        depth: usize,
        lower: Option<(K, RowId)>,
        upper: Option<(K, RowId)>,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<PageId>,
    ) -> DbResult<()> {
        let mut node = [0u8; PAGE_SIZE];
        node.copy_from_slice(self.pager.get_page(page_no, false)?);

        if layout::parent(&node) != expected_parent {
            return Err(corrupt(page_no, "parent pointer does not match tree shape"));
        }
        if layout::is_root(&node) != (depth == 0) {
            return Err(corrupt(page_no, "root flag on non-root node"));
        }

        let n = layout::num_cells(&node);
        match layout::node_type(&node) {
            Some(NodeType::Leaf) => {
                if n > self.leaf_max {
                    return Err(corrupt(page_no, "leaf exceeds capacity"));
                }
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Err(corrupt(page_no, "leaves at unequal depth"))
                    }
                    _ => {}
                }
                let mut prev = lower;
                for idx in 0..n {
                    let cell = (
                        layout::leaf_key::<K>(&node, idx),
                        layout::leaf_row_id::<K>(&node, idx),
                    );
                    // lower bound is inclusive only for the very first cell
                    if idx == 0 && prev.is_some_and(|p| cell < p) {
                        return Err(corrupt(page_no, "cell below subtree lower bound"));
                    }
                    if idx > 0 && prev.is_some_and(|p| cell <= p) {
                        return Err(corrupt(page_no, "leaf cells not strictly ascending"));
                    }
                    if upper.is_some_and(|u| cell >= u) {
                        return Err(corrupt(page_no, "cell above subtree upper bound"));
                    }
                    prev = Some(cell);
                }
                leaves.push(page_no);
                Ok(())
            }
            Some(NodeType::Internal) => {
                if n > self.internal_max {
                    return Err(corrupt(page_no, "internal node exceeds capacity"));
                }
                let mut child_lower = lower;
                for idx in 0..n {
                    let sep = (
                        layout::internal_key::<K>(&node, idx),
                        layout::internal_row_id::<K>(&node, idx),
                    );
                    if child_lower.is_some_and(|p| sep < p) {
                        return Err(corrupt(page_no, "separators not ascending"));
                    }
                    if upper.is_some_and(|u| sep >= u) {
                        return Err(corrupt(page_no, "separator above upper bound"));
                    }
                    let child = layout::internal_child::<K>(&node, idx);
                    self.check_node(
                        child,
                        page_no,
                        depth + 1,
                        child_lower,
                        Some(sep),
                        leaf_depth,
                        leaves,
                    )?;
                    child_lower = Some(sep);
                }
                self.check_node(
                    layout::right_child(&node),
                    page_no,
                    depth + 1,
                    child_lower,
                    upper,
                    leaf_depth,
                    leaves,
                )
            }
            None => Err(corrupt(page_no, "unknown node type")),
        }
    }
}

// ---- Page-local helpers ----

fn corrupt(page: PageId, reason: &str) -> DbError {
    DbError::Corrupt(format!("page {}: {reason}", page.0))
}

fn expect_leaf(page: &[u8], page_no: PageId) -> DbResult<()> {
    if layout::node_type(page) != Some(NodeType::Leaf) {
        return Err(corrupt(page_no, "expected leaf node"));
    }
    Ok(())
}

/// First leaf slot whose cell is strictly greater than `(key, row_id)`.
fn leaf_find_slot<K: IndexKey>(page: &[u8], key: K, row_id: RowId) -> u16 {
    let (mut lo, mut hi) = (0u16, layout::num_cells(page));
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let probe = (layout::leaf_key::<K>(page, mid), layout::leaf_row_id::<K>(page, mid));
        if probe <= (key, row_id) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// First internal cell strictly greater than `(key, row_id)`; equal to
/// `numCells` when the target routes to the right child.
fn internal_find_child<K: IndexKey>(page: &[u8], key: K, row_id: RowId) -> u16 {
    let (mut lo, mut hi) = (0u16, layout::num_cells(page));
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let probe = (
            layout::internal_key::<K>(page, mid),
            layout::internal_row_id::<K>(page, mid),
        );
        if probe <= (key, row_id) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn leaf_insert_non_full<K: IndexKey>(
    page: &mut [u8],
    leaf_max: u16,
    key: K,
    row_id: RowId,
    page_no: PageId,
) -> DbResult<()> {
    let n = layout::num_cells(page);
    if n >= leaf_max {
        return Err(DbError::NodeOverflow(page_no.0));
    }
    let slot = leaf_find_slot::<K>(page, key, row_id);
    layout::leaf_shift_right::<K>(page, slot, n);
    layout::set_leaf_cell::<K>(page, slot, key, row_id);
    layout::set_num_cells(page, n + 1);
    Ok(())
}

/// Insert a promoted separator whose right side is `split.right_page`.
///
/// Appending at the tail hands the old right child to the new cell and makes
/// the split page the right child. Anywhere else, the shifted copy at the
/// insertion slot still carries the left sibling's child pointer, so only the
/// separator bytes are rewritten there and the following cell takes the split
/// page.
fn internal_insert_non_full<K: IndexKey>(
    page: &mut [u8],
    internal_max: u16,
    split: SplitInfo<K>,
    page_no: PageId,
) -> DbResult<()> {
    let n = layout::num_cells(page);
    if n >= internal_max {
        return Err(DbError::NodeOverflow(page_no.0));
    }
    let slot = internal_find_child::<K>(page, split.key, split.row_id);
    layout::internal_shift_right::<K>(page, slot, n);
    if slot == n {
        let old_right = layout::right_child(page);
        layout::set_internal_cell::<K>(page, slot, split.key, split.row_id, old_right);
        layout::set_right_child(page, split.right_page);
    } else {
        layout::set_internal_separator::<K>(page, slot, split.key, split.row_id);
        layout::set_internal_child::<K>(page, slot + 1, split.right_page);
    }
    layout::set_num_cells(page, n + 1);
    Ok(())
}
