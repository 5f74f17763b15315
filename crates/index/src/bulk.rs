//! Bottom-up bulk loading: sort once, write every page exactly once.

use heap::RecordId;
use storage::PageId;

use crate::btree::BPlusIndex;
use crate::key::compare_keys;
use crate::pagefmt::{InternalView, LeafView, NO_PAGE};
use crate::{IndexError, IndexResult};

/// Fraction of a leaf's capacity filled by default.
pub const DEFAULT_FILL_FACTOR: f64 = 0.9;

impl BPlusIndex {
    /// Builds the whole tree from `entries` without touching the insertion
    /// primitive. The input need not be sorted; the sort here is stable, so
    /// equal keys keep their arrival order.
    ///
    /// Leaves are packed to `fill_factor` of capacity and chained left to
    /// right; internal levels are built bottom-up, each separator read as
    /// the first key of its right child. The index must still be empty.
    pub fn bulk_load(
        &self,
        mut entries: Vec<(Vec<u8>, RecordId)>,
        fill_factor: f64,
    ) -> IndexResult<()> {
        if self.root_page()?.is_some() {
            return Err(IndexError::Corrupt(
                "bulk load requires an empty index".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&fill_factor) {
            return Err(IndexError::Corrupt(format!(
                "fill factor {} out of range",
                fill_factor
            )));
        }
        for (key, rid) in &entries {
            if key.len() != self.attr_len() {
                return Err(IndexError::KeyLength {
                    got: key.len(),
                    expected: self.attr_len(),
                });
            }
            crate::pagefmt::pack_rid(*rid)?;
        }
        if entries.is_empty() {
            return Ok(());
        }

        let key_type = self.key_type();
        entries.sort_by(|a, b| compare_keys(key_type, &a.0, &b.0));

        let per_leaf = ((self.leaf_capacity() as f64) * fill_factor).floor() as usize;
        let per_leaf = per_leaf.clamp(1, self.leaf_capacity());

        // Leaf level. Each leaf is written with a -1 next link, then patched
        // once its right neighbor's page number is known; the patch lands
        // while the leaf is still resident, so each page still reaches disk
        // exactly once.
        let mut level: Vec<(Vec<u8>, PageId)> = Vec::new();
        let mut previous: Option<PageId> = None;
        for chunk in entries.chunks(per_leaf) {
            let page = self.alloc_page()?;
            let leaf = LeafView {
                next: NO_PAGE,
                entries: chunk.to_vec(),
            };
            self.write_leaf_at(page, &leaf)?;
            if let Some(previous_page) = previous {
                self.set_leaf_next(previous_page, page)?;
            }
            previous = Some(page);
            level.push((chunk[0].0.clone(), page));
        }
        log::debug!("bulk load wrote {} leaves", level.len());

        // Internal levels, bottom-up until a single page remains. Each node
        // takes one left-edge child plus up to capacity separator entries;
        // a node's own smallest key is its left child's smallest key.
        let fanout = self.internal_capacity() + 1;
        while level.len() > 1 {
            let mut next_level = Vec::with_capacity(level.len().div_ceil(fanout));
            for group in level.chunks(fanout) {
                let page = self.alloc_page()?;
                let node = InternalView {
                    left: group[0].1,
                    entries: group[1..]
                        .iter()
                        .map(|(key, child)| (key.clone(), *child))
                        .collect(),
                };
                self.write_internal_at(page, &node)?;
                next_level.push((group[0].0.clone(), page));
            }
            log::debug!("bulk load wrote internal level of {} nodes", next_level.len());
            level = next_level;
        }

        self.set_root(level[0].1)
    }
}
