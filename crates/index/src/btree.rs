use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use heap::RecordId;
use storage::{BufferPool, FileId, PageId};

use crate::key::{KeyType, compare_keys};
use crate::pagefmt::{self, InternalView, LeafView, NO_PAGE, Node};
use crate::{IndexError, IndexResult};

/// Data page holding the index metadata.
const META_PAGE: PageId = 0;

fn index_path(name: &Path, index_no: u32) -> PathBuf {
    PathBuf::from(format!("{}.{}", name.display(), index_no))
}

/// A B+ tree over fixed-width keys, stored in its own paged file and driven
/// entirely through the buffer pool. Page 0 carries the metadata; leaves are
/// chained left to right.
pub struct BPlusIndex {
    pool: BufferPool,
    file: FileId,
    path: PathBuf,
    key_type: KeyType,
    attr_len: usize,
}

impl BPlusIndex {
    /// Creates the index file `{name}.{index_no}` with an empty tree.
    pub fn create<P: AsRef<Path>>(
        pool: &BufferPool,
        name: P,
        index_no: u32,
        key_type: KeyType,
        key_len: usize,
    ) -> IndexResult<Self> {
        key_type.validate_len(key_len)?;
        let path = index_path(name.as_ref(), index_no);
        pool.create_file(&path)?;
        let file = pool.open_file(&path)?;
        let (meta, mut guard) = pool.allocate_page(file)?;
        pagefmt::init_meta(guard.data_mut(), key_type, key_len);
        drop(guard);
        pool.unpin_page(file, meta, true)?;
        Ok(Self {
            pool: pool.clone(),
            file,
            path,
            key_type,
            attr_len: key_len,
        })
    }

    /// Opens an existing index file and reads its metadata.
    pub fn open<P: AsRef<Path>>(pool: &BufferPool, name: P, index_no: u32) -> IndexResult<Self> {
        let path = index_path(name.as_ref(), index_no);
        let file = pool.open_file(&path)?;
        let meta = {
            let guard = pool.fetch_page(file, META_PAGE)?;
            pagefmt::read_meta(guard.data())
        };
        pool.unpin_page(file, META_PAGE, false)?;
        let (key_type, attr_len, _) = meta?;
        Ok(Self {
            pool: pool.clone(),
            file,
            path,
            key_type,
            attr_len,
        })
    }

    /// Flushes and closes the index file.
    pub fn close(self) -> IndexResult<()> {
        self.pool.close_file(self.file)?;
        Ok(())
    }

    /// Removes the index file `{name}.{index_no}` from disk.
    pub fn destroy<P: AsRef<Path>>(pool: &BufferPool, name: P, index_no: u32) -> IndexResult<()> {
        pool.destroy_file(index_path(name.as_ref(), index_no))?;
        Ok(())
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn attr_len(&self) -> usize {
        self.attr_len
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Entries a leaf of this index can hold.
    pub fn leaf_capacity(&self) -> usize {
        pagefmt::leaf_capacity(self.attr_len)
    }

    /// Separator entries an internal node of this index can hold.
    pub fn internal_capacity(&self) -> usize {
        pagefmt::internal_capacity(self.attr_len)
    }

    /// Current root page, `None` while the tree is empty.
    pub fn root_page(&self) -> IndexResult<Option<PageId>> {
        let meta = {
            let guard = self.pool.fetch_page(self.file, META_PAGE)?;
            pagefmt::read_meta(guard.data())
        };
        self.pool.unpin_page(self.file, META_PAGE, false)?;
        Ok(meta?.2)
    }

    pub(crate) fn set_root(&self, root: PageId) -> IndexResult<()> {
        let updated = {
            let mut guard = self.pool.fetch_page(self.file, META_PAGE)?;
            pagefmt::set_meta_root(guard.data_mut(), root)
        };
        self.pool.unpin_page(self.file, META_PAGE, updated.is_ok())?;
        updated
    }

    fn check_key(&self, key: &[u8]) -> IndexResult<()> {
        if key.len() != self.attr_len {
            return Err(IndexError::KeyLength {
                got: key.len(),
                expected: self.attr_len,
            });
        }
        Ok(())
    }

    /// Allocates a fresh index page, leaving it cached, dirty, and unpinned.
    pub(crate) fn alloc_page(&self) -> IndexResult<PageId> {
        let (page, guard) = self.pool.allocate_page(self.file)?;
        drop(guard);
        self.pool.unpin_page(self.file, page, false)?;
        Ok(page)
    }

    fn read_node(&self, page: PageId) -> IndexResult<Node> {
        let node = {
            let guard = self.pool.fetch_page(self.file, page)?;
            pagefmt::read_node(guard.data(), self.attr_len)
        };
        self.pool.unpin_page(self.file, page, false)?;
        node
    }

    /// Decodes one leaf page. Part of the verification surface.
    pub fn read_leaf_at(&self, page: PageId) -> IndexResult<LeafView> {
        let leaf = {
            let guard = self.pool.fetch_page(self.file, page)?;
            pagefmt::read_leaf(guard.data(), self.attr_len)
        };
        self.pool.unpin_page(self.file, page, false)?;
        leaf
    }

    /// Decodes one internal page. Part of the verification surface.
    pub fn read_internal_at(&self, page: PageId) -> IndexResult<InternalView> {
        let internal = {
            let guard = self.pool.fetch_page(self.file, page)?;
            pagefmt::read_internal(guard.data(), self.attr_len)
        };
        self.pool.unpin_page(self.file, page, false)?;
        internal
    }

    pub(crate) fn write_leaf_at(&self, page: PageId, leaf: &LeafView) -> IndexResult<()> {
        let written = {
            let mut guard = self.pool.fetch_page(self.file, page)?;
            pagefmt::write_leaf(guard.data_mut(), self.attr_len, leaf)
        };
        self.pool.unpin_page(self.file, page, written.is_ok())?;
        written
    }

    pub(crate) fn write_internal_at(&self, page: PageId, internal: &InternalView) -> IndexResult<()> {
        let written = {
            let mut guard = self.pool.fetch_page(self.file, page)?;
            pagefmt::write_internal(guard.data_mut(), self.attr_len, internal)
        };
        self.pool.unpin_page(self.file, page, written.is_ok())?;
        written
    }

    pub(crate) fn set_leaf_next(&self, page: PageId, next: PageId) -> IndexResult<()> {
        let patched = {
            let mut guard = self.pool.fetch_page(self.file, page)?;
            pagefmt::set_leaf_next(guard.data_mut(), next as i32)
        };
        self.pool.unpin_page(self.file, page, patched.is_ok())?;
        patched
    }

    /// Child slot to descend into; with `upper` set, equal separators send
    /// the descent right (insert position for duplicates), otherwise left
    /// (first occurrence for probes).
    fn child_index(&self, node: &InternalView, key: &[u8], upper: bool) -> usize {
        node.entries.partition_point(|(separator, _)| {
            match compare_keys(self.key_type, separator, key) {
                Ordering::Less => true,
                Ordering::Equal => upper,
                Ordering::Greater => false,
            }
        })
    }

    fn child_at(node: &InternalView, index: usize) -> PageId {
        if index == 0 {
            node.left
        } else {
            node.entries[index - 1].1
        }
    }

    /// Inserts one (key, rid) pair, splitting nodes as needed. Navigation
    /// starts at the root; the descent path stands in for parent pointers,
    /// which the page format does not store.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> IndexResult<()> {
        self.check_key(key)?;
        pagefmt::pack_rid(rid)?;

        let Some(root) = self.root_page()? else {
            let page = self.alloc_page()?;
            let leaf = LeafView {
                next: NO_PAGE,
                entries: vec![(key.to_vec(), rid)],
            };
            self.write_leaf_at(page, &leaf)?;
            return self.set_root(page);
        };

        let mut path: Vec<(PageId, usize)> = Vec::new();
        let mut page = root;
        let mut leaf = loop {
            match self.read_node(page)? {
                Node::Internal(node) => {
                    let index = self.child_index(&node, key, true);
                    let child = Self::child_at(&node, index);
                    path.push((page, index));
                    page = child;
                }
                Node::Leaf(leaf) => break leaf,
            }
        };

        let position = leaf.entries.partition_point(|(existing, _)| {
            compare_keys(self.key_type, existing, key) != Ordering::Greater
        });
        leaf.entries.insert(position, (key.to_vec(), rid));

        if leaf.entries.len() <= self.leaf_capacity() {
            return self.write_leaf_at(page, &leaf);
        }

        let split = leaf.entries.len() / 2;
        let right_entries = leaf.entries.split_off(split);
        let separator = right_entries[0].0.clone();
        let right_page = self.alloc_page()?;
        let right = LeafView {
            next: leaf.next,
            entries: right_entries,
        };
        leaf.next = right_page as i32;
        self.write_leaf_at(page, &leaf)?;
        self.write_leaf_at(right_page, &right)?;
        self.insert_into_parent(path, page, separator, right_page)
    }

    /// Propagates a split up the recorded descent path, growing a new root
    /// when the old one splits.
    fn insert_into_parent(
        &self,
        mut path: Vec<(PageId, usize)>,
        mut left: PageId,
        mut separator: Vec<u8>,
        mut right: PageId,
    ) -> IndexResult<()> {
        loop {
            let Some((parent, child_index)) = path.pop() else {
                let root = self.alloc_page()?;
                let node = InternalView {
                    left,
                    entries: vec![(separator, right)],
                };
                self.write_internal_at(root, &node)?;
                log::debug!("index grew a new root at page {}", root);
                return self.set_root(root);
            };

            let mut node = self.read_internal_at(parent)?;
            node.entries.insert(child_index, (separator, right));
            if node.entries.len() <= self.internal_capacity() {
                return self.write_internal_at(parent, &node);
            }

            let mid = node.entries.len() / 2;
            let mut right_entries = node.entries.split_off(mid);
            let (promoted, promoted_child) = right_entries.remove(0);
            let right_node = InternalView {
                left: promoted_child,
                entries: right_entries,
            };
            let right_page = self.alloc_page()?;
            self.write_internal_at(parent, &node)?;
            self.write_internal_at(right_page, &right_node)?;

            left = parent;
            separator = promoted;
            right = right_page;
        }
    }

    /// Every record id stored under `key`, walking right across leaves while
    /// equal keys continue.
    pub fn probe(&self, key: &[u8]) -> IndexResult<Vec<RecordId>> {
        self.check_key(key)?;
        let Some(mut page) = self.root_page()? else {
            return Ok(Vec::new());
        };
        let mut leaf = loop {
            match self.read_node(page)? {
                Node::Internal(node) => {
                    let index = self.child_index(&node, key, false);
                    page = Self::child_at(&node, index);
                }
                Node::Leaf(leaf) => break leaf,
            }
        };

        let mut matches = Vec::new();
        loop {
            for (existing, rid) in &leaf.entries {
                match compare_keys(self.key_type, existing, key) {
                    Ordering::Less => {}
                    Ordering::Equal => matches.push(*rid),
                    Ordering::Greater => return Ok(matches),
                }
            }
            if leaf.next == NO_PAGE {
                return Ok(matches);
            }
            leaf = self.read_leaf_at(leaf.next as PageId)?;
        }
    }

    /// First leaf page of the chain, `None` while the tree is empty.
    pub fn first_leaf(&self) -> IndexResult<Option<PageId>> {
        let Some(mut page) = self.root_page()? else {
            return Ok(None);
        };
        loop {
            match self.read_node(page)? {
                Node::Internal(node) => page = node.left,
                Node::Leaf(_) => return Ok(Some(page)),
            }
        }
    }

    /// Every (key, rid) pair in key order, by walking the leaf chain.
    pub fn leaf_scan(&self) -> IndexResult<Vec<(Vec<u8>, RecordId)>> {
        let mut output = Vec::new();
        let Some(first) = self.first_leaf()? else {
            return Ok(output);
        };
        let mut page = first as i32;
        while page != NO_PAGE {
            let leaf = self.read_leaf_at(page as PageId)?;
            output.extend(leaf.entries);
            page = leaf.next;
        }
        Ok(output)
    }

    /// Number of levels from root to leaf, 0 for an empty tree.
    pub fn height(&self) -> IndexResult<usize> {
        let Some(mut page) = self.root_page()? else {
            return Ok(0);
        };
        let mut height = 1;
        loop {
            match self.read_node(page)? {
                Node::Internal(node) => {
                    page = node.left;
                    height += 1;
                }
                Node::Leaf(_) => return Ok(height),
            }
        }
    }
}
