use std::collections::HashMap;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::disk::{PageId, PagedFile};
use crate::error::{StorageError, StorageResult};
use crate::page::Frame;
use crate::pagedir::PageDirectory;
use crate::replacer::{FrameId, RecencyReplacer, ReplacementPolicy, Replacer};

/// Handle for an open paged file registered with the pool.
pub type FileId = u32;

/// Default number of frames in a pool.
pub const DEFAULT_POOL_SIZE: usize = 20;
/// Fixed capacity of the open-file table.
pub const MAX_OPEN_FILES: usize = 32;

/// Guard that provides access to a pinned page while holding the pool lock.
///
/// Dropping the guard releases the lock but not the pin; callers follow up
/// with `unpin_page` before the next operation that may trigger eviction.
pub struct PageGuard<'a> {
    state: MutexGuard<'a, PoolState>,
    frame_id: FrameId,
}

impl PageGuard<'_> {
    /// Returns the frame id backing this guard.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl Deref for PageGuard<'_> {
    type Target = Frame;

    fn deref(&self) -> &Self::Target {
        &self.state.frames[self.frame_id]
    }
}

impl DerefMut for PageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state.frames[self.frame_id]
    }
}

struct PoolState {
    frames: Vec<Frame>,
    free_list: Vec<FrameId>,
    replacer: RecencyReplacer,
    directory: PageDirectory,
    files: HashMap<FileId, PagedFile>,
    next_file_id: FileId,
}

#[derive(Default)]
struct PoolMetrics {
    logical_reads: AtomicU64,
    logical_writes: AtomicU64,
    physical_reads: AtomicU64,
    physical_writes: AtomicU64,
    buffer_hits: AtomicU64,
    buffer_misses: AtomicU64,
}

/// Snapshot of the pool's I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub logical_reads: u64,
    pub logical_writes: u64,
    pub physical_reads: u64,
    pub physical_writes: u64,
    pub buffer_hits: u64,
    pub buffer_misses: u64,
}

impl BufferStats {
    /// Fraction of logical reads served from the cache.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.buffer_hits + self.buffer_misses;
        if total == 0 {
            0.0
        } else {
            self.buffer_hits as f64 / total as f64
        }
    }
}

/// Buffer pool: a fixed frame table caching pages of the files it has open,
/// with pin/unpin discipline, dirty write-back, and a selectable replacement
/// policy. Cloning the handle shares the pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolState>>,
    metrics: Arc<PoolMetrics>,
}

impl BufferPool {
    /// Creates a pool with a fixed number of frames and an initial policy.
    pub fn new(pool_size: usize, policy: ReplacementPolicy) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        let frames = vec![Frame::new(); pool_size];
        let free_list = (0..pool_size).rev().collect();
        let state = PoolState {
            frames,
            free_list,
            replacer: RecencyReplacer::new(pool_size, policy),
            directory: PageDirectory::new(),
            files: HashMap::new(),
            next_file_id: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
            metrics: Arc::new(PoolMetrics::default()),
        }
    }

    fn lock_state(&self) -> StorageResult<MutexGuard<'_, PoolState>> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Creates a paged file on disk.
    pub fn create_file<P: AsRef<Path>>(&self, path: P) -> StorageResult<()> {
        PagedFile::create(path)
    }

    /// Removes a paged file from disk. Fails if the file is currently open.
    pub fn destroy_file<P: AsRef<Path>>(&self, path: P) -> StorageResult<()> {
        let state = self.lock_state()?;
        if let Ok(canonical) = fs::canonicalize(&path) {
            if state.files.values().any(|pf| pf.path() == canonical) {
                return Err(StorageError::FileAlreadyOpen(
                    canonical.display().to_string(),
                ));
            }
        }
        drop(state);
        PagedFile::destroy(path)
    }

    /// Opens a paged file and registers it, returning its handle.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> StorageResult<FileId> {
        let mut state = self.lock_state()?;
        if state.files.len() >= MAX_OPEN_FILES {
            return Err(StorageError::FileTableFull);
        }
        let canonical = fs::canonicalize(&path)?;
        if state.files.values().any(|pf| pf.path() == canonical) {
            return Err(StorageError::FileAlreadyOpen(
                canonical.display().to_string(),
            ));
        }
        let paged = PagedFile::open(&canonical)?;
        let file = state.next_file_id;
        state.next_file_id += 1;
        state.files.insert(file, paged);
        Ok(file)
    }

    /// Closes a file: refuses while any of its pages is pinned, otherwise
    /// flushes its dirty frames, releases them, and persists the header.
    pub fn close_file(&self, file: FileId) -> StorageResult<()> {
        let mut state = self.lock_state()?;
        if !state.files.contains_key(&file) {
            return Err(StorageError::BadHandle(file));
        }
        for frame in &state.frames {
            if let Some((f, p)) = frame.owner {
                if f == file && frame.pin_count > 0 {
                    return Err(StorageError::PageFixed(p));
                }
            }
        }
        for frame_id in 0..state.frames.len() {
            let Some((f, page)) = state.frames[frame_id].owner else {
                continue;
            };
            if f != file {
                continue;
            }
            if state.frames[frame_id].is_dirty {
                let st = &mut *state;
                let paged = st
                    .files
                    .get_mut(&file)
                    .ok_or(StorageError::BadHandle(file))?;
                paged.write_page(page, st.frames[frame_id].data())?;
                self.metrics.physical_writes.fetch_add(1, Ordering::Relaxed);
            }
            state.directory.remove(file, page)?;
            state.replacer.pin(frame_id);
            state.frames[frame_id].reset();
            state.free_list.push(frame_id);
        }
        let paged = state
            .files
            .remove(&file)
            .ok_or(StorageError::BadHandle(file))?;
        log::debug!("closing file handle {}", file);
        paged.close()
    }

    /// Number of data pages in an open file.
    pub fn file_page_count(&self, file: FileId) -> StorageResult<u32> {
        let state = self.lock_state()?;
        let paged = state.files.get(&file).ok_or(StorageError::BadHandle(file))?;
        Ok(paged.num_pages())
    }

    /// Takes a frame for reuse: free list first, then a policy victim with
    /// dirty write-back. Fails with `NoBuffer` when every frame is pinned.
    fn take_frame(state: &mut PoolState, metrics: &PoolMetrics) -> StorageResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }
        let victim = state.replacer.victim().ok_or(StorageError::NoBuffer)?;
        if let Some((vfile, vpage)) = state.frames[victim].owner {
            if state.frames[victim].is_dirty {
                let paged = state
                    .files
                    .get_mut(&vfile)
                    .ok_or(StorageError::BadHandle(vfile))?;
                paged.write_page(vpage, state.frames[victim].data())?;
                metrics.physical_writes.fetch_add(1, Ordering::Relaxed);
                log::debug!("wrote back dirty victim {}:{}", vfile, vpage);
            }
            state.directory.remove(vfile, vpage)?;
        }
        state.frames[victim].reset();
        Ok(victim)
    }

    /// Allocates a fresh page in the file and pins it, zero-filled and
    /// dirty-from-birth so the deferred write reaches disk on eviction,
    /// flush, or close.
    pub fn allocate_page(&self, file: FileId) -> StorageResult<(PageId, PageGuard<'_>)> {
        let mut state = self.lock_state()?;
        if !state.files.contains_key(&file) {
            return Err(StorageError::BadHandle(file));
        }
        let frame_id = Self::take_frame(&mut state, &self.metrics)?;
        let page = {
            let paged = state
                .files
                .get_mut(&file)
                .ok_or(StorageError::BadHandle(file))?;
            match paged.allocate_page() {
                Ok(page) => page,
                Err(err) => {
                    state.free_list.push(frame_id);
                    return Err(err);
                }
            }
        };
        let frame = &mut state.frames[frame_id];
        frame.owner = Some((file, page));
        frame.is_dirty = true;
        frame.pin_count = 1;
        state.directory.insert(file, page, frame_id)?;
        Ok((page, PageGuard { state, frame_id }))
    }

    /// Fetches an existing page and pins it. Fetching a page that is already
    /// pinned is a contract violation and fails with `PageFixed`.
    pub fn fetch_page(&self, file: FileId, page: PageId) -> StorageResult<PageGuard<'_>> {
        self.metrics.logical_reads.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock_state()?;
        if let Some(frame_id) = state.directory.find(file, page) {
            if state.frames[frame_id].pin_count > 0 {
                return Err(StorageError::PageFixed(page));
            }
            self.metrics.buffer_hits.fetch_add(1, Ordering::Relaxed);
            state.frames[frame_id].pin_count = 1;
            state.replacer.pin(frame_id);
            return Ok(PageGuard { state, frame_id });
        }

        self.metrics.buffer_misses.fetch_add(1, Ordering::Relaxed);
        {
            let paged = state.files.get(&file).ok_or(StorageError::BadHandle(file))?;
            if page >= paged.num_pages() || paged.is_free(page) {
                return Err(StorageError::InvalidPage(page));
            }
        }
        let frame_id = Self::take_frame(&mut state, &self.metrics)?;
        {
            let st = &mut *state;
            let paged = st.files.get(&file).ok_or(StorageError::BadHandle(file))?;
            if let Err(err) = paged.read_page(page, st.frames[frame_id].data_mut()) {
                st.free_list.push(frame_id);
                return Err(err);
            }
        }
        self.metrics.physical_reads.fetch_add(1, Ordering::Relaxed);
        state.frames[frame_id].owner = Some((file, page));
        state.frames[frame_id].is_dirty = false;
        state.frames[frame_id].pin_count = 1;
        state.directory.insert(file, page, frame_id)?;
        Ok(PageGuard { state, frame_id })
    }

    /// Releases a pin. With `dirty` set the frame is marked modified and a
    /// logical write is recorded. The frame re-enters the replacer at the
    /// most-recent position.
    pub fn unpin_page(&self, file: FileId, page: PageId, dirty: bool) -> StorageResult<()> {
        let mut state = self.lock_state()?;
        let frame_id = state
            .directory
            .find(file, page)
            .ok_or(StorageError::PageNotInBuf(page))?;
        let frame = &mut state.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(StorageError::PageUnfixed(page));
        }
        if dirty {
            frame.is_dirty = true;
            self.metrics.logical_writes.fetch_add(1, Ordering::Relaxed);
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        Ok(())
    }

    /// Frees a page back to its file. A cached copy is discarded without
    /// write-back; a pinned copy makes the call fail.
    pub fn dispose_page(&self, file: FileId, page: PageId) -> StorageResult<()> {
        let mut state = self.lock_state()?;
        if !state.files.contains_key(&file) {
            return Err(StorageError::BadHandle(file));
        }
        if let Some(frame_id) = state.directory.find(file, page) {
            if state.frames[frame_id].pin_count > 0 {
                return Err(StorageError::PageFixed(page));
            }
            state.directory.remove(file, page)?;
            state.replacer.pin(frame_id);
            state.frames[frame_id].reset();
            state.free_list.push(frame_id);
        }
        state
            .files
            .get_mut(&file)
            .ok_or(StorageError::BadHandle(file))?
            .dispose_page(page)
    }

    /// Writes back every dirty resident page of the file, leaving the pages
    /// cached and clean.
    pub fn flush_file(&self, file: FileId) -> StorageResult<()> {
        let mut state = self.lock_state()?;
        if !state.files.contains_key(&file) {
            return Err(StorageError::BadHandle(file));
        }
        for frame_id in 0..state.frames.len() {
            let Some((f, page)) = state.frames[frame_id].owner else {
                continue;
            };
            if f != file || !state.frames[frame_id].is_dirty {
                continue;
            }
            let st = &mut *state;
            let paged = st
                .files
                .get_mut(&file)
                .ok_or(StorageError::BadHandle(file))?;
            paged.write_page(page, st.frames[frame_id].data())?;
            st.frames[frame_id].is_dirty = false;
            self.metrics.physical_writes.fetch_add(1, Ordering::Relaxed);
        }
        log::debug!("flushed file handle {}", file);
        Ok(())
    }

    /// Current replacement policy.
    pub fn policy(&self) -> StorageResult<ReplacementPolicy> {
        Ok(self.lock_state()?.replacer.policy())
    }

    /// Switches the replacement policy; applies to subsequent evictions.
    pub fn set_policy(&self, policy: ReplacementPolicy) -> StorageResult<()> {
        self.lock_state()?.replacer.set_policy(policy);
        Ok(())
    }

    /// Snapshot of the I/O counters.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            logical_reads: self.metrics.logical_reads.load(Ordering::Relaxed),
            logical_writes: self.metrics.logical_writes.load(Ordering::Relaxed),
            physical_reads: self.metrics.physical_reads.load(Ordering::Relaxed),
            physical_writes: self.metrics.physical_writes.load(Ordering::Relaxed),
            buffer_hits: self.metrics.buffer_hits.load(Ordering::Relaxed),
            buffer_misses: self.metrics.buffer_misses.load(Ordering::Relaxed),
        }
    }

    /// Zeroes all I/O counters.
    pub fn reset_stats(&self) {
        self.metrics.logical_reads.store(0, Ordering::Relaxed);
        self.metrics.logical_writes.store(0, Ordering::Relaxed);
        self.metrics.physical_reads.store(0, Ordering::Relaxed);
        self.metrics.physical_writes.store(0, Ordering::Relaxed);
        self.metrics.buffer_hits.store(0, Ordering::Relaxed);
        self.metrics.buffer_misses.store(0, Ordering::Relaxed);
    }

    /// Number of frames currently pinned. Zero at every quiescence point.
    pub fn pinned_count(&self) -> StorageResult<usize> {
        let state = self.lock_state()?;
        Ok(state
            .frames
            .iter()
            .filter(|frame| frame.pin_count > 0)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TestContext {
        path: PathBuf,
    }

    impl TestContext {
        fn new(test_name: &str) -> Self {
            let path = std::env::temp_dir().join(format!("pagedb_bp_{}.pf", test_name));
            if path.exists() {
                let _ = fs::remove_file(&path);
            }
            Self { path }
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn setup(test_name: &str, pool_size: usize, pages: u32) -> (TestContext, BufferPool, FileId) {
        let ctx = TestContext::new(test_name);
        let pool = BufferPool::new(pool_size, ReplacementPolicy::Lru);
        pool.create_file(&ctx.path).unwrap();
        let file = pool.open_file(&ctx.path).unwrap();
        for _ in 0..pages {
            let (page, guard) = pool.allocate_page(file).unwrap();
            drop(guard);
            pool.unpin_page(file, page, false).unwrap();
        }
        pool.close_file(file).unwrap();
        let file = pool.open_file(&ctx.path).unwrap();
        pool.reset_stats();
        (ctx, pool, file)
    }

    fn touch(pool: &BufferPool, file: FileId, page: PageId) {
        let guard = pool.fetch_page(file, page).unwrap();
        drop(guard);
        pool.unpin_page(file, page, false).unwrap();
    }

    #[test]
    fn miss_hit_accounting() {
        let (_ctx, pool, file) = setup("accounting", 4, 10);
        touch(&pool, file, 0);
        touch(&pool, file, 1);
        touch(&pool, file, 0);

        let stats = pool.stats();
        assert_eq!(stats.logical_reads, 3);
        assert_eq!(stats.buffer_misses, 2);
        assert_eq!(stats.buffer_hits, 1);
        assert_eq!(stats.physical_reads, 2);
        assert_eq!(stats.physical_writes, 0);
        assert!((stats.hit_ratio() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.logical_reads, stats.buffer_hits + stats.buffer_misses);
    }

    #[test]
    fn lru_evicts_oldest_unpinned_page() {
        let (_ctx, pool, file) = setup("lru_victim", 3, 4);
        for page in 0..4 {
            touch(&pool, file, page);
        }
        // Bringing in page 3 evicted page 0; touching it again must miss.
        let before = pool.stats();
        touch(&pool, file, 0);
        let after = pool.stats();
        assert_eq!(after.buffer_misses, before.buffer_misses + 1);
    }

    #[test]
    fn mru_evicts_newest_unpinned_page() {
        let (_ctx, pool, file) = setup("mru_victim", 3, 4);
        pool.set_policy(ReplacementPolicy::Mru).unwrap();
        for page in 0..4 {
            touch(&pool, file, page);
        }
        // Bringing in page 3 evicted page 2; page 0 is still resident.
        let before = pool.stats();
        touch(&pool, file, 0);
        let after = pool.stats();
        assert_eq!(after.buffer_hits, before.buffer_hits + 1);
        touch(&pool, file, 2);
        let evicted = pool.stats();
        assert_eq!(evicted.buffer_misses, after.buffer_misses + 1);
    }

    #[test]
    fn saturated_pool_reports_no_buffer() {
        let (_ctx, pool, file) = setup("saturated", 2, 3);
        let g0 = pool.fetch_page(file, 0).unwrap();
        drop(g0);
        let g1 = pool.fetch_page(file, 1).unwrap();
        drop(g1);
        assert!(matches!(
            pool.fetch_page(file, 2),
            Err(StorageError::NoBuffer)
        ));
        pool.unpin_page(file, 0, false).unwrap();
        pool.unpin_page(file, 1, false).unwrap();
        let guard = pool.fetch_page(file, 2).unwrap();
        drop(guard);
        pool.unpin_page(file, 2, false).unwrap();
    }

    #[test]
    fn double_fetch_is_page_fixed() {
        let (_ctx, pool, file) = setup("double_fetch", 4, 2);
        let guard = pool.fetch_page(file, 0).unwrap();
        drop(guard);
        assert!(matches!(
            pool.fetch_page(file, 0),
            Err(StorageError::PageFixed(0))
        ));
        pool.unpin_page(file, 0, false).unwrap();
    }

    #[test]
    fn unpin_errors() {
        let (_ctx, pool, file) = setup("unpin_errors", 4, 2);
        assert!(matches!(
            pool.unpin_page(file, 0, false),
            Err(StorageError::PageNotInBuf(0))
        ));
        touch(&pool, file, 0);
        assert!(matches!(
            pool.unpin_page(file, 0, false),
            Err(StorageError::PageUnfixed(0))
        ));
    }

    #[test]
    fn dirty_pages_survive_eviction() {
        let (_ctx, pool, file) = setup("dirty_eviction", 2, 4);
        {
            let mut guard = pool.fetch_page(file, 0).unwrap();
            guard.write_bytes(100, b"payload");
            drop(guard);
        }
        pool.unpin_page(file, 0, true).unwrap();
        // Force page 0 out through two further fetches.
        touch(&pool, file, 1);
        touch(&pool, file, 2);
        let stats = pool.stats();
        assert_eq!(stats.physical_writes, 1);
        let guard = pool.fetch_page(file, 0).unwrap();
        assert_eq!(guard.read_bytes(100, 7).unwrap(), b"payload");
        drop(guard);
        pool.unpin_page(file, 0, false).unwrap();
    }

    #[test]
    fn close_refuses_pinned_pages_then_flushes() {
        let ctx = TestContext::new("close_pinned");
        let pool = BufferPool::new(4, ReplacementPolicy::Lru);
        pool.create_file(&ctx.path).unwrap();
        let file = pool.open_file(&ctx.path).unwrap();
        let (page, mut guard) = pool.allocate_page(file).unwrap();
        guard.write_bytes(0, b"keep");
        drop(guard);
        assert!(matches!(
            pool.close_file(file),
            Err(StorageError::PageFixed(p)) if p == page
        ));
        pool.unpin_page(file, page, true).unwrap();
        pool.close_file(file).unwrap();

        let file = pool.open_file(&ctx.path).unwrap();
        let guard = pool.fetch_page(file, page).unwrap();
        assert_eq!(guard.read_bytes(0, 4).unwrap(), b"keep");
        drop(guard);
        pool.unpin_page(file, page, false).unwrap();
        pool.close_file(file).unwrap();
    }

    #[test]
    fn dispose_page_discards_cached_copy() {
        let (_ctx, pool, file) = setup("dispose", 4, 3);
        let guard = pool.fetch_page(file, 1).unwrap();
        drop(guard);
        assert!(matches!(
            pool.dispose_page(file, 1),
            Err(StorageError::PageFixed(1))
        ));
        pool.unpin_page(file, 1, true).unwrap();
        pool.dispose_page(file, 1).unwrap();
        assert!(matches!(
            pool.fetch_page(file, 1),
            Err(StorageError::InvalidPage(1))
        ));
        assert!(matches!(
            pool.dispose_page(file, 1),
            Err(StorageError::PageAlreadyFree(1))
        ));
    }

    #[test]
    fn file_registry_contract() {
        let ctx = TestContext::new("open_twice");
        let pool = BufferPool::new(2, ReplacementPolicy::Lru);
        pool.create_file(&ctx.path).unwrap();
        let file = pool.open_file(&ctx.path).unwrap();
        assert!(matches!(
            pool.open_file(&ctx.path),
            Err(StorageError::FileAlreadyOpen(_))
        ));
        assert!(matches!(
            pool.destroy_file(&ctx.path),
            Err(StorageError::FileAlreadyOpen(_))
        ));
        pool.close_file(file).unwrap();
        assert!(matches!(
            pool.close_file(file),
            Err(StorageError::BadHandle(_))
        ));
        pool.destroy_file(&ctx.path).unwrap();
    }

    #[test]
    fn pin_balance_at_idle() {
        let (_ctx, pool, file) = setup("pin_balance", 3, 6);
        for page in 0..6 {
            touch(&pool, file, page);
        }
        assert_eq!(pool.pinned_count().unwrap(), 0);
    }

    #[test]
    fn reset_zeroes_counters() {
        let (_ctx, pool, file) = setup("reset", 4, 2);
        touch(&pool, file, 0);
        pool.reset_stats();
        assert_eq!(pool.stats(), BufferStats::default());
    }
}
