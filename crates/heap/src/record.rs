use std::path::Path;

use storage::{BufferPool, FileId, PAGE_SIZE, PageId};

use crate::slotted;
use crate::{HeapError, HeapResult};

/// Stable identifier of a record: data page number plus slot number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page: PageId,
    pub slot: u16,
}

/// Per-file space accounting for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpaceStats {
    pub total_bytes: usize,
    pub used_bytes: usize,
    pub slot_bytes: usize,
    pub header_bytes: usize,
    pub free_bytes: usize,
    pub fragmented_bytes: usize,
}

impl SpaceStats {
    /// Fraction of file bytes holding live record data.
    pub fn utilization(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// A file of slotted pages accessed through the buffer pool.
///
/// Inserts scan existing pages first and extend the file only when no page
/// fits the record; scans walk every page in slot order.
pub struct RecordFile {
    pool: BufferPool,
    file: FileId,
}

impl RecordFile {
    /// Creates the paged file on disk and opens it.
    pub fn create<P: AsRef<Path>>(pool: &BufferPool, path: P) -> HeapResult<Self> {
        pool.create_file(&path)?;
        Self::open(pool, path)
    }

    /// Opens an existing record file.
    pub fn open<P: AsRef<Path>>(pool: &BufferPool, path: P) -> HeapResult<Self> {
        let file = pool.open_file(path)?;
        Ok(Self {
            pool: pool.clone(),
            file,
        })
    }

    /// Flushes and closes the underlying file.
    pub fn close(self) -> HeapResult<()> {
        self.pool.close_file(self.file)?;
        Ok(())
    }

    /// Removes a record file from disk.
    pub fn destroy<P: AsRef<Path>>(pool: &BufferPool, path: P) -> HeapResult<()> {
        pool.destroy_file(path)?;
        Ok(())
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    pub fn page_count(&self) -> HeapResult<u32> {
        Ok(self.pool.file_page_count(self.file)?)
    }

    /// Inserts a record into the first page that accepts it, extending the
    /// file with a fresh slotted page when none does.
    pub fn insert(&self, record: &[u8]) -> HeapResult<RecordId> {
        if record.len() > slotted::MAX_RECORD_SIZE {
            return Err(HeapError::RecordTooLarge(record.len()));
        }
        for page in 0..self.page_count()? {
            let attempt = {
                let mut guard = self.pool.fetch_page(self.file, page)?;
                slotted::insert(guard.data_mut(), record)
            };
            match attempt {
                Ok(slot) => {
                    self.pool.unpin_page(self.file, page, true)?;
                    return Ok(RecordId { page, slot });
                }
                Err(HeapError::NoSpace) => {
                    self.pool.unpin_page(self.file, page, false)?;
                }
                Err(err) => {
                    self.pool.unpin_page(self.file, page, false)?;
                    return Err(err);
                }
            }
        }

        let (page, slot) = {
            let (page, mut guard) = self.pool.allocate_page(self.file)?;
            slotted::init(guard.data_mut(), page as i32);
            let inserted = slotted::insert(guard.data_mut(), record);
            drop(guard);
            match inserted {
                Ok(slot) => (page, slot),
                Err(err) => {
                    self.pool.unpin_page(self.file, page, true)?;
                    return Err(err);
                }
            }
        };
        self.pool.unpin_page(self.file, page, true)?;
        log::debug!("record file {} grew to page {}", self.file, page);
        Ok(RecordId { page, slot })
    }

    /// Returns a copy of the record bytes.
    pub fn get(&self, rid: RecordId) -> HeapResult<Vec<u8>> {
        let fetched = {
            let guard = self.pool.fetch_page(self.file, rid.page)?;
            slotted::fetch(guard.data(), rid.slot).map(|bytes| bytes.to_vec())
        };
        self.pool.unpin_page(self.file, rid.page, false)?;
        fetched
    }

    /// Tombstones the record's slot.
    pub fn delete(&self, rid: RecordId) -> HeapResult<()> {
        let deleted = {
            let mut guard = self.pool.fetch_page(self.file, rid.page)?;
            slotted::delete(guard.data_mut(), rid.slot)
        };
        self.pool.unpin_page(self.file, rid.page, deleted.is_ok())?;
        deleted
    }

    /// Every live record in page order, then slot order, with its id.
    pub fn scan(&self) -> HeapResult<Vec<(RecordId, Vec<u8>)>> {
        let mut output = Vec::new();
        for page in 0..self.page_count()? {
            let records = {
                let guard = self.pool.fetch_page(self.file, page)?;
                slotted::live_records(guard.data())
                    .into_iter()
                    .map(|(slot, bytes)| (RecordId { page, slot }, bytes.to_vec()))
                    .collect::<Vec<_>>()
            };
            self.pool.unpin_page(self.file, page, false)?;
            output.extend(records);
        }
        Ok(output)
    }

    /// Compacts one page in place. The caller must hold no `RecordId` into
    /// this page: compaction renumbers the surviving slots.
    pub fn compact_page(&self, page: PageId) -> HeapResult<()> {
        let compacted = {
            let mut guard = self.pool.fetch_page(self.file, page)?;
            slotted::compact(guard.data_mut())
        };
        self.pool.unpin_page(self.file, page, compacted.is_ok())?;
        compacted
    }

    /// Aggregated space accounting across all pages.
    pub fn space_stats(&self) -> HeapResult<SpaceStats> {
        let mut stats = SpaceStats::default();
        for page in 0..self.page_count()? {
            let (used, slots, free, contiguous) = {
                let guard = self.pool.fetch_page(self.file, page)?;
                let data = guard.data();
                let slots = slotted::num_slots(data) as usize * slotted::SLOT_SIZE;
                let directory_end = slotted::SP_HEADER_SIZE + slots;
                let contiguous =
                    (slotted::free_space_offset(data) as usize).saturating_sub(directory_end);
                (
                    slotted::used_bytes(data),
                    slots,
                    slotted::free_space(data) as usize,
                    contiguous,
                )
            };
            self.pool.unpin_page(self.file, page, false)?;
            stats.total_bytes += PAGE_SIZE;
            stats.used_bytes += used;
            stats.slot_bytes += slots;
            stats.header_bytes += slotted::SP_HEADER_SIZE;
            stats.free_bytes += contiguous;
            stats.fragmented_bytes += free - contiguous;
        }
        Ok(stats)
    }
}
