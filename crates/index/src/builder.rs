//! The three index-construction strategies over a record file.
//!
//! Strategies 1 and 2 drive the generic insertion primitive and differ only
//! in how records arrive (a physical-order file scan versus one record at a
//! time); downstream comparisons report them separately, so both entry
//! points exist. Strategy 3 materializes every pair and bulk loads.

use std::path::Path;

use heap::{RecordFile, RecordId};
use storage::BufferPool;

use crate::btree::BPlusIndex;
use crate::key::KeyType;
use crate::IndexResult;

/// Strategy 1: scan the data file in physical order, inserting each record
/// through the index's insertion primitive. Arrival order is whatever the
/// file's layout dictates, so splits are frequent.
pub fn build_from_scan<F>(index: &BPlusIndex, records: &RecordFile, key_of: F) -> IndexResult<()>
where
    F: Fn(&[u8]) -> Vec<u8>,
{
    for (rid, bytes) in records.scan()? {
        index.insert(&key_of(&bytes), rid)?;
    }
    Ok(())
}

/// Strategy 2: records arrive one at a time and are inserted as they come.
/// The primitive is the same as strategy 1's; only the framing differs.
pub fn build_incremental<I, F>(index: &BPlusIndex, arrivals: I, key_of: F) -> IndexResult<()>
where
    I: IntoIterator<Item = (RecordId, Vec<u8>)>,
    F: Fn(&[u8]) -> Vec<u8>,
{
    for (rid, bytes) in arrivals {
        index.insert(&key_of(&bytes), rid)?;
    }
    Ok(())
}

/// Strategy 3: create the index file, materialize every (key, rid) pair,
/// and bulk load bottom-up. All-or-nothing: any failure destroys the
/// partially built file before the error surfaces.
#[allow(clippy::too_many_arguments)]
pub fn bulk_build<P, F>(
    pool: &BufferPool,
    name: P,
    index_no: u32,
    key_type: KeyType,
    key_len: usize,
    records: &RecordFile,
    key_of: F,
    fill_factor: f64,
) -> IndexResult<BPlusIndex>
where
    P: AsRef<Path>,
    F: Fn(&[u8]) -> Vec<u8>,
{
    let index = BPlusIndex::create(pool, &name, index_no, key_type, key_len)?;
    let load = records.scan().map_err(Into::into).and_then(|scanned| {
        let pairs = scanned
            .into_iter()
            .map(|(rid, bytes)| (key_of(&bytes), rid))
            .collect();
        index.bulk_load(pairs, fill_factor)
    });
    if let Err(err) = load {
        let path = index.path().to_path_buf();
        let pool = index.pool().clone();
        let _ = index.close();
        let _ = pool.destroy_file(&path);
        log::debug!("bulk build failed, destroyed {:?}", path);
        return Err(err);
    }
    Ok(index)
}
