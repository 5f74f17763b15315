#![allow(dead_code)]

use heap::RecordId;
use storage::{BufferPool, ReplacementPolicy};
use tempfile::TempDir;

pub fn temp_pool(frames: usize) -> (TempDir, BufferPool) {
    let dir = TempDir::new().expect("temp dir create failed");
    (dir, BufferPool::new(frames, ReplacementPolicy::Lru))
}

pub fn int_key(value: i32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn rid_for(n: u32) -> RecordId {
    RecordId {
        page: n / 64,
        slot: (n % 64) as u16,
    }
}
