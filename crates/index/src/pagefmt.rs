//! On-disk index page codecs.
//!
//! Leaf page:
//!
//! ```text
//! 0   marker 'L'       u8
//! 1   next_leaf        i32   (-1 on the last leaf)
//! 5   reserved         4 x i16
//! 13  attr_len         i16
//! 15  key_count        i16
//! 17  max_keys         i16
//! 19  key_count x (key bytes[attr_len], rid i32), sorted
//! ```
//!
//! Internal page:
//!
//! ```text
//! 0   marker 'I'       u8
//! 1   key_count        i16
//! 3   max_keys         i16
//! 5   attr_len         i16
//! 7   left child       i32
//! 11  key_count x (separator bytes[attr_len], child i32)
//! ```
//!
//! Meta page (data page 0 of an index file): marker 'H', key type byte,
//! attr_len i16, root page i32 (-1 before the first build).
//!
//! Record ids pack into the 4-byte rid slot as `page << 16 | slot`.

use heap::RecordId;
use storage::{PAGE_SIZE, PageId};

use crate::key::KeyType;
use crate::{IndexError, IndexResult};

pub const LEAF_MARKER: u8 = b'L';
pub const INTERNAL_MARKER: u8 = b'I';
pub const META_MARKER: u8 = b'H';
pub const NO_PAGE: i32 = -1;

pub const LEAF_HEADER_SIZE: usize = 19;
pub const INT_HEADER_SIZE: usize = 11;
const RID_SIZE: usize = 4;
const PAGE_REF_SIZE: usize = 4;

const MARKER_OFFSET: usize = 0;
const LEAF_NEXT_OFFSET: usize = 1;
const LEAF_ATTR_OFFSET: usize = 13;
const LEAF_COUNT_OFFSET: usize = 15;
const LEAF_MAX_OFFSET: usize = 17;

const INT_COUNT_OFFSET: usize = 1;
const INT_MAX_OFFSET: usize = 3;
const INT_ATTR_OFFSET: usize = 5;
const INT_LEFT_OFFSET: usize = 7;

const META_KEY_TYPE_OFFSET: usize = 1;
const META_ATTR_OFFSET: usize = 2;
const META_ROOT_OFFSET: usize = 4;

/// Entries a leaf page can physically hold.
pub fn leaf_capacity(attr_len: usize) -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (attr_len + RID_SIZE)
}

/// Separator entries an internal page can hold beside its left-edge child.
pub fn internal_capacity(attr_len: usize) -> usize {
    (PAGE_SIZE - INT_HEADER_SIZE - PAGE_REF_SIZE) / (attr_len + PAGE_REF_SIZE)
}

/// Packs a record id into the on-disk rid slot.
pub fn pack_rid(rid: RecordId) -> IndexResult<i32> {
    if rid.page > u16::MAX as u32 {
        return Err(IndexError::RidOverflow {
            page: rid.page,
            slot: rid.slot,
        });
    }
    Ok(((rid.page << 16) | rid.slot as u32) as i32)
}

/// Inverse of `pack_rid`.
pub fn unpack_rid(value: i32) -> RecordId {
    let value = value as u32;
    RecordId {
        page: value >> 16,
        slot: (value & 0xFFFF) as u16,
    }
}

/// Decoded leaf page: next-leaf link and sorted (key, rid) pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafView {
    pub next: i32,
    pub entries: Vec<(Vec<u8>, RecordId)>,
}

/// Decoded internal page: left-edge child and (separator, child) pairs. The
/// separator at position i equals the smallest key reachable through the
/// child at position i.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalView {
    pub left: PageId,
    pub entries: Vec<(Vec<u8>, PageId)>,
}

/// A decoded tree node of either kind.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafView),
    Internal(InternalView),
}

fn read_i16(page: &[u8; PAGE_SIZE], offset: usize) -> i16 {
    i16::from_le_bytes([page[offset], page[offset + 1]])
}

fn write_i16(page: &mut [u8; PAGE_SIZE], offset: usize, value: i16) {
    page[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_i32(page: &[u8; PAGE_SIZE], offset: usize) -> i32 {
    i32::from_le_bytes([
        page[offset],
        page[offset + 1],
        page[offset + 2],
        page[offset + 3],
    ])
}

fn write_i32(page: &mut [u8; PAGE_SIZE], offset: usize, value: i32) {
    page[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn page_ref(value: i32) -> IndexResult<PageId> {
    if value < 0 {
        return Err(IndexError::Corrupt(format!(
            "negative child page reference {}",
            value
        )));
    }
    Ok(value as PageId)
}

pub fn marker(page: &[u8; PAGE_SIZE]) -> u8 {
    page[MARKER_OFFSET]
}

/// Encodes a leaf view into the page buffer.
pub fn write_leaf(page: &mut [u8; PAGE_SIZE], attr_len: usize, leaf: &LeafView) -> IndexResult<()> {
    let capacity = leaf_capacity(attr_len);
    if leaf.entries.len() > capacity {
        return Err(IndexError::Corrupt(format!(
            "{} entries exceed leaf capacity {}",
            leaf.entries.len(),
            capacity
        )));
    }
    page.fill(0);
    page[MARKER_OFFSET] = LEAF_MARKER;
    write_i32(page, LEAF_NEXT_OFFSET, leaf.next);
    write_i16(page, LEAF_ATTR_OFFSET, attr_len as i16);
    write_i16(page, LEAF_COUNT_OFFSET, leaf.entries.len() as i16);
    write_i16(page, LEAF_MAX_OFFSET, capacity as i16);
    for (index, (key, rid)) in leaf.entries.iter().enumerate() {
        if key.len() != attr_len {
            return Err(IndexError::KeyLength {
                got: key.len(),
                expected: attr_len,
            });
        }
        let offset = LEAF_HEADER_SIZE + index * (attr_len + RID_SIZE);
        page[offset..offset + attr_len].copy_from_slice(key);
        write_i32(page, offset + attr_len, pack_rid(*rid)?);
    }
    Ok(())
}

/// Decodes a leaf page.
pub fn read_leaf(page: &[u8; PAGE_SIZE], attr_len: usize) -> IndexResult<LeafView> {
    if marker(page) != LEAF_MARKER {
        return Err(IndexError::Corrupt(format!(
            "expected leaf marker, found {:#x}",
            marker(page)
        )));
    }
    let count = read_i16(page, LEAF_COUNT_OFFSET);
    if count < 0 || count as usize > leaf_capacity(attr_len) {
        return Err(IndexError::Corrupt(format!("bad leaf key count {}", count)));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        let offset = LEAF_HEADER_SIZE + index * (attr_len + RID_SIZE);
        let key = page[offset..offset + attr_len].to_vec();
        let rid = unpack_rid(read_i32(page, offset + attr_len));
        entries.push((key, rid));
    }
    Ok(LeafView {
        next: read_i32(page, LEAF_NEXT_OFFSET),
        entries,
    })
}

/// Rewrites only the next-leaf link of an encoded leaf page.
pub fn set_leaf_next(page: &mut [u8; PAGE_SIZE], next: i32) -> IndexResult<()> {
    if marker(page) != LEAF_MARKER {
        return Err(IndexError::Corrupt("not a leaf page".to_string()));
    }
    write_i32(page, LEAF_NEXT_OFFSET, next);
    Ok(())
}

/// Encodes an internal view into the page buffer.
pub fn write_internal(
    page: &mut [u8; PAGE_SIZE],
    attr_len: usize,
    internal: &InternalView,
) -> IndexResult<()> {
    let capacity = internal_capacity(attr_len);
    if internal.entries.len() > capacity {
        return Err(IndexError::Corrupt(format!(
            "{} separators exceed internal capacity {}",
            internal.entries.len(),
            capacity
        )));
    }
    page.fill(0);
    page[MARKER_OFFSET] = INTERNAL_MARKER;
    write_i16(page, INT_COUNT_OFFSET, internal.entries.len() as i16);
    write_i16(page, INT_MAX_OFFSET, capacity as i16);
    write_i16(page, INT_ATTR_OFFSET, attr_len as i16);
    write_i32(page, INT_LEFT_OFFSET, internal.left as i32);
    for (index, (key, child)) in internal.entries.iter().enumerate() {
        if key.len() != attr_len {
            return Err(IndexError::KeyLength {
                got: key.len(),
                expected: attr_len,
            });
        }
        let offset = INT_HEADER_SIZE + index * (attr_len + PAGE_REF_SIZE);
        page[offset..offset + attr_len].copy_from_slice(key);
        write_i32(page, offset + attr_len, *child as i32);
    }
    Ok(())
}

/// Decodes an internal page.
pub fn read_internal(page: &[u8; PAGE_SIZE], attr_len: usize) -> IndexResult<InternalView> {
    if marker(page) != INTERNAL_MARKER {
        return Err(IndexError::Corrupt(format!(
            "expected internal marker, found {:#x}",
            marker(page)
        )));
    }
    let count = read_i16(page, INT_COUNT_OFFSET);
    if count < 0 || count as usize > internal_capacity(attr_len) {
        return Err(IndexError::Corrupt(format!(
            "bad internal key count {}",
            count
        )));
    }
    let left = page_ref(read_i32(page, INT_LEFT_OFFSET))?;
    let mut entries = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        let offset = INT_HEADER_SIZE + index * (attr_len + PAGE_REF_SIZE);
        let key = page[offset..offset + attr_len].to_vec();
        let child = page_ref(read_i32(page, offset + attr_len))?;
        entries.push((key, child));
    }
    Ok(InternalView { left, entries })
}

/// Decodes either node kind by its marker byte.
pub fn read_node(page: &[u8; PAGE_SIZE], attr_len: usize) -> IndexResult<Node> {
    match marker(page) {
        LEAF_MARKER => Ok(Node::Leaf(read_leaf(page, attr_len)?)),
        INTERNAL_MARKER => Ok(Node::Internal(read_internal(page, attr_len)?)),
        other => Err(IndexError::Corrupt(format!(
            "unknown index page marker {:#x}",
            other
        ))),
    }
}

/// Formats the meta page with no root.
pub fn init_meta(page: &mut [u8; PAGE_SIZE], key_type: KeyType, attr_len: usize) {
    page.fill(0);
    page[MARKER_OFFSET] = META_MARKER;
    page[META_KEY_TYPE_OFFSET] = key_type.to_byte();
    write_i16(page, META_ATTR_OFFSET, attr_len as i16);
    write_i32(page, META_ROOT_OFFSET, NO_PAGE);
}

/// Decodes the meta page into (key type, attribute length, root page).
pub fn read_meta(page: &[u8; PAGE_SIZE]) -> IndexResult<(KeyType, usize, Option<PageId>)> {
    if marker(page) != META_MARKER {
        return Err(IndexError::Corrupt(format!(
            "expected meta marker, found {:#x}",
            marker(page)
        )));
    }
    let key_type = KeyType::from_byte(page[META_KEY_TYPE_OFFSET])?;
    let attr_len = read_i16(page, META_ATTR_OFFSET);
    if attr_len <= 0 {
        return Err(IndexError::Corrupt(format!(
            "bad attribute length {}",
            attr_len
        )));
    }
    let root = match read_i32(page, META_ROOT_OFFSET) {
        NO_PAGE => None,
        value => Some(page_ref(value)?),
    };
    Ok((key_type, attr_len as usize, root))
}

/// Updates the root pointer on an encoded meta page.
pub fn set_meta_root(page: &mut [u8; PAGE_SIZE], root: PageId) -> IndexResult<()> {
    if marker(page) != META_MARKER {
        return Err(IndexError::Corrupt("not a meta page".to_string()));
    }
    write_i32(page, META_ROOT_OFFSET, root as i32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(page: u32, slot: u16) -> RecordId {
        RecordId { page, slot }
    }

    #[test]
    fn rid_packing_round_trips() {
        for (page, slot) in [(0, 0), (1, 7), (65_535, 65_535)] {
            let packed = pack_rid(rid(page, slot)).unwrap();
            assert_eq!(unpack_rid(packed), rid(page, slot));
        }
        assert!(pack_rid(rid(65_536, 0)).is_err());
    }

    #[test]
    fn capacities_for_twenty_byte_keys() {
        assert_eq!(leaf_capacity(20), (4096 - 19) / 24);
        assert_eq!(internal_capacity(20), (4096 - 11 - 4) / 24);
    }

    #[test]
    fn leaf_round_trip() {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        let leaf = LeafView {
            next: 9,
            entries: vec![
                (vec![1u8; 8], rid(1, 0)),
                (vec![2u8; 8], rid(1, 1)),
                (vec![3u8; 8], rid(2, 0)),
            ],
        };
        write_leaf(&mut page, 8, &leaf).unwrap();
        assert_eq!(marker(&page), LEAF_MARKER);
        assert_eq!(read_leaf(&page, 8).unwrap(), leaf);

        set_leaf_next(&mut page, NO_PAGE).unwrap();
        assert_eq!(read_leaf(&page, 8).unwrap().next, NO_PAGE);
    }

    #[test]
    fn internal_round_trip() {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        let internal = InternalView {
            left: 4,
            entries: vec![(vec![5u8; 8], 6), (vec![7u8; 8], 8)],
        };
        write_internal(&mut page, 8, &internal).unwrap();
        assert_eq!(read_internal(&page, 8).unwrap(), internal);
        assert!(read_leaf(&page, 8).is_err());
    }

    #[test]
    fn meta_round_trip() {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        init_meta(&mut page, KeyType::Bytes, 20);
        assert_eq!(read_meta(&page).unwrap(), (KeyType::Bytes, 20, None));
        set_meta_root(&mut page, 3).unwrap();
        assert_eq!(read_meta(&page).unwrap(), (KeyType::Bytes, 20, Some(3)));
    }

    #[test]
    fn overfull_leaf_is_rejected() {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        let capacity = leaf_capacity(4);
        let entries = (0..=capacity as u32)
            .map(|n| (n.to_le_bytes().to_vec(), rid(0, 0)))
            .collect();
        let leaf = LeafView { next: NO_PAGE, entries };
        assert!(write_leaf(&mut page, 4, &leaf).is_err());
    }
}
