//! Open-addressed slot search with tombstone skipping: linear probe
//! over a fixed-size directory, wrapping at the end. Deletions leave
//! a tombstone behind rather than shifting later entries back;
//! tombstones are reclaimed later during compaction.

use crate::page::cursor::PageGuard;
use crate::page::layout::{SLOT_EMPTY, SLOT_TOMBSTONE};

/// What a slot search should do when it encounters a matching
/// key (read the inline offset) vs. a miss (tombstone or empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// `read`/`delete`: skip tombstones, stop only on an empty slot
    /// or a key match.
    ReadOrDelete,
    /// `insert`: stop at the first tombstone, empty slot, or key
    /// match — whichever comes first — so a miss's answer slot is
    /// exactly the slot an insert would use.
    Insert,
}

/// Result of a slot search: the directory position examined last, and
/// the raw value found there (0 = empty, 1 = tombstone, >1 = the
/// entry record's byte offset).
#[derive(Debug, Clone, Copy)]
pub struct FoundSlot {
    pub position: u32,
    pub value: u32,
}

impl FoundSlot {
    pub fn is_empty(&self) -> bool {
        self.value == SLOT_EMPTY
    }

    pub fn is_tombstone(&self) -> bool {
        self.value == SLOT_TOMBSTONE
    }

    pub fn offset(&self) -> Option<u32> {
        (self.value > SLOT_TOMBSTONE).then_some(self.value)
    }
}

/// Probe the slot directory starting at `seed mod num_slots`, linearly
/// stepping and wrapping, examining at most `num_slots` positions.
pub fn find_slot(cursor: &PageGuard, seed: u32, key: &[u8], mode: ProbeMode) -> FoundSlot {
    let num_slots = cursor.num_slots();
    let start = seed % num_slots;
    let mut idx = start;

    for _ in 0..num_slots {
        let value = cursor.slot_get(idx);
        match value {
            SLOT_EMPTY => return FoundSlot { position: idx, value },
            SLOT_TOMBSTONE => {
                if mode == ProbeMode::Insert {
                    return FoundSlot { position: idx, value };
                }
            }
            offset => {
                let entry = cursor.entry_header_at(offset);
                if entry.key_len as usize == key.len() && cursor.key_at(offset, entry.key_len) == key {
                    return FoundSlot { position: idx, value: offset };
                }
            }
        }
        idx = (idx + 1) % num_slots;
    }

    // Table exhausted without a terminal slot (shouldn't happen at the
    // load factors `calc_expunge` maintains); report the last position
    // examined as a miss.
    FoundSlot {
        position: idx,
        value: cursor.slot_get(idx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::cursor::PageGuard;

    fn fresh_page(buf: &mut [u8], num_slots: u32) {
        buf.fill(0);
        let page_size = buf.len() as u32;
        let heap = crate::page::layout::heap_start(num_slots) as u32;
        buf[0..4].copy_from_slice(&crate::page::layout::MAGIC.to_ne_bytes());
        buf[4..8].copy_from_slice(&num_slots.to_ne_bytes());
        buf[8..12].copy_from_slice(&num_slots.to_ne_bytes());
        buf[12..16].copy_from_slice(&0u32.to_ne_bytes());
        buf[16..20].copy_from_slice(&heap.to_ne_bytes());
        buf[20..24].copy_from_slice(&(page_size - heap).to_ne_bytes());
    }

    #[test]
    fn miss_on_empty_directory() {
        let mut buf = vec![0u8; 4096];
        fresh_page(&mut buf, 89);
        let fd = -1;
        let cursor = PageGuard::attach(&mut buf, fd, 0).unwrap();
        let found = find_slot(&cursor, 5, b"k", ProbeMode::ReadOrDelete);
        assert!(found.is_empty());
    }

    #[test]
    fn insert_and_read_agree_on_slot() {
        let mut buf = vec![0u8; 4096];
        fresh_page(&mut buf, 89);
        let fd = -1;
        let cursor = PageGuard::attach(&mut buf, fd, 0).unwrap();
        let miss = find_slot(&cursor, 5, b"k", ProbeMode::ReadOrDelete);
        let ins = find_slot(&cursor, 5, b"k", ProbeMode::Insert);
        assert_eq!(miss.position, ins.position);
    }
}
