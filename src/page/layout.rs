//! `#[repr(C)]` structures that live in the shared mmap.
//!
//! One page is `page_size` contiguous bytes: a fixed 32-byte header,
//! then a slot directory of `num_slots` 32-bit entries, then a heap of
//! inline entry records growing upward from the end of the directory.

/// Page header magic.
pub const MAGIC: u32 = 0x92F7_E3B1;

/// Fixed header size, in bytes.
pub const HEADER_SIZE: usize = 32;

/// Slot directory encoding: 0 = empty, 1 = tombstone,
/// >1 = byte offset of the entry record within the page.
pub const SLOT_EMPTY: u32 = 0;
pub const SLOT_TOMBSTONE: u32 = 1;

/// Minimum slot directory size (I5).
pub const MIN_SLOTS: u32 = 89;

/// Fixed-size prefix of every entry record.
pub const ENTRY_HEADER_SIZE: usize = 24;

/// Bit 0 of an entry's `flags` field: the entry is dirty (write-back
/// pending).
pub const FLAG_DIRTY: u32 = 1;

/// Page header, 32 bytes, 4-byte-aligned fields.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub magic: u32,
    pub num_slots: u32,
    pub free_slots: u32,
    pub old_slots: u32,
    pub free_data: u32,
    pub free_bytes: u32,
    pub _reserved: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

/// Fixed 24-byte prefix of an entry record; key bytes then value bytes
/// follow immediately, padded so the next record starts 4-byte
/// aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EntryHeader {
    pub last_access: u32,
    pub expire_time: u32,
    pub slot_hash: u32,
    pub flags: u32,
    pub key_len: u32,
    pub value_len: u32,
}

const _: () = assert!(std::mem::size_of::<EntryHeader>() == ENTRY_HEADER_SIZE);

/// Round `n` up to the next multiple of 4.
pub const fn round_up4(n: usize) -> usize {
    (n + 3) & !3
}

/// Total on-disk size of an entry record (header + key + value),
/// rounded up to a 4-byte boundary.
pub const fn entry_record_len(key_len: usize, value_len: usize) -> usize {
    round_up4(ENTRY_HEADER_SIZE + key_len + value_len)
}

/// Byte offset of the slot directory's first entry.
pub const fn slot_dir_offset() -> usize {
    HEADER_SIZE
}

/// Byte offset of the first heap byte after a slot directory of
/// `num_slots` entries.
pub const fn heap_start(num_slots: u32) -> usize {
    HEADER_SIZE + num_slots as usize * 4
}

/// Usable heap bytes for a page of `page_size` with `num_slots` slots.
pub const fn usable_heap(page_size: u32, num_slots: u32) -> usize {
    page_size as usize - heap_start(num_slots)
}

/// Largest legal `num_slots` for a page of `page_size` bytes (I5).
pub const fn max_slots(page_size: u32) -> u32 {
    page_size / 4
}
