//! Page cursor: the typed view over one locked page's raw bytes.
//!
//! Exposes one accessor per header field and one accessor per entry
//! field. Bounds are validated once, at lock time (`validate`), and
//! direct reads/writes are permitted inside the validated region from
//! then on.
//!
//! Implements a small state machine: `UNATTACHED -> LOCKED(p) ->
//! LOCKED_DIRTY(p) -> UNATTACHED`. A `PageGuard` only exists while
//! `LOCKED*`; `unlock` is the only way back to `UNATTACHED` and is the
//! only point header fields are written back, and only when `dirty`.

use crate::error::{CacheError, CacheResult};
use crate::page::layout::{self, EntryHeader, Header, MAGIC, MIN_SLOTS, SLOT_EMPTY, SLOT_TOMBSTONE};
use crate::page::lock;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

/// A locked page, owning the only live view of its bytes for the
/// duration of the lock.
pub struct PageGuard<'a> {
    bytes: &'a mut [u8],
    fd: std::os::unix::io::RawFd,
    page_idx: u32,
    header: Header,
    dirty: bool,
    released: bool,
}

impl<'a> PageGuard<'a> {
    /// Validate I1, I2, I3, I5 and construct a cursor over an already
    /// `fcntl`-locked page. Caller has exclusive access to `bytes` for
    /// the lifetime of the guard.
    pub fn attach(
        bytes: &'a mut [u8],
        fd: std::os::unix::io::RawFd,
        page_idx: u32,
    ) -> CacheResult<Self> {
        let header = validate(bytes, page_idx)?;
        Ok(PageGuard {
            bytes,
            fd,
            page_idx,
            header,
            dirty: false,
            released: false,
        })
    }

    /// Construct a cursor over page bytes without validating
    /// invariants, for use only during (re)initialization before the
    /// page has a valid header to validate against.
    ///
    /// # Safety
    /// Caller must hold the page's advisory lock and must call
    /// `reinitialize` before using any other accessor.
    pub unsafe fn new_uninitialized(
        bytes: &'a mut [u8],
        fd: std::os::unix::io::RawFd,
        page_idx: u32,
    ) -> Self {
        PageGuard {
            bytes,
            fd,
            page_idx,
            header: Header {
                magic: 0,
                num_slots: 0,
                free_slots: 0,
                old_slots: 0,
                free_data: 0,
                free_bytes: 0,
                _reserved: [0; 2],
            },
            dirty: false,
            released: false,
        }
    }

    pub fn page_idx(&self) -> u32 {
        self.page_idx
    }

    pub fn page_size(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn num_slots(&self) -> u32 {
        self.header.num_slots
    }

    pub fn free_slots(&self) -> u32 {
        self.header.free_slots
    }

    pub fn old_slots(&self) -> u32 {
        self.header.old_slots
    }

    pub fn free_data(&self) -> u32 {
        self.header.free_data
    }

    pub fn free_bytes(&self) -> u32 {
        self.header.free_bytes
    }

    pub fn set_free_slots(&mut self, v: u32) {
        self.header.free_slots = v;
        self.dirty = true;
    }

    pub fn set_old_slots(&mut self, v: u32) {
        self.header.old_slots = v;
        self.dirty = true;
    }

    pub fn set_free_data(&mut self, v: u32) {
        self.header.free_data = v;
        self.dirty = true;
    }

    pub fn set_free_bytes(&mut self, v: u32) {
        self.header.free_bytes = v;
        self.dirty = true;
    }

    /// Slot directory entry `i` (0 = empty, 1 = tombstone, >1 = entry
    /// record offset).
    pub fn slot_get(&self, i: u32) -> u32 {
        let offset = layout::slot_dir_offset() + i as usize * 4;
        read_u32(self.bytes, offset)
    }

    pub fn slot_set(&mut self, i: u32, value: u32) {
        let offset = layout::slot_dir_offset() + i as usize * 4;
        write_u32(self.bytes, offset, value);
        self.dirty = true;
    }

    /// Read the 24-byte fixed prefix of the entry record at `offset`.
    pub fn entry_header_at(&self, offset: u32) -> EntryHeader {
        let o = offset as usize;
        EntryHeader {
            last_access: read_u32(self.bytes, o),
            expire_time: read_u32(self.bytes, o + 4),
            slot_hash: read_u32(self.bytes, o + 8),
            flags: read_u32(self.bytes, o + 12),
            key_len: read_u32(self.bytes, o + 16),
            value_len: read_u32(self.bytes, o + 20),
        }
    }

    pub fn set_entry_header_at(&mut self, offset: u32, header: &EntryHeader) {
        let o = offset as usize;
        write_u32(self.bytes, o, header.last_access);
        write_u32(self.bytes, o + 4, header.expire_time);
        write_u32(self.bytes, o + 8, header.slot_hash);
        write_u32(self.bytes, o + 12, header.flags);
        write_u32(self.bytes, o + 16, header.key_len);
        write_u32(self.bytes, o + 20, header.value_len);
        self.dirty = true;
    }

    pub fn set_last_access(&mut self, offset: u32, now: u32) {
        write_u32(self.bytes, offset as usize, now);
        self.dirty = true;
    }

    pub fn key_at(&self, offset: u32, key_len: u32) -> &[u8] {
        let start = offset as usize + layout::ENTRY_HEADER_SIZE;
        &self.bytes[start..start + key_len as usize]
    }

    pub fn value_at(&self, offset: u32, key_len: u32, value_len: u32) -> &[u8] {
        let start = offset as usize + layout::ENTRY_HEADER_SIZE + key_len as usize;
        &self.bytes[start..start + value_len as usize]
    }

    /// Write a full entry record (header + key + value) at `offset`.
    /// `offset` must have room for `entry_record_len(key.len(), value.len())`.
    pub fn write_entry(&mut self, offset: u32, header: &EntryHeader, key: &[u8], value: &[u8]) {
        self.set_entry_header_at(offset, header);
        let key_start = offset as usize + layout::ENTRY_HEADER_SIZE;
        self.bytes[key_start..key_start + key.len()].copy_from_slice(key);
        let value_start = key_start + key.len();
        self.bytes[value_start..value_start + value.len()].copy_from_slice(value);
        self.dirty = true;
    }

    /// Replace the entire slot directory and heap in one shot
    /// (expunge's `do_expunge` rebuild) and reset the header fields
    /// that describe them.
    pub fn replace_directory_and_heap(
        &mut self,
        new_num_slots: u32,
        new_free_slots: u32,
        directory: &[u32],
        heap: &[u8],
    ) {
        debug_assert_eq!(directory.len(), new_num_slots as usize);
        let dir_off = layout::slot_dir_offset();
        for (i, &v) in directory.iter().enumerate() {
            write_u32(self.bytes, dir_off + i * 4, v);
        }
        let heap_off = layout::heap_start(new_num_slots);
        self.bytes[heap_off..heap_off + heap.len()].copy_from_slice(heap);

        self.header.num_slots = new_num_slots;
        self.header.free_slots = new_free_slots;
        self.header.old_slots = 0;
        self.header.free_data = (heap_off + heap.len()) as u32;
        self.header.free_bytes = self.bytes.len() as u32 - self.header.free_data;
        self.dirty = true;
    }

    /// Re-initialize this page to an empty page with `num_slots`
    /// slots.
    pub fn reinitialize(&mut self, num_slots: u32) {
        self.bytes.fill(0);
        write_u32(self.bytes, 0, MAGIC);
        write_u32(self.bytes, 4, num_slots);
        write_u32(self.bytes, 8, num_slots);
        write_u32(self.bytes, 12, 0);
        let free_data = layout::heap_start(num_slots) as u32;
        write_u32(self.bytes, 16, free_data);
        write_u32(self.bytes, 20, self.bytes.len() as u32 - free_data);

        self.header = Header {
            magic: MAGIC,
            num_slots,
            free_slots: num_slots,
            old_slots: 0,
            free_data,
            free_bytes: self.bytes.len() as u32 - free_data,
            _reserved: [0; 2],
        };
        self.dirty = true;
    }

    /// Release the lock, writing header fields back first if the
    /// cursor observed any mutation.
    pub fn unlock(mut self) -> CacheResult<()> {
        self.flush_and_release()
    }

    fn flush_and_release(&mut self) -> CacheResult<()> {
        if self.released {
            return Ok(());
        }
        if self.dirty {
            let h = self.header;
            write_u32(self.bytes, 0, h.magic);
            write_u32(self.bytes, 4, h.num_slots);
            write_u32(self.bytes, 8, h.free_slots);
            write_u32(self.bytes, 12, h.old_slots);
            write_u32(self.bytes, 16, h.free_data);
            write_u32(self.bytes, 20, h.free_bytes);
        }
        self.released = true;
        lock::unlock_page(self.fd, self.page_idx, self.bytes.len() as u64)
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.flush_and_release() {
                log::error!("failed to release page {} lock on drop: {e}", self.page_idx);
            }
        }
    }
}

/// Validate I1, I2, I3, I5 against a page's raw bytes. Returns the parsed header on success.
pub fn validate(bytes: &[u8], page_idx: u32) -> CacheResult<Header> {
    let page_size = bytes.len() as u32;
    let magic = read_u32(bytes, 0);
    if magic != MAGIC {
        return Err(CacheError::PageCorrupt {
            page: page_idx,
            reason: format!("bad magic {magic:#x}"),
        });
    }

    let num_slots = read_u32(bytes, 4);
    let free_slots = read_u32(bytes, 8);
    let old_slots = read_u32(bytes, 12);
    let free_data = read_u32(bytes, 16);
    let free_bytes = read_u32(bytes, 20);

    if free_data.checked_add(free_bytes) != Some(page_size) {
        return Err(CacheError::PageCorrupt {
            page: page_idx,
            reason: "I1 violated: free_data + free_bytes != page_size".into(),
        });
    }
    if free_slots > num_slots || old_slots > free_slots {
        return Err(CacheError::PageCorrupt {
            page: page_idx,
            reason: "I2 violated: free_slots/old_slots out of range".into(),
        });
    }
    if num_slots < MIN_SLOTS || num_slots > layout::max_slots(page_size) {
        return Err(CacheError::PageCorrupt {
            page: page_idx,
            reason: format!("I5 violated: num_slots={num_slots} out of bounds"),
        });
    }

    let dir_off = layout::slot_dir_offset();
    let mut counted_free = 0u32;
    let mut counted_old = 0u32;
    for i in 0..num_slots as usize {
        let v = read_u32(bytes, dir_off + i * 4);
        if v == SLOT_EMPTY || v == SLOT_TOMBSTONE {
            counted_free += 1;
            if v == SLOT_TOMBSTONE {
                counted_old += 1;
            }
        }
    }
    if counted_free != free_slots || counted_old != old_slots {
        return Err(CacheError::PageCorrupt {
            page: page_idx,
            reason: format!(
                "I3 violated: directory has {counted_free}/{counted_old} free/tombstoned, header says {free_slots}/{old_slots}"
            ),
        });
    }

    Ok(Header {
        magic,
        num_slots,
        free_slots,
        old_slots,
        free_data,
        free_bytes,
        _reserved: [0; 2],
    })
}
