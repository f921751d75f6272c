//! Full-cache iteration: walks every live entry across all pages,
//! holding at most one page lock at a time.
//!
//! No snapshot guarantee across pages: once a page has been visited
//! and unlocked, later mutations to it are invisible to the scan;
//! a not-yet-visited page is seen in whatever state it has when the
//! scan reaches it.

use crate::error::CacheResult;
use crate::page::layout::SLOT_TOMBSTONE;
use crate::region::ShmRegion;

/// One live entry as observed during a full-cache scan.
#[derive(Debug, Clone)]
pub struct LiveEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub last_access: u32,
    pub expire_time: u32,
    pub flags: u32,
}

/// Selects how much of each entry `get_keys` materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysMode {
    /// Keys only.
    KeysOnly,
    /// Keys and values.
    KeysAndValues,
    /// Keys, values, and the last_access/expire_time/flags metadata.
    Full,
}

impl KeysMode {
    pub fn from_u8(mode: u8) -> Option<Self> {
        match mode {
            0 => Some(KeysMode::KeysOnly),
            1 => Some(KeysMode::KeysAndValues),
            2 => Some(KeysMode::Full),
            _ => None,
        }
    }
}

/// Fallible iterator over every live entry in a region. Yields
/// `CacheResult<LiveEntry>` rather than a bare `LiveEntry` because
/// crossing a page boundary may block on that page's lock and can
/// time out.
pub struct PageIterator<'r> {
    region: &'r ShmRegion,
    next_page: u32,
    page: Option<crate::page::cursor::PageGuard<'r>>,
    slot: u32,
}

impl<'r> PageIterator<'r> {
    pub fn new(region: &'r ShmRegion) -> Self {
        PageIterator {
            region,
            next_page: 0,
            page: None,
            slot: 0,
        }
    }
}

impl<'r> Iterator for PageIterator<'r> {
    type Item = CacheResult<LiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page.is_none() {
                if self.next_page >= self.region.num_pages() {
                    return None;
                }
                let idx = self.next_page;
                self.next_page += 1;
                match self.region.lock_page(idx) {
                    Ok(guard) => {
                        self.page = Some(guard);
                        self.slot = 0;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }

            let guard = self.page.as_ref().expect("page just populated");
            if self.slot >= guard.num_slots() {
                self.page = None;
                continue;
            }

            let position = self.slot;
            self.slot += 1;
            let offset = guard.slot_get(position);
            if offset <= SLOT_TOMBSTONE {
                continue;
            }

            let header = guard.entry_header_at(offset);
            let key = guard.key_at(offset, header.key_len).to_vec();
            let value = guard
                .value_at(offset, header.key_len, header.value_len)
                .to_vec();
            return Some(Ok(LiveEntry {
                key,
                value,
                last_access: header.last_access,
                expire_time: header.expire_time,
                flags: header.flags,
            }));
        }
    }
}
