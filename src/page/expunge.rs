//! Expiry sweep / LRU eviction / slot-directory resize / compaction
//! — the largest single subsystem in the cache.
//!
//! There is no intrusive eviction list: eviction order is decided on
//! demand by sorting live entries by `last_access`, and growth or
//! shrinkage of the slot directory is a whole-page rebuild rather
//! than an incremental free-list pop. Calculation (`calc_expunge`)
//! and application (`do_expunge`) are split into two phases so a
//! caller can inspect victims (for a write-back flush) before they
//! are actually evicted.

use std::collections::HashSet;

use crate::page::cursor::PageGuard;
use crate::page::layout::{self, EntryHeader, SLOT_TOMBSTONE};

/// Which entries `calc_expunge` should consider for removal.
#[derive(Debug, Clone, Copy)]
pub enum ExpungeMode {
    /// Emit every entry whose `expire_time` is nonzero and `<= now`.
    ExpiredOnly,
    /// Emit every live entry (used by `clear()`).
    All,
    /// Sized admission for a write of `len` bytes. `None` forces the
    /// LRU sweep unconditionally (skips the headroom shortcut).
    MakeRoom(Option<u32>),
}

/// A victim entry handed back to the facade for an optional
/// write-back flush.
#[derive(Debug, Clone)]
pub struct Victim {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expire_time: u32,
    pub flags: u32,
}

pub struct CalcExpunge {
    pub new_num_slots: u32,
    /// (slot directory position, victim payload), old directory
    /// indices — consumed by `do_expunge` to know which occupied
    /// slots to drop during the rebuild.
    pub victims: Vec<(u32, Victim)>,
}

struct LiveEntry {
    position: u32,
    offset: u32,
    header: EntryHeader,
}

const GROWTH_LOAD_FACTOR: f64 = 0.30;
const MAKE_ROOM_TARGET_FACTOR: f64 = 0.60;

/// Phase one: decide which entries to evict and whether the slot
/// directory should grow.
pub fn calc_expunge(cursor: &PageGuard, mode: ExpungeMode, now: u32) -> CalcExpunge {
    let num_slots = cursor.num_slots();

    let mut live = Vec::new();
    for position in 0..num_slots {
        let offset = cursor.slot_get(position);
        if offset > SLOT_TOMBSTONE {
            let header = cursor.entry_header_at(offset);
            live.push(LiveEntry {
                position,
                offset,
                header,
            });
        }
    }

    let is_expired = |e: &LiveEntry| e.header.expire_time != 0 && e.header.expire_time <= now;

    if let ExpungeMode::MakeRoom(Some(len)) = mode {
        let non_tombstone_free = cursor.free_slots() - cursor.old_slots();
        let slot_headroom = non_tombstone_free as f64 / num_slots as f64 > GROWTH_LOAD_FACTOR;
        let needed = layout::round_up4(layout::ENTRY_HEADER_SIZE + len as usize);
        let byte_headroom = cursor.free_bytes() as usize >= needed;
        if slot_headroom && byte_headroom {
            return CalcExpunge {
                new_num_slots: num_slots,
                victims: Vec::new(),
            };
        }
    }

    // Initial victim set, before any LRU sweep.
    let mut victim_positions: HashSet<u32> = match mode {
        ExpungeMode::All => live.iter().map(|e| e.position).collect(),
        ExpungeMode::ExpiredOnly => live
            .iter()
            .filter(|e| is_expired(e))
            .map(|e| e.position)
            .collect(),
        ExpungeMode::MakeRoom(_) => live
            .iter()
            .filter(|e| is_expired(e))
            .map(|e| e.position)
            .collect(),
    };

    let entry_len = |e: &LiveEntry| -> usize {
        layout::entry_record_len(e.header.key_len as usize, e.header.value_len as usize)
    };

    let used_data_after: usize = live
        .iter()
        .filter(|e| !victim_positions.contains(&e.position))
        .map(entry_len)
        .sum();

    let used = num_slots as usize - cursor.free_slots() as usize - victim_positions.len();
    let usable_data_cur = layout::usable_heap(cursor.page_size(), num_slots);
    let growth_feasible = usable_data_cur.saturating_sub(used_data_after)
        >= (num_slots as usize + 1) * 4;
    let load_over = used as f64 / num_slots as f64 > GROWTH_LOAD_FACTOR;
    let is_make_room = matches!(mode, ExpungeMode::MakeRoom(_));

    let new_num_slots = if load_over && (growth_feasible || is_make_room) {
        2 * num_slots + 1
    } else {
        num_slots
    };

    // MAKE_ROOM continues: evict oldest-by-last_access survivors until
    // the page is back under the target load.
    if let ExpungeMode::MakeRoom(_) = mode {
        let mut remaining: Vec<&LiveEntry> = live
            .iter()
            .filter(|e| !victim_positions.contains(&e.position))
            .collect();
        remaining.sort_by(|a, b| {
            a.header
                .last_access
                .cmp(&b.header.last_access)
                .then(a.position.cmp(&b.position))
        });

        let usable_data_new = layout::usable_heap(cursor.page_size(), new_num_slots);
        let target = (MAKE_ROOM_TARGET_FACTOR * usable_data_new as f64) as usize;
        let mut used_data_running = used_data_after;

        for e in remaining {
            if used_data_running <= target {
                break;
            }
            victim_positions.insert(e.position);
            used_data_running -= entry_len(e);
        }
    }

    let victims = live
        .into_iter()
        .filter(|e| victim_positions.contains(&e.position))
        .map(|e| {
            let key = cursor.key_at(e.offset, e.header.key_len).to_vec();
            let value = cursor
                .value_at(e.offset, e.header.key_len, e.header.value_len)
                .to_vec();
            (
                e.position,
                Victim {
                    key,
                    value,
                    expire_time: e.header.expire_time,
                    flags: e.header.flags,
                },
            )
        })
        .collect();

    CalcExpunge {
        new_num_slots,
        victims,
    }
}

/// Phase two: rebuild the page in place with `new_num_slots`, dropping
/// the slots named in `victims` and rehashing every surviving entry by
/// its stored `slot_hash`.
pub fn do_expunge(cursor: &mut PageGuard, new_num_slots: u32, victim_positions: &HashSet<u32>) {
    let num_slots = cursor.num_slots();
    let page_size = cursor.page_size();
    let usable = layout::usable_heap(page_size, new_num_slots);

    let mut new_directory = vec![0u32; new_num_slots as usize];
    let mut new_heap = Vec::with_capacity(usable);
    let heap_base = layout::heap_start(new_num_slots) as u32;
    let mut used = 0u32;

    for position in 0..num_slots {
        let offset = cursor.slot_get(position);
        if offset <= SLOT_TOMBSTONE || victim_positions.contains(&position) {
            continue;
        }

        let header = cursor.entry_header_at(offset);
        let key = cursor.key_at(offset, header.key_len).to_vec();
        let value = cursor
            .value_at(offset, header.key_len, header.value_len)
            .to_vec();

        let seed = header.slot_hash % new_num_slots;
        let mut idx = seed;
        loop {
            if new_directory[idx as usize] == 0 {
                break;
            }
            idx = (idx + 1) % new_num_slots;
        }

        let record_offset = heap_base + new_heap.len() as u32;
        new_heap.extend_from_slice(&header.last_access.to_ne_bytes());
        new_heap.extend_from_slice(&header.expire_time.to_ne_bytes());
        new_heap.extend_from_slice(&header.slot_hash.to_ne_bytes());
        new_heap.extend_from_slice(&header.flags.to_ne_bytes());
        new_heap.extend_from_slice(&header.key_len.to_ne_bytes());
        new_heap.extend_from_slice(&header.value_len.to_ne_bytes());
        new_heap.extend_from_slice(&key);
        new_heap.extend_from_slice(&value);
        let pad = layout::round_up4(new_heap.len()) - new_heap.len();
        new_heap.resize(new_heap.len() + pad, 0);

        new_directory[idx as usize] = record_offset;
        used += 1;
    }

    let new_free_slots = new_num_slots - used;
    cursor.replace_directory_and_heap(new_num_slots, new_free_slots, &new_directory, &new_heap);
}
