//! Single-page read / write / delete: each probes the slot directory
//! once via `find_slot`, then acts on what the probe found.

use crate::page::cursor::PageGuard;
use crate::page::layout::{self, EntryHeader, FLAG_DIRTY, SLOT_TOMBSTONE};
use crate::page::slot::{find_slot, ProbeMode};

/// Result of `read`.
pub enum ReadOutcome {
    Hit { value: Vec<u8>, flags: u32 },
    Miss,
}

/// `read(seed, key) -> (value, flags, found)`.
///
/// On hit, consults `expire_time`; an expired entry is tombstoned in
/// place and reported as a miss. On a live hit, `last_access` is
/// bumped to `now`.
pub fn read(cursor: &mut PageGuard, seed: u32, key: &[u8], now: u32) -> ReadOutcome {
    let found = find_slot(cursor, seed, key, ProbeMode::ReadOrDelete);
    let Some(offset) = found.offset() else {
        return ReadOutcome::Miss;
    };

    let entry = cursor.entry_header_at(offset);
    if entry.expire_time != 0 && now > entry.expire_time {
        tombstone(cursor, found.position);
        return ReadOutcome::Miss;
    }

    let value = cursor.value_at(offset, entry.key_len, entry.value_len).to_vec();
    cursor.set_last_access(offset, now);
    ReadOutcome::Hit {
        value,
        flags: entry.flags,
    }
}

/// `write(seed, key, value, flags) -> stored?`.
///
/// Returns `false` when the page has no room; the facade then falls
/// back to its write-through path.
#[allow(clippy::too_many_arguments)]
pub fn write(
    cursor: &mut PageGuard,
    seed: u32,
    key: &[u8],
    value: &[u8],
    flags: u32,
    expire_time: u32,
    now: u32,
    slot_hash: u32,
) -> bool {
    let found = find_slot(cursor, seed, key, ProbeMode::Insert);

    // A non-empty slot (tombstone, or a live entry for this same key)
    // leaves old_slots one higher than it should be once this write
    // fills the slot back in — either because it was already tombstoned,
    // or because the `tombstone` call below just tombstoned it.
    let was_occupied = !found.is_empty();

    // Overwriting a live entry for this key: tombstone it first so the
    // stale record is not left reachable by a stale offset elsewhere.
    if found.offset().is_some() {
        tombstone(cursor, found.position);
    }

    let kv_len = layout::entry_record_len(key.len(), value.len());
    if (cursor.free_bytes() as usize) < kv_len {
        return false;
    }

    let record_offset = cursor.free_data();

    let header = EntryHeader {
        last_access: now,
        expire_time,
        slot_hash,
        flags,
        key_len: key.len() as u32,
        value_len: value.len() as u32,
    };
    cursor.write_entry(record_offset, &header, key, value);
    cursor.slot_set(found.position, record_offset);

    cursor.set_free_slots(cursor.free_slots() - 1);
    if was_occupied {
        cursor.set_old_slots(cursor.old_slots() - 1);
    }
    cursor.set_free_data(record_offset + kv_len as u32);
    cursor.set_free_bytes(cursor.free_bytes() - kv_len as u32);

    true
}

/// `delete(seed, key) -> (deleted?, flags)`.
pub fn delete(cursor: &mut PageGuard, seed: u32, key: &[u8]) -> (bool, u32) {
    let found = find_slot(cursor, seed, key, ProbeMode::ReadOrDelete);
    let Some(offset) = found.offset() else {
        return (false, 0);
    };
    let entry = cursor.entry_header_at(offset);
    tombstone(cursor, found.position);
    (true, entry.flags)
}

/// Mark a slot tombstoned, bumping `free_slots`/`old_slots`.
fn tombstone(cursor: &mut PageGuard, position: u32) {
    cursor.slot_set(position, SLOT_TOMBSTONE);
    cursor.set_free_slots(cursor.free_slots() + 1);
    cursor.set_old_slots(cursor.old_slots() + 1);
}

/// Mark an already-located entry record dirty (write-back pending).
pub fn mark_dirty(cursor: &mut PageGuard, offset: u32) {
    let mut entry = cursor.entry_header_at(offset);
    entry.flags |= FLAG_DIRTY;
    cursor.set_entry_header_at(offset, &entry);
}
