//! The cache facade: ties the region, codec, and callbacks together
//! and applies read-through / write-through / write-back policy.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::callbacks::Callbacks;
use crate::codec::{RawCodec, ValueCodec};
use crate::config::{CacheOptions, WriteAction};
use crate::error::{CacheError, CacheResult};
use crate::hash::KeyHash;
use crate::iter::{KeysMode, LiveEntry, PageIterator};
use crate::page::cursor::PageGuard;
use crate::page::expunge::{self, ExpungeMode, Victim};
use crate::page::layout::FLAG_DIRTY;
use crate::page::ops::{self, ReadOutcome};
use crate::region::ShmRegion;

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as u32
}

/// One entry returned by `get_keys`, shaped by the requested `KeysMode`.
#[derive(Debug, Clone)]
pub enum KeysEntry {
    Key(Vec<u8>),
    KeyValue(Vec<u8>, Vec<u8>),
    Full(LiveEntry),
}

/// A process-local handle to an attached cache.
pub struct Cache<C = (), Codec: ValueCodec = RawCodec> {
    region: ShmRegion,
    raw_values: bool,
    default_expire: u32,
    write_action: WriteAction,
    cache_not_found: bool,
    empty_on_exit: bool,
    codec: Codec,
    callbacks: Callbacks<C>,
    /// Tracks the page this handle currently holds locked, if any, so
    /// a recursive call into the cache from inside a critical section
    /// fails fast with `LockReentrancy` instead of deadlocking against
    /// itself.
    locked_page: Cell<Option<u32>>,
}

impl<C, Codec: ValueCodec> Cache<C, Codec> {
    pub fn open(opts: CacheOptions, codec: Codec, callbacks: Callbacks<C>) -> CacheResult<Self> {
        let empty_on_exit = opts.empty_on_exit;
        let region = ShmRegion::attach(&opts)?;
        Ok(Cache {
            region,
            raw_values: opts.raw_values,
            default_expire: opts.expire_time,
            write_action: opts.write_action,
            cache_not_found: opts.cache_not_found,
            empty_on_exit,
            codec,
            callbacks,
            locked_page: Cell::new(None),
        })
    }

    fn encode(&self, value: &[u8]) -> Vec<u8> {
        if self.raw_values {
            value.to_vec()
        } else {
            self.codec.encode(value)
        }
    }

    fn decode(&self, bytes: &[u8]) -> Vec<u8> {
        if self.raw_values {
            bytes.to_vec()
        } else {
            self.codec.decode(bytes)
        }
    }

    fn absolute_expire(&self, now: u32) -> u32 {
        if self.default_expire == 0 {
            0
        } else {
            now + self.default_expire
        }
    }

    fn invoke_write_cb(&self, key: &[u8], value: &[u8]) -> CacheResult<()> {
        match &self.callbacks.write_cb {
            Some(cb) => cb(&self.callbacks.context, key, value),
            None => Ok(()),
        }
    }

    fn invoke_delete_cb(&self, key: &[u8]) -> CacheResult<()> {
        match &self.callbacks.delete_cb {
            Some(cb) => cb(&self.callbacks.context, key),
            None => Ok(()),
        }
    }

    /// Flush dirty eviction victims through the write-back hook.
    /// Failures are logged and swallowed: an eviction is a side effect
    /// of whatever operation triggered it, not something that
    /// operation's caller asked for directly.
    fn flush_victims(&self, victims: Vec<Victim>) {
        for v in victims.into_iter().filter(|v| v.flags & FLAG_DIRTY != 0) {
            if let Err(e) = self.invoke_write_cb(&v.key, &v.value) {
                log::error!("write-back flush failed for evicted key: {e}");
            }
        }
    }

    /// Run sized admission ahead of a write, appending any victims
    /// produced to `sink` for the caller to flush once unlocked.
    /// `key_value_len` is the raw `key.len() + value.len()`, with no
    /// entry-header or rounding added — `calc_expunge` applies both.
    fn make_room_for(
        &self,
        guard: &mut PageGuard,
        key_value_len: usize,
        now: u32,
        sink: &mut Vec<Victim>,
    ) {
        let calc = expunge::calc_expunge(guard, ExpungeMode::MakeRoom(Some(key_value_len as u32)), now);
        if calc.new_num_slots != guard.num_slots() || !calc.victims.is_empty() {
            let positions: HashSet<u32> = calc.victims.iter().map(|(p, _)| *p).collect();
            sink.extend(calc.victims.into_iter().map(|(_, v)| v));
            expunge::do_expunge(guard, calc.new_num_slots, &positions);
        }
    }

    /// Acquire `page_idx`'s lock, run `f`, then release it. Rejects a
    /// recursive call into the cache while this handle already holds
    /// a lock.
    fn with_page_lock<T>(
        &self,
        page_idx: u32,
        f: impl FnOnce(&mut PageGuard) -> CacheResult<T>,
    ) -> CacheResult<T> {
        if self.locked_page.get().is_some() {
            return Err(CacheError::LockReentrancy { page: page_idx });
        }
        self.locked_page.set(Some(page_idx));
        let outcome = (|| {
            let mut guard = self.region.lock_page(page_idx)?;
            let value = f(&mut guard)?;
            guard.unlock()?;
            Ok(value)
        })();
        self.locked_page.set(None);
        outcome
    }

    fn page_for(&self, key: &[u8]) -> (KeyHash, u32, u32) {
        let num_pages = self.region.num_pages();
        let hash = KeyHash::compute(key);
        (hash, hash.page_index(num_pages), hash.slot_seed(num_pages))
    }

    /// Read-through get. On a miss, if `read_cb` is registered, it is
    /// invoked under the page lock; a returned value (or a registered
    /// "not found" memoisation) is admitted into the slot the miss
    /// located.
    pub fn get(&self, key: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        let (hash, page_idx, seed) = self.page_for(key);
        let now = now_secs();
        let mut victims = Vec::new();

        let result = self.with_page_lock(page_idx, |guard| match ops::read(guard, seed, key, now) {
            ReadOutcome::Hit { value, .. } => Ok(Some(self.decode(&value))),
            ReadOutcome::Miss => {
                let Some(cb) = &self.callbacks.read_cb else {
                    return Ok(None);
                };
                match cb(&self.callbacks.context, key)? {
                    Some(raw) => {
                        let encoded = self.encode(&raw);
                        self.make_room_for(guard, key.len() + encoded.len(), now, &mut victims);
                        let expire_time = self.absolute_expire(now);
                        ops::write(guard, seed, key, &encoded, 0, expire_time, now, hash.raw());
                        Ok(Some(raw))
                    }
                    None => {
                        if self.cache_not_found {
                            self.make_room_for(guard, key.len(), now, &mut victims);
                            ops::write(guard, seed, key, &[], 0, now, now, hash.raw());
                        }
                        Ok(None)
                    }
                }
            }
        })?;

        self.flush_victims(victims);
        Ok(result)
    }

    /// Stores `value` under `key`. Writes with the DIRTY flag when
    /// write-back is enabled. If the write did not fit, or write-back
    /// is disabled, `write_cb` is invoked with the value just set.
    pub fn set(&self, key: &[u8], value: &[u8]) -> CacheResult<bool> {
        let (hash, page_idx, seed) = self.page_for(key);
        let now = now_secs();
        let encoded = self.encode(value);
        let expire_time = self.absolute_expire(now);
        let flags = if self.write_action == WriteAction::WriteBack {
            FLAG_DIRTY
        } else {
            0
        };

        let mut victims = Vec::new();
        let wrote = self.with_page_lock(page_idx, |guard| {
            self.make_room_for(guard, key.len() + encoded.len(), now, &mut victims);
            Ok(ops::write(guard, seed, key, &encoded, flags, expire_time, now, hash.raw()))
        })?;
        self.flush_victims(victims);

        if !wrote || self.write_action == WriteAction::WriteThrough {
            self.invoke_write_cb(key, &encoded)?;
        }
        Ok(wrote)
    }

    /// Atomic read-modify-write: computes `f(key, current)` under the
    /// same page lock the read used, so no other process can observe
    /// or race the transform.
    pub fn get_and_set(
        &self,
        key: &[u8],
        f: impl FnOnce(&[u8], Option<&[u8]>) -> Vec<u8>,
    ) -> CacheResult<Vec<u8>> {
        let (hash, page_idx, seed) = self.page_for(key);
        let now = now_secs();
        let flags = if self.write_action == WriteAction::WriteBack {
            FLAG_DIRTY
        } else {
            0
        };
        let expire_time = self.absolute_expire(now);

        let mut victims = Vec::new();
        let (new_value, encoded, wrote) = self.with_page_lock(page_idx, |guard| {
            let current = match ops::read(guard, seed, key, now) {
                ReadOutcome::Hit { value, .. } => Some(self.decode(&value)),
                ReadOutcome::Miss => None,
            };
            let new_value = f(key, current.as_deref());
            let encoded = self.encode(&new_value);
            self.make_room_for(guard, key.len() + encoded.len(), now, &mut victims);
            let wrote = ops::write(guard, seed, key, &encoded, flags, expire_time, now, hash.raw());
            Ok((new_value, encoded, wrote))
        })?;
        self.flush_victims(victims);

        if !wrote || self.write_action == WriteAction::WriteThrough {
            self.invoke_write_cb(key, &encoded)?;
        }
        Ok(new_value)
    }

    /// Removes `key`. Invokes `delete_cb` if an entry was actually
    /// removed.
    pub fn remove(&self, key: &[u8]) -> CacheResult<bool> {
        let (_, page_idx, seed) = self.page_for(key);
        let (deleted, _flags) = self.with_page_lock(page_idx, |guard| Ok(ops::delete(guard, seed, key)))?;
        if deleted {
            self.invoke_delete_cb(key)?;
        }
        Ok(deleted)
    }

    /// Expunges every entry on every page. No callbacks are invoked.
    pub fn clear(&self) -> CacheResult<()> {
        self.expunge_all_pages(ExpungeMode::All, None)
    }

    /// Expunges only expired entries on every page. No callbacks are
    /// invoked.
    pub fn purge(&self) -> CacheResult<()> {
        self.expunge_all_pages(ExpungeMode::ExpiredOnly, None)
    }

    /// Expunges every page (`only_expired` selects `ExpiredOnly` vs.
    /// `All`) and flushes every dirty victim through `write_cb`.
    pub fn empty(&self, only_expired: bool) -> CacheResult<()> {
        let mode = if only_expired {
            ExpungeMode::ExpiredOnly
        } else {
            ExpungeMode::All
        };
        let mut all_victims = Vec::new();
        self.expunge_all_pages(mode, Some(&mut all_victims))?;
        self.flush_victims(all_victims);
        Ok(())
    }

    fn expunge_all_pages(&self, mode: ExpungeMode, mut sink: Option<&mut Vec<Victim>>) -> CacheResult<()> {
        let now = now_secs();
        for idx in 0..self.region.num_pages() {
            let mut page_victims = Vec::new();
            self.with_page_lock(idx, |guard| {
                let calc = expunge::calc_expunge(guard, mode, now);
                if calc.new_num_slots != guard.num_slots() || !calc.victims.is_empty() {
                    let positions: HashSet<u32> = calc.victims.iter().map(|(p, _)| *p).collect();
                    page_victims.extend(calc.victims.into_iter().map(|(_, v)| v));
                    expunge::do_expunge(guard, calc.new_num_slots, &positions);
                }
                Ok(())
            })?;
            if let Some(sink) = sink.as_deref_mut() {
                sink.extend(page_victims);
            }
        }
        Ok(())
    }

    /// Full iteration, materializing as much of each entry as `mode`
    /// requests.
    pub fn get_keys(&self, mode: KeysMode) -> CacheResult<Vec<KeysEntry>> {
        let mut out = Vec::new();
        for entry in PageIterator::new(&self.region) {
            let entry = entry?;
            out.push(match mode {
                KeysMode::KeysOnly => KeysEntry::Key(entry.key),
                KeysMode::KeysAndValues => {
                    let value = self.decode(&entry.value);
                    KeysEntry::KeyValue(entry.key, value)
                }
                KeysMode::Full => {
                    let value = self.decode(&entry.value);
                    KeysEntry::Full(LiveEntry { value, ..entry })
                }
            });
        }
        Ok(out)
    }

    /// Reads every subkey that hashes to `page_key`'s page under a
    /// single page lock.
    pub fn multi_get(&self, page_key: &[u8], subkeys: &[Vec<u8>]) -> CacheResult<HashMap<Vec<u8>, Vec<u8>>> {
        let num_pages = self.region.num_pages();
        let page_idx = KeyHash::compute(page_key).page_index(num_pages);
        let now = now_secs();

        self.with_page_lock(page_idx, |guard| {
            let mut out = HashMap::new();
            for k in subkeys {
                let seed = KeyHash::compute(k).slot_seed(num_pages);
                if let ReadOutcome::Hit { value, .. } = ops::read(guard, seed, k, now) {
                    out.insert(k.clone(), self.decode(&value));
                }
            }
            Ok(out)
        })
    }

    /// Writes every entry in `entries` under a single page lock
    /// scoped to `page_key`'s page.
    pub fn multi_set(&self, page_key: &[u8], entries: &HashMap<Vec<u8>, Vec<u8>>) -> CacheResult<()> {
        let num_pages = self.region.num_pages();
        let page_idx = KeyHash::compute(page_key).page_index(num_pages);
        let now = now_secs();
        let expire_time = self.absolute_expire(now);
        let flags = if self.write_action == WriteAction::WriteBack {
            FLAG_DIRTY
        } else {
            0
        };

        let mut victims = Vec::new();
        let mut write_through = Vec::new();
        self.with_page_lock(page_idx, |guard| {
            for (k, v) in entries {
                let encoded = self.encode(v);
                let seed = KeyHash::compute(k).slot_seed(num_pages);
                self.make_room_for(guard, k.len() + encoded.len(), now, &mut victims);
                let wrote = ops::write(
                    guard,
                    seed,
                    k,
                    &encoded,
                    flags,
                    expire_time,
                    now,
                    KeyHash::compute(k).raw(),
                );
                if !wrote || self.write_action == WriteAction::WriteThrough {
                    write_through.push((k.clone(), encoded));
                }
            }
            Ok(())
        })?;
        self.flush_victims(victims);

        for (k, v) in write_through {
            self.invoke_write_cb(&k, &v)?;
        }
        Ok(())
    }
}

impl<C> Cache<C, RawCodec> {
    pub fn open_raw(opts: CacheOptions, callbacks: Callbacks<C>) -> CacheResult<Self> {
        Cache::open(opts, RawCodec, callbacks)
    }
}

impl<C, Codec: ValueCodec> Drop for Cache<C, Codec> {
    fn drop(&mut self) {
        if self.empty_on_exit {
            if let Err(e) = self.empty(false) {
                log::error!("empty_on_exit failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::Callbacks;

    fn test_opts(dir: &tempfile::TempDir, name: &str) -> CacheOptions {
        CacheOptions::new()
            .share_file(dir.path().join(name))
            .init_file(true)
            .page_size(4096)
            .num_pages(4)
            .start_slots(89)
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<()> = Cache::open_raw(test_opts(&dir, "a"), Callbacks::default()).unwrap();
        assert!(cache.set(b"hello", b"world").unwrap());
        assert_eq!(cache.get(b"hello").unwrap(), Some(b"world".to_vec()));
        assert_eq!(cache.get(b"missing").unwrap(), None);
    }

    #[test]
    fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<()> = Cache::open_raw(test_opts(&dir, "b"), Callbacks::default()).unwrap();
        cache.set(b"k", b"v").unwrap();
        assert!(cache.remove(b"k").unwrap());
        assert_eq!(cache.get(b"k").unwrap(), None);
        assert!(!cache.remove(b"k").unwrap());
    }

    #[test]
    fn expired_entries_read_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = test_opts(&dir, "c");
        opts.expire_time = 0;
        let cache: Cache<()> = Cache::open_raw(opts, Callbacks::default()).unwrap();
        let (_, page_idx, seed) = cache.page_for(b"k");
        cache
            .with_page_lock(page_idx, |guard| {
                ops::write(guard, seed, b"k", b"v", 0, 1, 1, 0);
                Ok(())
            })
            .unwrap();
        assert_eq!(cache.get(b"k").unwrap(), None);
    }

    #[test]
    fn get_and_set_is_atomic_rmw() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<()> = Cache::open_raw(test_opts(&dir, "d"), Callbacks::default()).unwrap();
        cache.set(b"counter", b"1").unwrap();
        let updated = cache
            .get_and_set(b"counter", |_k, current| {
                let n: i32 = current
                    .and_then(|b| std::str::from_utf8(b).ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                (n + 1).to_string().into_bytes()
            })
            .unwrap();
        assert_eq!(updated, b"2".to_vec());
    }

    #[test]
    fn reentrant_call_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<()> = Cache::open_raw(test_opts(&dir, "e"), Callbacks::default()).unwrap();
        let (_, page_idx, _) = cache.page_for(b"k");
        let result = cache.with_page_lock(page_idx, |_guard| {
            cache.with_page_lock(page_idx, |_guard2| Ok(()))
        });
        assert!(matches!(result, Err(CacheError::LockReentrancy { .. })));
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<()> = Cache::open_raw(test_opts(&dir, "f"), Callbacks::default()).unwrap();
        cache.set(b"a", b"1").unwrap();
        cache.set(b"b", b"2").unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.get(b"a").unwrap(), None);
        assert_eq!(cache.get(b"b").unwrap(), None);
    }

    #[test]
    fn multi_get_and_set_share_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Cache<()> = Cache::open_raw(test_opts(&dir, "g"), Callbacks::default()).unwrap();
        let mut entries = HashMap::new();
        entries.insert(b"sub1".to_vec(), b"v1".to_vec());
        entries.insert(b"sub2".to_vec(), b"v2".to_vec());
        cache.multi_set(b"group", &entries).unwrap();

        let fetched = cache
            .multi_get(b"group", &[b"sub1".to_vec(), b"sub2".to_vec(), b"sub3".to_vec()])
            .unwrap();
        assert_eq!(fetched.get(b"sub1".as_slice()), Some(&b"v1".to_vec()));
        assert_eq!(fetched.get(b"sub2".as_slice()), Some(&b"v2".to_vec()));
        assert_eq!(fetched.get(b"sub3".as_slice()), None);
    }
}
