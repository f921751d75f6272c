//! Shared memory region: the flat file of `N * page_size` bytes and
//! its mmap. Each of the `num_pages` pages is initialized and locked
//! independently; there is no region-wide header or lock.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use memmap2::MmapMut;

use crate::config::CacheOptions;
use crate::error::{CacheError, CacheResult};
use crate::page::cursor::{self, PageGuard};
use crate::page::lock;

pub struct ShmRegion {
    mmap: MmapMut,
    file: File,
    page_size: u32,
    num_pages: u32,
    lock_timeout_secs: u32,
}

impl ShmRegion {
    /// Open (or create) the share file at `opts.share_file`, mapping
    /// it and initializing pages as required by `init_file`/geometry
    /// mismatch/new file, then running the optional `test_file`
    /// integrity sweep.
    pub fn attach(opts: &CacheOptions) -> CacheResult<Self> {
        opts.validate()?;

        let page_size = opts.page_size;
        let num_pages = opts.num_pages;
        let total_size = page_size as u64 * num_pages as u64;

        let existed = opts.share_file.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&opts.share_file)?;

        let needs_init = opts.init_file || !existed || file.metadata()?.len() != total_size;
        if needs_init {
            file.set_len(total_size)?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let region = ShmRegion {
            mmap,
            file,
            page_size,
            num_pages,
            lock_timeout_secs: opts.lock_timeout_secs,
        };

        if needs_init {
            for idx in 0..num_pages {
                region.init_page(idx, opts.start_slots);
            }
        } else if opts.test_file {
            region.test_and_repair(opts.start_slots)?;
        }

        Ok(region)
    }

    /// Create a region from an already-open, already-sized file
    /// without touching the filesystem. Used by tests.
    pub fn from_file(file: File, page_size: u32, num_pages: u32, lock_timeout_secs: u32) -> io::Result<Self> {
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(ShmRegion {
            mmap,
            file,
            page_size,
            num_pages,
            lock_timeout_secs,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Acquire the advisory lock for page `idx` and return a typed
    /// cursor over its bytes.
    pub fn lock_page(&self, idx: u32) -> CacheResult<PageGuard<'_>> {
        if idx >= self.num_pages {
            return Err(CacheError::ConfigInvalid(format!(
                "page index {idx} out of range (num_pages={})",
                self.num_pages
            )));
        }

        let fd = self.file.as_raw_fd();
        lock::lock_page(fd, idx, self.page_size as u64, self.lock_timeout_secs)?;

        // Safety: the fcntl byte-range lock above is this process's
        // only way to access `[idx*page_size, (idx+1)*page_size)`
        // cooperatively with peers; the raw pointer is only ever read
        // through the `PageGuard` born from it.
        let base = self.mmap.as_ptr() as *mut u8;
        let page_ptr = unsafe { base.add(idx as usize * self.page_size as usize) };
        let bytes: &mut [u8] =
            unsafe { std::slice::from_raw_parts_mut(page_ptr, self.page_size as usize) };

        match PageGuard::attach(bytes, fd, idx) {
            Ok(guard) => Ok(guard),
            Err(e) => {
                let _ = lock::unlock_page(fd, idx, self.page_size as u64);
                Err(e)
            }
        }
    }

    fn page_slice_mut(&self, idx: u32) -> &mut [u8] {
        let base = self.mmap.as_ptr() as *mut u8;
        let page_ptr = unsafe { base.add(idx as usize * self.page_size as usize) };
        unsafe { std::slice::from_raw_parts_mut(page_ptr, self.page_size as usize) }
    }

    fn init_page(&self, idx: u32, start_slots: u32) {
        let bytes = self.page_slice_mut(idx);
        bytes.fill(0);
        // Construct a throwaway guard purely to reuse `reinitialize`'s
        // header-writing logic; the page is all zeros so `attach`'s
        // validation would reject it, so we bypass it here.
        let mut guard = unsafe { cursor::PageGuard::new_uninitialized(bytes, self.file.as_raw_fd(), idx) };
        guard.reinitialize(start_slots);
        let _ = guard.unlock();
    }

    /// Lock every page, validate it, and reinitialize any page that
    /// fails I1-I3/I5.
    fn test_and_repair(&self, start_slots: u32) -> CacheResult<()> {
        let fd = self.file.as_raw_fd();
        for idx in 0..self.num_pages {
            lock::lock_page(fd, idx, self.page_size as u64, self.lock_timeout_secs)?;
            let bytes = self.page_slice_mut(idx);
            match cursor::validate(bytes, idx) {
                Ok(_) => {
                    let _ = lock::unlock_page(fd, idx, self.page_size as u64);
                }
                Err(_) => {
                    log::warn!("page {idx} failed integrity check on attach; reinitializing");
                    let mut guard =
                        unsafe { cursor::PageGuard::new_uninitialized(bytes, fd, idx) };
                    guard.reinitialize(start_slots);
                    guard.unlock()?;
                }
            }
        }
        Ok(())
    }

    pub fn remove_share_file(path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
