//! Per-page blocking advisory byte-range lock with a restorable soft
//! alarm timeout. Each page gets its own `fcntl`/`F_SETLKW` byte
//! range so unrelated pages never contend with each other.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::{CacheError, CacheResult};

/// Default soft-alarm timeout for lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u32 = 10;

static ALARM_FIRED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(_sig: libc::c_int) {
    ALARM_FIRED.store(true, Ordering::SeqCst);
}

/// Acquire an exclusive advisory lock over page `page_idx`'s byte
/// range `[page_idx*page_size, (page_idx+1)*page_size)` of `fd`.
///
/// Blocking, with a soft alarm installed around the blocking call. A
/// signal other than the alarm retries the lock with the alarm's
/// remaining budget restored; the alarm itself fails the call with
/// `LockTimeout` and restores the prior `SIGALRM` handler.
pub fn lock_page(fd: RawFd, page_idx: u32, page_size: u64, timeout_secs: u32) -> CacheResult<()> {
    let start = page_idx as i64 * page_size as i64;
    let len = page_size as i64;

    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = libc::F_WRLCK as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = start;
    fl.l_len = len;

    let prev_handler = unsafe { libc::signal(libc::SIGALRM, on_alarm as usize) };
    if prev_handler == libc::SIG_ERR {
        return Err(CacheError::IoFailed(io::Error::last_os_error()));
    }

    ALARM_FIRED.store(false, Ordering::SeqCst);
    let wait_start = Instant::now();
    unsafe {
        libc::alarm(timeout_secs as libc::c_uint);
    }

    let result = loop {
        let ret = unsafe { libc::fcntl(fd, libc::F_SETLKW, &mut fl as *mut libc::flock) };
        if ret == 0 {
            break Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            if ALARM_FIRED.swap(false, Ordering::SeqCst) {
                break Err(CacheError::LockTimeout {
                    page: page_idx,
                    timeout_secs,
                });
            }
            // Interrupted by some other signal: retry with the
            // remaining alarm budget restored.
            let elapsed = wait_start.elapsed().as_secs() as u32;
            let remaining = timeout_secs.saturating_sub(elapsed).max(1);
            unsafe {
                libc::alarm(remaining);
            }
            continue;
        }

        break Err(CacheError::IoFailed(err));
    };

    unsafe {
        libc::alarm(0);
        libc::signal(libc::SIGALRM, prev_handler);
    }

    result
}

/// Release the advisory lock over page `page_idx`.
pub fn unlock_page(fd: RawFd, page_idx: u32, page_size: u64) -> CacheResult<()> {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = libc::F_UNLCK as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = page_idx as i64 * page_size as i64;
    fl.l_len = page_size as i64;

    let ret = unsafe { libc::fcntl(fd, libc::F_SETLK, &mut fl as *mut libc::flock) };
    if ret != 0 {
        return Err(CacheError::IoFailed(io::Error::last_os_error()));
    }
    Ok(())
}
