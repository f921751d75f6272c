//! Embedder-facing configuration: a builder over geometry and policy
//! knobs, validated once before the region it describes is created.

use std::path::PathBuf;

use crate::error::{CacheError, CacheResult};
use crate::page::layout::MIN_SLOTS;
use crate::page::lock::DEFAULT_LOCK_TIMEOUT_SECS;

/// Default path for the shared cache file, a process-wide fallback
/// only — always override per handle in real deployments.
pub const DEFAULT_SHARE_FILE: &str = "/tmp/sharefile";

pub const DEFAULT_NUM_PAGES: u32 = 89;
pub const DEFAULT_PAGE_SIZE: u32 = 64 * 1024;
pub const DEFAULT_START_SLOTS: u32 = 89;

const MIN_PAGE_SIZE: u32 = 4 * 1024;
const MAX_PAGE_SIZE: u32 = 1024 * 1024;

/// `write_action` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    WriteThrough,
    WriteBack,
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub share_file: PathBuf,
    pub init_file: bool,
    pub test_file: bool,
    pub raw_values: bool,
    /// Default per-entry TTL in seconds; 0 disables time expiry.
    pub expire_time: u32,
    pub page_size: u32,
    pub num_pages: u32,
    pub start_slots: u32,
    pub write_action: WriteAction,
    pub cache_not_found: bool,
    pub empty_on_exit: bool,
    pub lock_timeout_secs: u32,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            share_file: PathBuf::from(DEFAULT_SHARE_FILE),
            init_file: false,
            test_file: false,
            raw_values: false,
            expire_time: 0,
            page_size: DEFAULT_PAGE_SIZE,
            num_pages: DEFAULT_NUM_PAGES,
            start_slots: DEFAULT_START_SLOTS,
            write_action: WriteAction::WriteThrough,
            cache_not_found: false,
            empty_on_exit: false,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

/// Builder over `CacheOptions`. Every setter takes `self` by value so
/// calls chain; `cache_size`/`expire_time_str` accept human-friendly
/// suffixed strings ("4k"/"16m", "1m"/"1h"/"1d").
impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn share_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.share_file = path.into();
        self
    }

    pub fn init_file(mut self, v: bool) -> Self {
        self.init_file = v;
        self
    }

    pub fn test_file(mut self, v: bool) -> Self {
        self.test_file = v;
        self
    }

    pub fn raw_values(mut self, v: bool) -> Self {
        self.raw_values = v;
        self
    }

    pub fn expire_time(mut self, seconds: u32) -> Self {
        self.expire_time = seconds;
        self
    }

    /// Accepts `"1m"`/`"1h"`/`"1d"` suffixes, or a bare integer of
    /// seconds.
    pub fn expire_time_str(mut self, spec: &str) -> CacheResult<Self> {
        self.expire_time = parse_duration_secs(spec)?;
        Ok(self)
    }

    pub fn page_size(mut self, bytes: u32) -> Self {
        self.page_size = bytes;
        self
    }

    pub fn num_pages(mut self, n: u32) -> Self {
        self.num_pages = n;
        self
    }

    /// Derives `page_size`/`num_pages` from a total cache size: keeps
    /// the configured `page_size` and grows `num_pages` to cover it.
    pub fn cache_size(mut self, bytes: u64) -> Self {
        let page_size = self.page_size as u64;
        self.num_pages = ((bytes + page_size - 1) / page_size).max(1) as u32;
        self
    }

    pub fn cache_size_str(self, spec: &str) -> CacheResult<Self> {
        let bytes = parse_size_bytes(spec)?;
        Ok(self.cache_size(bytes))
    }

    pub fn start_slots(mut self, n: u32) -> Self {
        self.start_slots = n;
        self
    }

    pub fn write_action(mut self, action: WriteAction) -> Self {
        self.write_action = action;
        self
    }

    pub fn cache_not_found(mut self, v: bool) -> Self {
        self.cache_not_found = v;
        self
    }

    pub fn empty_on_exit(mut self, v: bool) -> Self {
        self.empty_on_exit = v;
        self
    }

    pub fn lock_timeout_secs(mut self, secs: u32) -> Self {
        self.lock_timeout_secs = secs;
        self
    }

    /// Validate geometry, returning `CacheError::ConfigInvalid` on
    /// the first violation found.
    pub fn validate(&self) -> CacheResult<()> {
        if self.share_file.as_os_str().is_empty() {
            return Err(CacheError::ConfigInvalid("share_file is empty".into()));
        }
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(CacheError::ConfigInvalid(format!(
                "page_size {} must be a power of two in [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.num_pages == 0 {
            return Err(CacheError::ConfigInvalid("num_pages must be >= 1".into()));
        }
        if self.start_slots < MIN_SLOTS || self.start_slots > self.page_size / 4 {
            return Err(CacheError::ConfigInvalid(format!(
                "start_slots {} out of bounds for page_size {}",
                self.start_slots, self.page_size
            )));
        }
        Ok(())
    }
}

fn parse_size_bytes(spec: &str) -> CacheResult<u64> {
    parse_suffixed(spec, &[('k', 1024u64), ('m', 1024 * 1024), ('g', 1024 * 1024 * 1024)])
}

fn parse_duration_secs(spec: &str) -> CacheResult<u32> {
    let bytes = parse_suffixed(spec, &[('s', 1u64), ('m', 60), ('h', 3600), ('d', 86400)])?;
    Ok(bytes as u32)
}

fn parse_suffixed(spec: &str, units: &[(char, u64)]) -> CacheResult<u64> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(CacheError::ConfigInvalid("empty size/duration string".into()));
    }
    let last = spec.chars().last().unwrap().to_ascii_lowercase();
    if let Some(&(_, multiplier)) = units.iter().find(|(c, _)| *c == last) {
        let digits = &spec[..spec.len() - 1];
        let n: u64 = digits
            .parse()
            .map_err(|_| CacheError::ConfigInvalid(format!("invalid numeric prefix in {spec:?}")))?;
        Ok(n * multiplier)
    } else {
        spec.parse()
            .map_err(|_| CacheError::ConfigInvalid(format!("invalid size/duration {spec:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_page_size() {
        let opts = CacheOptions::new().page_size(5000);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn parses_suffixed_sizes() {
        assert_eq!(parse_size_bytes("4k").unwrap(), 4096);
        assert_eq!(parse_size_bytes("16m").unwrap(), 16 * 1024 * 1024);
    }

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration_secs("1m").unwrap(), 60);
        assert_eq!(parse_duration_secs("1h").unwrap(), 3600);
        assert_eq!(parse_duration_secs("1d").unwrap(), 86400);
    }

    #[test]
    fn accepts_default_geometry() {
        assert!(CacheOptions::new().validate().is_ok());
    }
}
