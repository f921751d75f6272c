//! Shared-memory key/value cache backed by a single memory-mapped
//! file. Multiple cooperating processes on one host attach to the
//! same file and coordinate access through per-page advisory locks;
//! capacity is managed automatically by an LRU policy with optional
//! time-based expiration.

pub mod cache;
pub mod callbacks;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod iter;
pub mod page;
pub mod region;

pub use cache::{Cache, KeysEntry};
pub use callbacks::Callbacks;
pub use codec::{RawCodec, TaggedValue, ValueCodec};
pub use config::{CacheOptions, WriteAction};
pub use error::{CacheError, CacheResult};
pub use hash::KeyHash;
pub use iter::{KeysMode, LiveEntry, PageIterator};
pub use region::ShmRegion;
