//! The page subsystem: binary layout, locking, the typed cursor,
//! slot search, single-entry ops, and the expunge/resize engine.

pub mod cursor;
pub mod expunge;
pub mod layout;
pub mod lock;
pub mod ops;
pub mod slot;
