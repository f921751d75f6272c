//! Read-through / write-back / delete hook slots.
//!
//! Each hook is a boxed closure receiving the opaque `context` value
//! as its first argument; the core never inspects `context`, only
//! passes it through. Hooks run outside the page lock except the
//! read-through hook, which runs under it (so its result can be
//! admitted into the same slot the miss located).

use crate::error::CacheResult;

pub type ReadCallback<C> = Box<dyn Fn(&C, &[u8]) -> CacheResult<Option<Vec<u8>>> + Send + Sync>;
pub type WriteCallback<C> = Box<dyn Fn(&C, &[u8], &[u8]) -> CacheResult<()> + Send + Sync>;
pub type DeleteCallback<C> = Box<dyn Fn(&C, &[u8]) -> CacheResult<()> + Send + Sync>;

/// The embedder's opaque passthrough value plus its three hook slots.
/// Any of the hooks may be absent; the facade only invokes a hook
/// that is registered.
pub struct Callbacks<C> {
    pub context: C,
    pub read_cb: Option<ReadCallback<C>>,
    pub write_cb: Option<WriteCallback<C>>,
    pub delete_cb: Option<DeleteCallback<C>>,
}

impl<C> Callbacks<C> {
    pub fn new(context: C) -> Self {
        Callbacks {
            context,
            read_cb: None,
            write_cb: None,
            delete_cb: None,
        }
    }

    pub fn with_read_cb(mut self, f: ReadCallback<C>) -> Self {
        self.read_cb = Some(f);
        self
    }

    pub fn with_write_cb(mut self, f: WriteCallback<C>) -> Self {
        self.write_cb = Some(f);
        self
    }

    pub fn with_delete_cb(mut self, f: DeleteCallback<C>) -> Self {
        self.delete_cb = Some(f);
        self
    }
}

impl Default for Callbacks<()> {
    fn default() -> Self {
        Callbacks::new(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn read_cb_receives_context_and_key() {
        let calls = AtomicUsize::new(0);
        let cbs = Callbacks::new(calls).with_read_cb(Box::new(|ctx, key| {
            ctx.fetch_add(1, Ordering::SeqCst);
            Ok(if key == b"k" { Some(b"v".to_vec()) } else { None })
        }));
        let result = (cbs.read_cb.as_ref().unwrap())(&cbs.context, b"k").unwrap();
        assert_eq!(result, Some(b"v".to_vec()));
        assert_eq!(cbs.context.load(Ordering::SeqCst), 1);
    }
}
