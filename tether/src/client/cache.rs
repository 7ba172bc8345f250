//! Per-connection map from handle to the live proxy for it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tether_proto::Handle;

/// Weak map guaranteeing at most one live proxy per handle.
///
/// Entries do not keep proxies alive. A dead entry is removed by the dying
/// proxy itself, or overwritten when the same handle is received again.
#[derive(Debug)]
pub(crate) struct ProxyCache<T> {
    /// Weak entries; dead ones are replaced on lookup.
    entries: HashMap<Handle, Weak<T>>,
}

impl<T> Default for ProxyCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> ProxyCache<T> {
    /// Returns the live value for `handle`, or stores and returns `make()`.
    pub(crate) fn get_or_insert_with(&mut self, handle: Handle, make: impl FnOnce() -> Arc<T>) -> Arc<T> {
        if let Some(live) = self.entries.get(&handle).and_then(Weak::upgrade) {
            return live;
        }
        let fresh = make();
        self.entries.insert(handle, Arc::downgrade(&fresh));
        fresh
    }

    /// Removes the entry for `handle` if it belongs to `dying`.
    ///
    /// Returns `false` when another live value has taken the slot; that value
    /// now owns the server-side reference.
    pub(crate) fn forget(&mut self, handle: Handle, dying: *const T) -> bool {
        match self.entries.get(&handle) {
            Some(w) if !std::ptr::eq(w.as_ptr(), dying) && w.strong_count() > 0 => false,
            Some(_) => {
                self.entries.remove(&handle);
                true
            }
            None => true,
        }
    }

    /// Every value still alive.
    pub(crate) fn live(&self) -> Vec<Arc<T>> {
        self.entries.values().filter_map(Weak::upgrade).collect()
    }

    /// Number of values still alive.
    pub(crate) fn live_count(&self) -> usize {
        self.entries.values().filter(|w| w.strong_count() > 0).count()
    }
}
