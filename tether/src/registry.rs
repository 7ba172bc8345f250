//! Server-side table of exported objects.
//!
//! One [`Registry`] is shared by every connection of a server, so a handle
//! released on one connection is gone for all of them. Registration never
//! deduplicates: exporting the same object twice yields two handles, each
//! released independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use tether_proto::Handle;

use crate::error::{Error, Result};
use crate::object::ObjectRef;
use crate::sync::lock;

/// Identifies one accepted connection for ownership tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(clippy::exhaustive_structs)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One exported object.
struct Entry {
    /// The object.
    object: ObjectRef,
    /// Connection the handle was handed to, if tracked.
    owner: Option<ConnId>,
}

/// Mutable registry state.
#[derive(Default)]
struct Inner {
    /// Last handle allocated; handles start at 1.
    last: u64,
    /// Live entries.
    entries: HashMap<Handle, Entry>,
}

/// Maps handles to live exported objects.
#[derive(Default)]
pub struct Registry {
    /// All state sits behind one lock; every operation is a short critical section.
    inner: Mutex<Inner>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports `object` under a fresh handle with no owning connection.
    pub fn register(&self, object: ObjectRef) -> Handle {
        self.insert(object, None)
    }

    /// Exports `object` under a fresh handle owned by `owner`.
    pub fn register_for(&self, object: ObjectRef, owner: ConnId) -> Handle {
        self.insert(object, Some(owner))
    }

    /// Stores `object` under a fresh handle.
    fn insert(&self, object: ObjectRef, owner: Option<ConnId>) -> Handle {
        let mut inner = lock(&self.inner);
        inner.last += 1;
        let handle = Handle(inner.last);
        inner.entries.insert(handle, Entry { object, owner });
        tracing::trace!(%handle, owner = ?owner, "registered object");
        handle
    }

    /// Returns the object behind `handle`.
    pub fn lookup(&self, handle: Handle) -> Result<ObjectRef> {
        lock(&self.inner)
            .entries
            .get(&handle)
            .map(|e| ObjectRef::clone(&e.object))
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Removes `handle`. Fails if it is not registered.
    pub fn release(&self, handle: Handle) -> Result<()> {
        let removed = lock(&self.inner).entries.remove(&handle);
        // The object drops outside the lock; its destructor may be arbitrary.
        match removed {
            Some(_) => Ok(()),
            None => Err(Error::UnknownHandle(handle)),
        }
    }

    /// Removes every handle owned by `owner` and returns how many there were.
    pub fn release_owned_by(&self, owner: ConnId) -> usize {
        let removed: Vec<Entry> = {
            let mut inner = lock(&self.inner);
            let doomed: Vec<Handle> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.owner == Some(owner))
                .map(|(h, _)| *h)
                .collect();
            doomed
                .iter()
                .filter_map(|h| inner.entries.remove(h))
                .collect()
        };
        removed.len()
    }

    /// Returns `true` if `handle` is registered.
    pub fn contains(&self, handle: Handle) -> bool {
        lock(&self.inner).entries.contains_key(&handle)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Returns `true` if nothing is exported.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = lock(&self.inner).entries.keys().copied().collect();
        handles.sort_unstable();
        handles
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::object::Namespace;

    fn obj() -> ObjectRef {
        Namespace::new("o").into_ref()
    }

    #[test]
    fn same_object_gets_distinct_handles() {
        let reg = Registry::new();
        let o = obj();
        let a = reg.register(ObjectRef::clone(&o));
        let b = reg.register(ObjectRef::clone(&o));
        assert_ne!(a, b);

        reg.release(a).unwrap();
        assert!(reg.lookup(a).is_err());
        assert!(Arc::ptr_eq(&reg.lookup(b).unwrap(), &o));
    }

    #[test]
    fn second_release_is_unknown_handle() {
        let reg = Registry::new();
        let h = reg.register(obj());
        assert!(reg.release(h).is_ok());
        assert!(matches!(reg.release(h), Err(Error::UnknownHandle(x)) if x == h));
    }

    #[test]
    fn release_owned_by_only_touches_that_connection() {
        let reg = Registry::new();
        let mine = reg.register_for(obj(), ConnId(1));
        let _also_mine = reg.register_for(obj(), ConnId(1));
        let theirs = reg.register_for(obj(), ConnId(2));
        let shared = reg.register(obj());

        assert_eq!(reg.release_owned_by(ConnId(1)), 2);
        assert!(!reg.contains(mine));
        assert_eq!(reg.handles(), [theirs, shared]);
    }

    #[test]
    fn concurrent_register_release_keeps_exact_set() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 200;

        let reg = Arc::new(Registry::new());
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let mut kept = Vec::new();
                    for i in 0..PER_THREAD {
                        let h = reg.register(obj());
                        if i % 3 == 0 {
                            reg.release(h).unwrap();
                        } else {
                            kept.push(h);
                        }
                    }
                    kept
                })
            })
            .collect();

        let mut expected = BTreeSet::new();
        for w in workers {
            for h in w.join().unwrap() {
                assert!(expected.insert(h), "duplicate handle {h}");
            }
        }
        let actual: BTreeSet<Handle> = reg.handles().into_iter().collect();
        assert_eq!(actual, expected);
    }
}
