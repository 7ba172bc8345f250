//! Conversion between native values and wire values on the server side.

use std::sync::Arc;

use tether_proto::{Handle, WireValue};

use crate::error::Result;
use crate::native::{Collection, Native, SharedList};
use crate::object::ObjectRef;
use crate::registry::{ConnId, Registry};

/// Marshals values for one connection.
///
/// Every object that leaves the server is registered under a fresh handle
/// tagged with the receiving connection.
pub(crate) struct Marshaler<'a> {
    /// Where exported objects are registered.
    registry: &'a Registry,
    /// Connection that owns new handles.
    owner: ConnId,
    /// Copy lists instead of exporting them.
    lists_by_value: bool,
    /// Nesting limit for lists sent by value.
    max_depth: usize,
}

impl<'a> Marshaler<'a> {
    /// Creates a marshaler for one connection.
    pub(crate) const fn new(
        registry: &'a Registry,
        owner: ConnId,
        lists_by_value: bool,
        max_depth: usize,
    ) -> Self {
        Self {
            registry,
            owner,
            lists_by_value,
            max_depth,
        }
    }

    /// Converts a native value into its wire form, exporting what cannot be copied.
    pub(crate) fn wrap(&self, value: &Native) -> WireValue {
        self.wrap_at(value, 0)
    }

    /// Wraps `value` found at nesting `depth`.
    fn wrap_at(&self, value: &Native, depth: usize) -> WireValue {
        match value {
            Native::Unit => WireValue::Unit,
            Native::Bool(b) => WireValue::Bool(*b),
            Native::Int(n) => WireValue::Int(*n),
            Native::Float(x) => WireValue::Float(*x),
            Native::Str(s) => WireValue::Str(s.clone()),
            Native::Tuple(items) => {
                WireValue::Tuple(items.iter().map(|v| self.wrap_at(v, depth + 1)).collect())
            }
            // A list that contains itself is cut off at max_depth by exporting
            // the innermost copy as a handle.
            Native::List(list) if self.lists_by_value && depth + 1 < self.max_depth => {
                WireValue::List(
                    list.snapshot()
                        .iter()
                        .map(|v| self.wrap_at(v, depth + 1))
                        .collect(),
                )
            }
            Native::List(list) => self.export(Arc::new(list.clone())),
            Native::Set(items) => self.export(Arc::new(Collection::set(items.clone()))),
            Native::Map(pairs) => self.export(Arc::new(Collection::map(pairs.clone()))),
            Native::Object(object) => self.export(ObjectRef::clone(object)),
        }
    }

    /// Registers `object` and returns its handle.
    fn export(&self, object: ObjectRef) -> WireValue {
        WireValue::Handle(self.registry.register_for(object, self.owner))
    }

    /// Converts a wire value received from the client into a native value.
    ///
    /// Fails with [`Error::UnknownHandle`](crate::Error::UnknownHandle) if a
    /// handle anywhere inside `value` is not registered.
    pub(crate) fn unwrap(&self, value: WireValue) -> Result<Native> {
        Ok(match value {
            WireValue::Unit => Native::Unit,
            WireValue::Bool(b) => Native::Bool(b),
            WireValue::Int(n) => Native::Int(n),
            WireValue::Float(x) => Native::Float(x),
            WireValue::Str(s) => Native::Str(s),
            WireValue::Tuple(items) => Native::Tuple(self.unwrap_all(items)?),
            WireValue::List(items) => Native::List(SharedList::new(self.unwrap_all(items)?)),
            WireValue::Set(items) => Native::Set(self.unwrap_all(items)?),
            WireValue::Map(pairs) => Native::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| Ok((self.unwrap(k)?, self.unwrap(v)?)))
                    .collect::<Result<_>>()?,
            ),
            WireValue::Handle(handle) => self.resolve(handle)?,
        })
    }

    /// Unwraps every item.
    fn unwrap_all(&self, items: Vec<WireValue>) -> Result<Vec<Native>> {
        items.into_iter().map(|v| self.unwrap(v)).collect()
    }

    /// Looks up an incoming handle, unwrapping lists to the list itself.
    fn resolve(&self, handle: Handle) -> Result<Native> {
        let object = self.registry.lookup(handle)?;
        Ok(object.as_list().map_or(Native::Object(object), Native::List))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::object::Namespace;

    #[test]
    fn scalars_and_tuples_copy() {
        let reg = Registry::new();
        let m = Marshaler::new(&reg, ConnId(1), false, 16);
        let v = Native::tuple([Native::Int(1), Native::from("a"), Native::Unit]);
        assert_eq!(
            m.wrap(&v),
            WireValue::Tuple(vec![1i64.into(), "a".into(), WireValue::Unit])
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn list_handle_unwraps_to_the_same_list() {
        let reg = Registry::new();
        let m = Marshaler::new(&reg, ConnId(1), false, 16);
        let list = SharedList::new(vec![Native::Int(7)]);
        let WireValue::Handle(h) = m.wrap(&Native::List(list.clone())) else {
            panic!("lists go by handle");
        };
        let Native::List(back) = m.unwrap(WireValue::Handle(h)).unwrap() else {
            panic!("handle unwraps to a list");
        };
        assert!(back.ptr_eq(&list));
    }

    #[test]
    fn lists_by_value_copy_and_self_reference_terminates() {
        let reg = Registry::new();
        let m = Marshaler::new(&reg, ConnId(1), true, 8);
        let list = SharedList::new(vec![Native::Int(1)]);
        list.push(Native::List(list.clone()));

        let mut wire = m.wrap(&Native::List(list));
        let mut levels = 0;
        while let WireValue::List(mut items) = wire {
            levels += 1;
            wire = items.pop().unwrap();
        }
        assert!(matches!(wire, WireValue::Handle(_)));
        assert_eq!(levels, 7);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn objects_and_maps_are_exported_to_the_owner() {
        let reg = Registry::new();
        let m = Marshaler::new(&reg, ConnId(4), false, 16);
        m.wrap(&Native::Object(Namespace::new("n").into_ref()));
        m.wrap(&Native::Map(vec![(Native::Int(1), Native::Int(2))]));
        assert_eq!(reg.release_owned_by(ConnId(4)), 2);
    }

    #[test]
    fn unknown_handle_fails_unwrap() {
        let reg = Registry::new();
        let m = Marshaler::new(&reg, ConnId(1), false, 16);
        let nested = WireValue::Tuple(vec![WireValue::Handle(Handle(99))]);
        assert!(matches!(m.unwrap(nested), Err(Error::UnknownHandle(Handle(99)))));
    }

    #[test]
    fn incoming_list_becomes_a_fresh_shared_list() {
        let reg = Registry::new();
        let m = Marshaler::new(&reg, ConnId(1), false, 16);
        let Native::List(l) = m.unwrap(WireValue::List(vec![1i64.into()])).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(l.snapshot(), [Native::Int(1)]);
    }
}
