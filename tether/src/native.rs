//! Server-side native values.

use std::fmt;
use std::sync::{Arc, Mutex};

use tether_proto::FaultInfo;

use crate::object::{NativeFn, ObjectRef, RemoteObject};
use crate::sync::lock;

/// A value as seen by server-side capabilities.
///
/// Scalars, tuples, sets and maps are plain owned data. Lists are shared
/// mutable objects so that every holder observes the same contents, and
/// [`Native::Object`] holds any exportable object.
#[derive(Debug, Clone)]
// Mirrors the wire value set; capability code matches it exhaustively.
#[allow(clippy::exhaustive_enums)]
pub enum Native {
    /// Absence of a value.
    Unit,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// Text.
    Str(String),
    /// Fixed-arity sequence.
    Tuple(Vec<Self>),
    /// Shared mutable list.
    List(SharedList),
    /// Unordered elements.
    Set(Vec<Self>),
    /// Key/value pairs.
    Map(Vec<(Self, Self)>),
    /// Any other object.
    Object(ObjectRef),
}

impl Native {
    /// Builds a tuple.
    pub fn tuple(items: impl IntoIterator<Item = Self>) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    /// Builds a new shared list.
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(SharedList::new(items.into_iter().collect()))
    }

    /// Builds a callable object.
    pub fn function(
        name: impl Into<String>,
        body: impl Fn(Vec<Self>) -> Result<Self, FaultInfo> + Send + Sync + 'static,
    ) -> Self {
        Self::Object(Arc::new(NativeFn::new(name, body)))
    }

    /// Type name used in fault messages.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Unit => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Object(o) => o.type_name(),
        }
    }

    /// Returns the integer, if this is one.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a float; integers convert.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the text, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the float or a `TypeError` fault naming `what`.
    pub fn float_arg(&self, what: &str) -> Result<f64, FaultInfo> {
        self.as_float().ok_or_else(|| {
            FaultInfo::type_error(format!("{what} must be a number, not {}", self.type_name()))
        })
    }

    /// Returns the integer or a `TypeError` fault naming `what`.
    pub fn int_arg(&self, what: &str) -> Result<i64, FaultInfo> {
        self.as_int().ok_or_else(|| {
            FaultInfo::type_error(format!("{what} must be an integer, not {}", self.type_name()))
        })
    }
}

/// Identity for lists and objects, structural equality for everything else.
impl PartialEq for Native {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) | (Self::Set(a), Self::Set(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }
}

impl From<()> for Native {
    fn from((): ()) -> Self {
        Self::Unit
    }
}

impl From<bool> for Native {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Native {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Native {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Native {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Native {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Native {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<SharedList> for Native {
    fn from(l: SharedList) -> Self {
        Self::List(l)
    }
}

impl From<ObjectRef> for Native {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

/// A list shared by every holder, on the server and (by handle) remotely.
#[derive(Clone, Default)]
pub struct SharedList(Arc<Mutex<Vec<Native>>>);

impl SharedList {
    /// Creates a list with the given contents.
    pub fn new(items: Vec<Native>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    /// Returns `true` if the list has no elements.
    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    /// Appends an element.
    pub fn push(&self, value: Native) {
        lock(&self.0).push(value);
    }

    /// Returns the element at `index`; negative indexes count from the end.
    pub fn get(&self, index: i64) -> Result<Native, FaultInfo> {
        let items = lock(&self.0);
        let i = resolve_index(items.len(), index)?;
        Ok(items[i].clone())
    }

    /// Replaces the element at `index`.
    pub fn set(&self, index: i64, value: Native) -> Result<(), FaultInfo> {
        let old = {
            let mut items = lock(&self.0);
            let i = resolve_index(items.len(), index)?;
            std::mem::replace(&mut items[i], value)
        };
        // Dropped after the guard; an object's destructor may touch this list.
        drop(old);
        Ok(())
    }

    /// Removes and returns the last element.
    pub fn pop(&self) -> Result<Native, FaultInfo> {
        lock(&self.0)
            .pop()
            .ok_or_else(|| FaultInfo::new("IndexError", "pop from empty list"))
    }

    /// Copies the current contents.
    pub fn snapshot(&self) -> Vec<Native> {
        lock(&self.0).clone()
    }

    /// Returns `true` if both handles refer to the same list.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// A function member bound to this list.
    fn method(
        &self,
        name: &str,
        body: impl Fn(&Self, Vec<Native>) -> Result<Native, FaultInfo> + Send + Sync + 'static,
    ) -> Native {
        let this = self.clone();
        Native::function(name, move |args| body(&this, args))
    }
}

impl fmt::Debug for SharedList {
    // Contents are omitted: a list may contain itself.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedList(len={})", self.len())
    }
}

impl RemoteObject for SharedList {
    fn type_name(&self) -> &str {
        "list"
    }

    fn get_member(&self, name: &str) -> Option<Native> {
        Some(match name {
            "len" => Native::Int(i64::try_from(self.len()).unwrap_or(i64::MAX)),
            "items" => Native::Tuple(self.snapshot()),
            "append" => self.method("append", |list, args| {
                let [value] = one_arg("append", args)?;
                list.push(value);
                Ok(Native::Unit)
            }),
            "get" => self.method("get", |list, args| {
                let [index] = one_arg("get", args)?;
                list.get(index.int_arg("index")?)
            }),
            "set" => self.method("set", |list, args| {
                let [index, value] = <[Native; 2]>::try_from(args)
                    .map_err(|a| FaultInfo::arity("set", 2, a.len()))?;
                list.set(index.int_arg("index")?, value)?;
                Ok(Native::Unit)
            }),
            "pop" => self.method("pop", |list, args| {
                if !args.is_empty() {
                    return Err(FaultInfo::arity("pop", 0, args.len()));
                }
                list.pop()
            }),
            _ => return None,
        })
    }

    fn list_members(&self) -> Vec<String> {
        ["append", "get", "items", "len", "pop", "set"]
            .map(str::to_owned)
            .to_vec()
    }

    fn as_list(&self) -> Option<SharedList> {
        Some(self.clone())
    }
}

/// A read-only set or map exported by handle.
#[derive(Debug, Clone)]
pub struct Collection {
    /// Elements of a set, or `(key, value)` pairs of a map.
    items: Arc<[(Native, Native)]>,
    /// `true` for maps; sets store `Unit` as every value.
    keyed: bool,
}

impl Collection {
    /// Wraps set elements.
    pub fn set(items: Vec<Native>) -> Self {
        Self {
            items: items.into_iter().map(|k| (k, Native::Unit)).collect(),
            keyed: false,
        }
    }

    /// Wraps map entries.
    pub fn map(pairs: Vec<(Native, Native)>) -> Self {
        Self {
            items: pairs.into(),
            keyed: true,
        }
    }

    /// Returns `true` if `key` is an element or map key.
    fn contains(&self, key: &Native) -> bool {
        self.items.iter().any(|(k, _)| k == key)
    }

    /// Value stored under `key`, if present.
    fn lookup(&self, key: &Native) -> Option<Native> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

impl RemoteObject for Collection {
    fn type_name(&self) -> &str {
        if self.keyed { "map" } else { "set" }
    }

    fn get_member(&self, name: &str) -> Option<Native> {
        let this = self.clone();
        Some(match name {
            "len" => Native::Int(i64::try_from(self.items.len()).unwrap_or(i64::MAX)),
            "items" if self.keyed => Native::Tuple(
                self.items
                    .iter()
                    .map(|(k, v)| Native::tuple([k.clone(), v.clone()]))
                    .collect(),
            ),
            "items" => Native::Tuple(self.items.iter().map(|(k, _)| k.clone()).collect()),
            "contains" => Native::function("contains", move |args| {
                let [key] = one_arg("contains", args)?;
                Ok(Native::Bool(this.contains(&key)))
            }),
            "get" if self.keyed => Native::function("get", move |args| {
                let [key] = one_arg("get", args)?;
                Ok(this.lookup(&key).unwrap_or(Native::Unit))
            }),
            _ => return None,
        })
    }

    fn list_members(&self) -> Vec<String> {
        let names: &[&str] = if self.keyed {
            &["contains", "get", "items", "len"]
        } else {
            &["contains", "items", "len"]
        };
        names.iter().map(|&s| s.to_owned()).collect()
    }
}

/// Unpacks exactly one argument or returns an arity fault.
fn one_arg(name: &str, args: Vec<Native>) -> Result<[Native; 1], FaultInfo> {
    <[Native; 1]>::try_from(args).map_err(|a| FaultInfo::arity(name, 1, a.len()))
}

/// Maps a possibly negative index into `0..len`.
fn resolve_index(len: usize, index: i64) -> Result<usize, FaultInfo> {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let i = if index < 0 { index + len_i } else { index };
    if (0..len_i).contains(&i) {
        usize::try_from(i).map_err(|_| FaultInfo::new("IndexError", "list index out of range"))
    } else {
        Err(FaultInfo::new("IndexError", "list index out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::InvokeError;

    fn call(obj: &SharedList, member: &str, args: Vec<Native>) -> Result<Native, InvokeError> {
        match obj.get_member(member) {
            Some(Native::Object(f)) => f.invoke(args),
            other => panic!("{member} is not a method: {other:?}"),
        }
    }

    #[test]
    fn list_methods_mutate_the_shared_list() {
        let list = SharedList::new(vec![Native::Int(1)]);
        let alias = list.clone();
        call(&list, "append", vec![Native::from("two")]).unwrap();
        assert_eq!(alias.len(), 2);
        assert_eq!(call(&list, "get", vec![Native::Int(-1)]).unwrap(), Native::from("two"));
        call(&list, "set", vec![Native::Int(0), Native::Bool(true)]).unwrap();
        assert_eq!(alias.get(0).unwrap(), Native::Bool(true));
        assert_eq!(call(&list, "pop", vec![]).unwrap(), Native::from("two"));
        assert_eq!(list.get_member("len"), Some(Native::Int(1)));
    }

    #[test]
    fn list_index_errors_are_faults() {
        let list = SharedList::default();
        let Err(InvokeError::Fault(f)) = call(&list, "get", vec![Native::Int(0)]) else {
            panic!("expected fault");
        };
        assert_eq!(f.kind, "IndexError");
        assert_eq!(list.pop().unwrap_err().kind, "IndexError");
    }

    /// Reads the list it lives in when dropped.
    struct ReadsListOnDrop {
        list: SharedList,
        seen: Arc<Mutex<Option<usize>>>,
    }

    impl RemoteObject for ReadsListOnDrop {
        fn type_name(&self) -> &str {
            "reader"
        }

        fn get_member(&self, _: &str) -> Option<Native> {
            None
        }

        fn list_members(&self) -> Vec<String> {
            Vec::new()
        }
    }

    impl Drop for ReadsListOnDrop {
        fn drop(&mut self) {
            *lock(&self.seen) = Some(self.list.len());
        }
    }

    #[test]
    fn replaced_element_drops_outside_the_lock() {
        let list = SharedList::new(vec![Native::Unit]);
        let seen = Arc::new(Mutex::new(None));
        let reader = ReadsListOnDrop {
            list: list.clone(),
            seen: Arc::clone(&seen),
        };
        list.set(0, Native::Object(Arc::new(reader))).unwrap();
        assert_eq!(*lock(&seen), None);

        list.set(0, Native::Int(7)).unwrap();
        assert_eq!(*lock(&seen), Some(1));
        assert_eq!(list.get(0).unwrap(), Native::Int(7));
    }

    #[test]
    fn lists_compare_by_identity() {
        let a = SharedList::new(vec![]);
        let b = SharedList::new(vec![]);
        assert_eq!(Native::List(a.clone()), Native::List(a.clone()));
        assert_ne!(Native::List(a), Native::List(b));
    }

    #[test]
    fn map_collection_looks_up_keys() {
        let map = Collection::map(vec![(Native::from("a"), Native::Int(1))]);
        let Some(Native::Object(get)) = map.get_member("get") else {
            panic!("map has get");
        };
        assert_eq!(get.invoke(vec![Native::from("a")]), Ok(Native::Int(1)));
        assert_eq!(get.invoke(vec![Native::from("b")]), Ok(Native::Unit));
        assert_eq!(map.type_name(), "map");

        let set = Collection::set(vec![Native::Int(3)]);
        assert!(set.get_member("get").is_none());
        assert_eq!(set.get_member("items"), Some(Native::tuple([Native::Int(3)])));
    }
}
