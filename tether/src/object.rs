//! The capability surface the server uses to operate on native objects.
//!
//! The server never reflects over arbitrary values. An object can be
//! exported only if it implements [`RemoteObject`], which names exactly the
//! operations a client may perform: read, assign and enumerate members, and
//! invoke the object itself. Modules are made importable by registering them
//! with an [`Importer`], usually a [`ModuleTable`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use tether_proto::FaultInfo;

use crate::native::{Native, SharedList};
use crate::sync::{read, write};

/// Shared reference to an exportable object.
pub type ObjectRef = Arc<dyn RemoteObject>;

/// Why an invocation did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvokeError {
    /// The object has no call capability.
    NotCallable,
    /// The call ran and failed.
    Fault(FaultInfo),
}

impl From<FaultInfo> for InvokeError {
    fn from(f: FaultInfo) -> Self {
        Self::Fault(f)
    }
}

/// Operations a client may perform on an exported object.
///
/// Implementations use interior mutability for [`set_member`]; the server
/// calls these methods from many connection threads at once.
///
/// [`set_member`]: RemoteObject::set_member
pub trait RemoteObject: Send + Sync {
    /// Type name used in fault messages and logs.
    fn type_name(&self) -> &str;

    /// Reads a member. `None` means the member does not exist.
    fn get_member(&self, name: &str) -> Option<Native>;

    /// Assigns a member. Read-only by default.
    fn set_member(&self, name: &str, value: Native) -> Result<(), FaultInfo> {
        let _ = value;
        Err(FaultInfo::new(
            "AttributeError",
            format!("'{}' object attribute '{name}' is read-only", self.type_name()),
        ))
    }

    /// Invokes the object. Not callable by default.
    fn invoke(&self, args: Vec<Native>) -> Result<Native, InvokeError> {
        let _ = args;
        Err(InvokeError::NotCallable)
    }

    /// Member names in a stable order.
    fn list_members(&self) -> Vec<String>;

    /// Returns the list behind this object, if it is one.
    ///
    /// Lets a handle to an exported list unwrap back to the same list when a
    /// client passes it as an argument.
    fn as_list(&self) -> Option<SharedList> {
        None
    }
}

impl fmt::Debug for dyn RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object>", self.type_name())
    }
}

/// Resolves module names for `ImportModule`.
pub trait Importer: Send + Sync {
    /// Returns the module object registered under `name`.
    fn import_by_name(&self, name: &str) -> Result<ObjectRef, FaultInfo>;
}

/// Signature of a native function body.
type Body = dyn Fn(Vec<Native>) -> Result<Native, FaultInfo> + Send + Sync;

/// A callable backed by a Rust closure.
pub struct NativeFn {
    /// Name reported by `__name__`.
    name: String,
    /// The closure.
    body: Box<Body>,
}

impl NativeFn {
    /// Wraps `body` as a callable named `name`.
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(Vec<Native>) -> Result<Native, FaultInfo> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }

    /// Returns the function's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn").field("name", &self.name).finish_non_exhaustive()
    }
}

impl RemoteObject for NativeFn {
    fn type_name(&self) -> &str {
        "function"
    }

    fn get_member(&self, name: &str) -> Option<Native> {
        (name == "__name__").then(|| Native::Str(self.name.clone()))
    }

    fn invoke(&self, args: Vec<Native>) -> Result<Native, InvokeError> {
        (self.body)(args).map_err(InvokeError::Fault)
    }

    fn list_members(&self) -> Vec<String> {
        vec!["__name__".to_owned()]
    }
}

/// A named bag of members: a module, or the server's globals.
#[derive(Debug)]
pub struct Namespace {
    /// Reported by `__name__` unless a member shadows it.
    name: String,
    /// Members, kept sorted so enumeration order is stable.
    members: RwLock<BTreeMap<String, Native>>,
    /// Reject `set_member` when set.
    read_only: bool,
}

impl Namespace {
    /// Creates an empty, writable namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: RwLock::new(BTreeMap::new()),
            read_only: false,
        }
    }

    /// Makes remote assignments fail.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Adds a member.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Native>) -> Self {
        self.members
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.into(), value.into());
        self
    }

    /// Adds a function member.
    #[must_use]
    pub fn with_fn(
        self,
        name: &str,
        body: impl Fn(Vec<Native>) -> Result<Native, FaultInfo> + Send + Sync + 'static,
    ) -> Self {
        self.with(name, Native::function(name, body))
    }

    /// Inserts or replaces a member.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<Native>) {
        let old = write(&self.members).insert(name.into(), value.into());
        // The replaced value drops after the guard; its destructor may read
        // this namespace.
        drop(old);
    }

    /// Returns a member's current value.
    pub fn get(&self, name: &str) -> Option<Native> {
        read(&self.members).get(name).cloned()
    }

    /// Returns the namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wraps the namespace as an exportable object.
    pub fn into_ref(self) -> ObjectRef {
        Arc::new(self)
    }
}

impl RemoteObject for Namespace {
    fn type_name(&self) -> &str {
        "namespace"
    }

    fn get_member(&self, name: &str) -> Option<Native> {
        self.get(name)
            .or_else(|| (name == "__name__").then(|| Native::Str(self.name.clone())))
    }

    fn set_member(&self, name: &str, value: Native) -> Result<(), FaultInfo> {
        if self.read_only {
            return Err(FaultInfo::new(
                "AttributeError",
                format!("namespace '{}' is read-only", self.name),
            ));
        }
        self.insert(name, value);
        Ok(())
    }

    fn list_members(&self) -> Vec<String> {
        read(&self.members).keys().cloned().collect()
    }
}

/// Name-to-module table backing `ImportModule`.
///
/// Importing the same name twice yields the same module object, exported
/// under two independent handles.
#[derive(Debug, Default)]
pub struct ModuleTable {
    /// Registered modules.
    modules: RwLock<HashMap<String, ObjectRef>>,
}

impl ModuleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `module` importable as `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, module: ObjectRef) {
        write(&self.modules).insert(name.into(), module);
    }

    /// Returns the registered module names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.modules).keys().cloned().collect();
        names.sort();
        names
    }
}

impl Importer for ModuleTable {
    fn import_by_name(&self, name: &str) -> Result<ObjectRef, FaultInfo> {
        read(&self.modules).get(name).cloned().ok_or_else(|| {
            FaultInfo::new("ImportError", format!("no module named '{name}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_members_are_sorted_and_writable() {
        let ns = Namespace::new("cfg").with("b", 2i64).with("a", 1i64);
        assert_eq!(ns.list_members(), ["a", "b"]);
        ns.set_member("c", Native::Bool(true)).unwrap();
        assert_eq!(ns.get_member("c"), Some(Native::Bool(true)));
        assert_eq!(ns.get_member("__name__"), Some(Native::from("cfg")));
        assert_eq!(ns.get_member("missing"), None);
    }

    #[test]
    fn read_only_namespace_faults_on_assignment() {
        let ns = Namespace::new("consts").with("ratio", 2.5).read_only();
        let fault = ns.set_member("ratio", Native::Float(3.0)).unwrap_err();
        assert_eq!(fault.kind, "AttributeError");
        assert_eq!(ns.get("ratio"), Some(Native::Float(2.5)));
    }

    /// Reads a member of its namespace when dropped.
    struct ReadsNamespaceOnDrop(std::sync::Weak<Namespace>);

    impl RemoteObject for ReadsNamespaceOnDrop {
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

    impl Drop for ReadsNamespaceOnDrop {
        fn drop(&mut self) {
            if let Some(ns) = self.0.upgrade() {
                let _ = ns.get("other");
            }
        }
    }

    #[test]
    fn replaced_member_drops_outside_the_lock() {
        let ns = Arc::new(Namespace::new("m").with("other", 1i64));
        let reader: ObjectRef = Arc::new(ReadsNamespaceOnDrop(Arc::downgrade(&ns)));
        let weak = Arc::downgrade(&reader);
        ns.insert("slot", reader);
        assert!(weak.upgrade().is_some());

        ns.set_member("slot", Native::Int(2)).unwrap();
        assert!(weak.upgrade().is_none());
        assert_eq!(ns.get("slot"), Some(Native::Int(2)));
    }

    #[test]
    fn native_fn_is_callable_and_namespace_is_not() {
        let double = NativeFn::new("double", |args| match args.as_slice() {
            [Native::Int(n)] => Ok(Native::Int(n * 2)),
            _ => Err(FaultInfo::arity("double", 1, args.len())),
        });
        assert_eq!(double.invoke(vec![Native::Int(21)]), Ok(Native::Int(42)));
        assert!(matches!(double.invoke(vec![]), Err(InvokeError::Fault(_))));

        let ns = Namespace::new("m");
        assert_eq!(ns.invoke(vec![]), Err(InvokeError::NotCallable));
    }

    #[test]
    fn unknown_module_is_an_import_error() {
        let table = ModuleTable::new();
        table.register("m", Namespace::new("m").into_ref());
        assert!(table.import_by_name("m").is_ok());
        let fault = table.import_by_name("nope").unwrap_err();
        assert_eq!(fault.kind, "ImportError");
        assert_eq!(table.names(), ["m"]);
    }
}
