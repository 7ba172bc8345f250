//! The closed set of values that can cross the wire.

use std::fmt;

/// Opaque server-assigned identifier for one exported object.
///
/// Handles are unique within one server process lifetime only; they carry no
/// meaning across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(clippy::exhaustive_structs)]
pub struct Handle(pub u64);

impl Handle {
    /// Returns the raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// A wire-representable value.
///
/// Tuples and lists share the same sequence encoding but keep distinct tags so
/// that a round trip preserves which one was sent. Sets and maps are carried
/// structurally; the marshaler decides what they become on the receiving side.
#[derive(Debug, Clone, PartialEq)]
// One variant per codec tag; a new tag is a protocol change.
#[allow(clippy::exhaustive_enums)]
pub enum WireValue {
    /// Absence of a value.
    Unit,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Fixed-arity ordered sequence.
    Tuple(Vec<Self>),
    /// Variable-length ordered sequence.
    List(Vec<Self>),
    /// Unordered collection of distinct elements.
    Set(Vec<Self>),
    /// Key/value pairs.
    Map(Vec<(Self, Self)>),
    /// Reference to an object living on the server.
    Handle(Handle),
}

impl WireValue {
    /// Short human-readable name of the variant, used in error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Handle(_) => "handle",
        }
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for WireValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for WireValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Handle> for WireValue {
    fn from(h: Handle) -> Self {
        Self::Handle(h)
    }
}
