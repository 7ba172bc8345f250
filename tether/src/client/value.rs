//! Values as seen by the client.

use std::fmt;

use super::proxy::Proxy;

/// A result or argument on the client side.
///
/// Everything except [`Value::Proxy`] is a local copy. Lists returned by a
/// server configured with lists-by-value arrive as [`Value::List`]; otherwise
/// they arrive as proxies to the remote list.
#[derive(Debug, Clone, PartialEq)]
// Mirrors the wire value set.
#[allow(clippy::exhaustive_enums)]
pub enum Value {
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
    /// List copy.
    List(Vec<Self>),
    /// Unordered elements.
    Set(Vec<Self>),
    /// Key/value pairs.
    Map(Vec<(Self, Self)>),
    /// Reference to a remote object.
    Proxy(Proxy),
}

impl Value {
    /// Builds a tuple.
    pub fn tuple(items: impl IntoIterator<Item = Self>) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    /// Builds a list.
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(items.into_iter().collect())
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

    /// Returns the elements of a tuple or list.
    pub fn as_slice(&self) -> Option<&[Self]> {
        match self {
            Self::Tuple(items) | Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the proxy, if this is one.
    pub const fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Self::Proxy(p) => Some(p),
            _ => None,
        }
    }

    /// Converts into a proxy, if this is one.
    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Self::Proxy(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("()"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            Self::Tuple(items) => write_seq(f, "(", items, ")"),
            Self::List(items) => write_seq(f, "[", items, "]"),
            Self::Set(items) => write_seq(f, "{", items, "}"),
            Self::Map(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Proxy(p) => write!(f, "<proxy {}>", p.name()),
        }
    }
}

/// Writes `items` comma-separated between `open` and `close`.
fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Unit
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Proxy> for Value {
    fn from(p: Proxy) -> Self {
        Self::Proxy(p)
    }
}

impl From<&Proxy> for Value {
    fn from(p: &Proxy) -> Self {
        Self::Proxy(p.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reads_like_a_literal() {
        let v = Value::tuple([
            Value::Float(0.0),
            Value::tuple([Value::from("x")]),
            Value::list([Value::Int(1), Value::Bool(false)]),
            Value::Map(vec![(Value::from("k"), Value::Unit)]),
        ]);
        assert_eq!(v.to_string(), r#"(0.0, ("x",), [1, false], {"k": ()})"#);
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::Int(2).as_float(), Some(2.0));
        assert_eq!(Value::from("s").as_str(), Some("s"));
        assert!(Value::Unit.as_proxy().is_none());
        assert_eq!(Value::list([Value::Int(1)]).as_slice().map(<[_]>::len), Some(1));
    }
}
