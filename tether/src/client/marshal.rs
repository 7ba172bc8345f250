//! Conversion between client values and wire values.

use std::sync::Arc;

use tether_proto::WireValue;

use super::Shared;
use super::proxy::Proxy;
use super::value::Value;
use crate::error::{Error, Result};

/// Converts an argument into its wire form.
///
/// A proxy is sent as its handle and must belong to this connection and
/// still be connected.
pub(super) fn wrap(shared: &Arc<Shared>, value: &Value) -> Result<WireValue> {
    Ok(match value {
        Value::Proxy(p) => {
            if !p.belongs_to(shared) {
                return Err(Error::InvalidArgument(format!(
                    "proxy {} belongs to another connection",
                    p.name()
                )));
            }
            let handle = p.handle().ok_or_else(|| {
                Error::InvalidArgument(format!("proxy {} is disconnected", p.name()))
            })?;
            WireValue::Handle(handle)
        }
        Value::Unit => WireValue::Unit,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Int(n) => WireValue::Int(*n),
        Value::Float(x) => WireValue::Float(*x),
        Value::Str(s) => WireValue::Str(s.clone()),
        Value::Tuple(items) => WireValue::Tuple(wrap_all(shared, items)?),
        Value::List(items) => WireValue::List(wrap_all(shared, items)?),
        Value::Set(items) => WireValue::Set(wrap_all(shared, items)?),
        Value::Map(pairs) => WireValue::Map(
            pairs
                .iter()
                .map(|(k, v)| Ok((wrap(shared, k)?, wrap(shared, v)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

/// Wraps every item.
fn wrap_all(shared: &Arc<Shared>, items: &[Value]) -> Result<Vec<WireValue>> {
    items.iter().map(|v| wrap(shared, v)).collect()
}

/// Converts a result into a client value, attaching proxies for handles.
///
/// `name` labels a top-level proxy; nested ones are named by handle.
pub(super) fn unwrap(shared: &Arc<Shared>, value: WireValue, name: Option<&str>) -> Value {
    match value {
        WireValue::Handle(h) => Value::Proxy(Proxy::attach(shared, h, name)),
        WireValue::Unit => Value::Unit,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Int(n) => Value::Int(n),
        WireValue::Float(x) => Value::Float(x),
        WireValue::Str(s) => Value::Str(s),
        WireValue::Tuple(items) => Value::Tuple(unwrap_all(shared, items)),
        WireValue::List(items) => Value::List(unwrap_all(shared, items)),
        WireValue::Set(items) => Value::Set(unwrap_all(shared, items)),
        WireValue::Map(pairs) => Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (unwrap(shared, k, None), unwrap(shared, v, None)))
                .collect(),
        ),
    }
}

/// Unwraps every item.
fn unwrap_all(shared: &Arc<Shared>, items: Vec<WireValue>) -> Vec<Value> {
    items.into_iter().map(|v| unwrap(shared, v, None)).collect()
}
