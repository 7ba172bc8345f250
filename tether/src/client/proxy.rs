//! Client-side stand-ins for remote objects.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tether_proto::{Handle, Message, Response, WireValue};

use super::value::Value;
use super::{Shared, marshal};
use crate::error::{Error, Result};
use crate::sync::lock;

/// State behind every clone of one [`Proxy`].
pub(crate) struct ProxyInner {
    /// Server-side handle; meaningful while connected.
    pub(super) handle: Handle,
    /// Cleared exactly once, by whoever sends the release.
    connected: AtomicBool,
    /// Display name.
    name: String,
    /// Owning connection; weak so proxies never keep it open.
    shared: Weak<Shared>,
    /// Attribute values cached when the client is configured to.
    attrs: Mutex<HashMap<String, Value>>,
}

impl ProxyInner {
    /// Creates a connected proxy state.
    pub(super) fn new(handle: Handle, name: String, shared: Weak<Shared>) -> Self {
        Self {
            handle,
            connected: AtomicBool::new(true),
            name,
            shared,
            attrs: Mutex::new(HashMap::new()),
        }
    }

    /// Marks the proxy disconnected. Returns `true` for the one caller that
    /// must now release the handle.
    pub(super) fn disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut cache = lock(&shared.cache);
        if !cache.forget(self.handle, std::ptr::from_ref::<Self>(self)) {
            return;
        }
        if self.disconnect() {
            shared.release_remote(self.handle);
        }
        drop(cache);
    }
}

/// A local reference to an object living on the server.
///
/// Clones share identity: within one connection, every proxy for a given
/// live handle is the same proxy, and `==` compares identity. When the last
/// clone is dropped the server is told to release the handle.
#[derive(Clone)]
pub struct Proxy {
    /// Shared identity of every clone.
    pub(super) inner: Arc<ProxyInner>,
}

impl Proxy {
    /// Returns the proxy for `handle`, creating it if none is alive.
    pub(super) fn attach(shared: &Arc<Shared>, handle: Handle, name: Option<&str>) -> Self {
        let inner = lock(&shared.cache).get_or_insert_with(handle, || {
            let name = name.map_or_else(|| handle.to_string(), str::to_owned);
            Arc::new(ProxyInner::new(handle, name, Arc::downgrade(shared)))
        });
        Self { inner }
    }

    /// The handle, or `None` once disconnected.
    pub fn handle(&self) -> Option<Handle> {
        self.inner
            .connected
            .load(Ordering::Acquire)
            .then_some(self.inner.handle)
    }

    /// Display name: the module name, `parent.attr`, or `<handle>`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` after release or connection close.
    pub fn is_disconnected(&self) -> bool {
        !self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns `true` if `self` was produced by the connection behind `shared`.
    pub(super) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.inner.shared.as_ptr(), Arc::as_ptr(shared))
    }

    /// Returns the connection and handle, or the error for a dead proxy.
    fn session(&self, member: &str) -> Result<(Arc<Shared>, Handle)> {
        let Some(handle) = self.handle() else {
            return Err(Error::NoSuchMember(member.to_owned()));
        };
        let shared = self.inner.shared.upgrade().ok_or(Error::Closed)?;
        Ok((shared, handle))
    }

    /// Reads member `name`.
    pub fn get_attr(&self, name: &str) -> Result<Value> {
        let (shared, target) = self.session(name)?;
        let caching = shared.config.cache_attributes;
        if caching && let Some(v) = lock(&self.inner.attrs).get(name) {
            return Ok(v.clone());
        }
        let reply = shared.request(&Message::GetAttribute {
            target,
            name: name.to_owned(),
        })?;
        let wire = expect_ok(reply, name)?;
        let value = marshal::unwrap(&shared, wire, Some(&format!("{}.{name}", self.inner.name)));
        if caching {
            lock(&self.inner.attrs).insert(name.to_owned(), value.clone());
        }
        Ok(value)
    }

    /// Assigns member `name`.
    pub fn set_attr(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let (shared, target) = self.session(name)?;
        let wire = marshal::wrap(&shared, &value)?;
        let reply = shared.request(&Message::SetAttribute {
            target,
            name: name.to_owned(),
            value: wire,
        })?;
        expect_ok(reply, name)?;
        lock(&self.inner.attrs).remove(name);
        Ok(())
    }

    /// Invokes the remote object with positional arguments.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        let (shared, target) = self.session("__call__")?;
        let args = args
            .iter()
            .map(|a| marshal::wrap(&shared, a))
            .collect::<Result<Vec<_>>>()?;
        let reply = shared.request(&Message::Call { target, args })?;
        let wire = expect_ok(reply, "__call__")?;
        Ok(marshal::unwrap(&shared, wire, None))
    }

    /// Reads member `name` and invokes it.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        match self.get_attr(name)? {
            Value::Proxy(method) => method.call(args),
            _ => Err(Error::NoSuchMember(format!("{name}.__call__"))),
        }
    }

    /// Names of the remote object's members.
    pub fn list_members(&self) -> Result<Vec<String>> {
        let (shared, target) = self.session("__dir__")?;
        let reply = shared.request(&Message::ListMembers { target })?;
        match expect_ok(reply, "__dir__")? {
            WireValue::List(names) => names
                .into_iter()
                .map(|n| match n {
                    WireValue::Str(s) => Ok(s),
                    other => Err(Error::Protocol(format!(
                        "member name is a {}, not a str",
                        other.kind()
                    ))),
                })
                .collect(),
            other => Err(Error::Protocol(format!(
                "member list is a {}, not a list",
                other.kind()
            ))),
        }
    }

    /// Releases the handle now instead of on drop. Idempotent.
    ///
    /// Every clone becomes disconnected.
    pub fn release(&self) {
        let Some(shared) = self.inner.shared.upgrade() else {
            self.inner.disconnect();
            return;
        };
        let mut cache = lock(&shared.cache);
        if self.inner.disconnect() {
            cache.forget(self.inner.handle, Arc::as_ptr(&self.inner));
            shared.release_remote(self.inner.handle);
        }
        drop(cache);
    }
}

/// Maps a response to the value it carries or the matching error.
fn expect_ok(reply: Response, member: &str) -> Result<WireValue> {
    match reply {
        Response::Ok(v) => Ok(v),
        Response::Fault(fault) => Err(Error::RemoteFault(fault)),
        Response::NotRegistered(h) => Err(Error::UnknownHandle(h)),
        Response::NoSuchMember(_) => Err(Error::NoSuchMember(member.to_owned())),
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Proxy {}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("name", &self.inner.name)
            .field("handle", &self.handle())
            .finish()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<proxy {}>", self.inner.name)
    }
}
