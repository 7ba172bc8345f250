//! Per-verb request handling.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tether_proto::{FaultInfo, Handle, Message, Response, WireValue};

use super::Environment;
use super::marshal::Marshaler;
use crate::error::Error;
use crate::object::{InvokeError, ObjectRef};
use crate::registry::ConnId;

/// Executes requests for one connection against the shared environment.
pub(crate) struct Dispatcher<'a> {
    /// Shared server state.
    env: &'a Environment,
    /// Connection being served.
    conn: ConnId,
    /// Converts values for this connection.
    marshal: Marshaler<'a>,
}

impl<'a> Dispatcher<'a> {
    /// Creates the dispatcher for connection `conn`.
    pub(crate) fn new(env: &'a Environment, conn: ConnId) -> Self {
        let marshal = Marshaler::new(
            &env.registry,
            conn,
            env.config.lists_by_value,
            env.config.max_depth,
        );
        Self { env, conn, marshal }
    }

    /// Produces the response for one request.
    ///
    /// `StopServer` and `Bye` are connection control and handled by the
    /// session before dispatch.
    pub(crate) fn dispatch(&self, message: Message) -> Response {
        match message {
            Message::GetAttribute { target, name } => self.get_attribute(target, &name),
            Message::SetAttribute {
                target,
                name,
                value,
            } => self.set_attribute(target, &name, value),
            Message::Call { target, args } => self.call(target, args),
            Message::ImportModule { name } => self.import_module(&name),
            Message::GetGlobals => self.get_globals(),
            Message::ListMembers { target } => self.list_members(target),
            Message::ReleaseObject { target } => self.release(target),
            Message::StopServer | Message::Bye => Response::Fault(FaultInfo::new(
                "ProtocolError",
                "control message cannot be dispatched",
            )),
        }
    }

    /// Resolves `target` or yields the `NotRegistered` response.
    fn lookup(&self, target: Handle) -> Result<ObjectRef, Response> {
        self.env
            .registry
            .lookup(target)
            .map_err(|_| Response::NotRegistered(target))
    }

    /// Handles `GetAttribute`.
    fn get_attribute(&self, target: Handle, name: &str) -> Response {
        let object = match self.lookup(target) {
            Ok(o) => o,
            Err(r) => return r,
        };
        match guarded(|| object.get_member(name)) {
            Ok(Some(value)) => Response::Ok(self.marshal.wrap(&value)),
            Ok(None) => Response::NoSuchMember(name.to_owned()),
            Err(fault) => Response::Fault(fault),
        }
    }

    /// Handles `SetAttribute`.
    fn set_attribute(&self, target: Handle, name: &str, value: WireValue) -> Response {
        let value = match self.marshal.unwrap(value) {
            Ok(v) => v,
            Err(e) => return unwrap_failure(e),
        };
        let object = match self.lookup(target) {
            Ok(o) => o,
            Err(r) => return r,
        };
        match guarded(|| object.set_member(name, value)) {
            Ok(Ok(())) => Response::Ok(WireValue::Unit),
            Ok(Err(fault)) | Err(fault) => Response::Fault(fault),
        }
    }

    /// Handles `Call`.
    fn call(&self, target: Handle, args: Vec<WireValue>) -> Response {
        let args = match args
            .into_iter()
            .map(|a| self.marshal.unwrap(a))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(a) => a,
            Err(e) => return unwrap_failure(e),
        };
        let object = match self.lookup(target) {
            Ok(o) => o,
            Err(r) => return r,
        };
        match guarded(|| object.invoke(args)) {
            Ok(Ok(value)) => Response::Ok(self.marshal.wrap(&value)),
            Ok(Err(InvokeError::NotCallable)) => Response::NoSuchMember("__call__".to_owned()),
            Ok(Err(InvokeError::Fault(fault))) | Err(fault) => Response::Fault(fault),
        }
    }

    /// Handles `ImportModule`.
    fn import_module(&self, name: &str) -> Response {
        match guarded(|| self.env.importer.import_by_name(name)) {
            Ok(Ok(module)) => {
                let handle = self.env.registry.register_for(module, self.conn);
                tracing::debug!(conn = %self.conn, module = name, %handle, "imported module");
                Response::Ok(WireValue::Handle(handle))
            }
            Ok(Err(fault)) | Err(fault) => Response::Fault(fault),
        }
    }

    /// Handles `GetGlobals`.
    fn get_globals(&self) -> Response {
        let handle = self
            .env
            .registry
            .register_for(ObjectRef::clone(&self.env.globals), self.conn);
        Response::Ok(WireValue::Handle(handle))
    }

    /// Handles `ListMembers`.
    fn list_members(&self, target: Handle) -> Response {
        let object = match self.lookup(target) {
            Ok(o) => o,
            Err(r) => return r,
        };
        match guarded(|| object.list_members()) {
            Ok(names) => Response::Ok(WireValue::List(
                names.into_iter().map(WireValue::Str).collect(),
            )),
            Err(fault) => Response::Fault(fault),
        }
    }

    /// Handles `ReleaseObject`.
    fn release(&self, target: Handle) -> Response {
        match self.env.registry.release(target) {
            Ok(()) => Response::Ok(WireValue::Unit),
            Err(_) => {
                tracing::warn!(conn = %self.conn, handle = %target, "release of unregistered handle");
                Response::NotRegistered(target)
            }
        }
    }
}

/// Maps an argument unwrap error to its response.
fn unwrap_failure(e: Error) -> Response {
    match e {
        Error::UnknownHandle(h) => Response::NotRegistered(h),
        other => Response::Fault(FaultInfo::value_error(other.to_string())),
    }
}

/// Runs a capability, turning a panic into a fault.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, FaultInfo> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(%message, "native capability panicked");
        FaultInfo::new("panic", message)
    })
}

/// Text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "native code panicked".to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ServerConfig;
    use crate::native::Native;
    use crate::object::{ModuleTable, Namespace};
    use crate::registry::Registry;

    fn env() -> Environment {
        let modules = ModuleTable::new();
        modules.register(
            "m",
            Namespace::new("m")
                .with("x", 5i64)
                .with_fn("boom", |_| panic!("kaboom"))
                .with_fn("twice", |args| Ok(Native::tuple([args[0].clone(), args[0].clone()])))
                .into_ref(),
        );
        Environment {
            registry: Arc::new(Registry::new()),
            importer: Arc::new(modules),
            globals: Namespace::new("__main__").into_ref(),
            config: ServerConfig::default(),
        }
    }

    fn handle(r: Response) -> Handle {
        match r {
            Response::Ok(WireValue::Handle(h)) => h,
            other => panic!("expected handle, got {other:?}"),
        }
    }

    #[test]
    fn get_call_release_sequence() {
        let env = env();
        let d = Dispatcher::new(&env, ConnId(1));
        let m = handle(d.dispatch(Message::ImportModule { name: "m".into() }));
        assert_eq!(
            d.dispatch(Message::GetAttribute { target: m, name: "x".into() }),
            Response::Ok(WireValue::Int(5))
        );
        assert_eq!(
            d.dispatch(Message::GetAttribute { target: m, name: "y".into() }),
            Response::NoSuchMember("y".into())
        );
        let twice = handle(d.dispatch(Message::GetAttribute { target: m, name: "twice".into() }));
        assert_eq!(
            d.dispatch(Message::Call { target: twice, args: vec!["a".into()] }),
            Response::Ok(WireValue::Tuple(vec!["a".into(), "a".into()]))
        );
        assert_eq!(
            d.dispatch(Message::Call { target: m, args: vec![] }),
            Response::NoSuchMember("__call__".into())
        );
        assert_eq!(
            d.dispatch(Message::ReleaseObject { target: twice }),
            Response::Ok(WireValue::Unit)
        );
        assert_eq!(
            d.dispatch(Message::ReleaseObject { target: twice }),
            Response::NotRegistered(twice)
        );
    }

    #[test]
    fn panics_become_faults() {
        let env = env();
        let d = Dispatcher::new(&env, ConnId(1));
        let m = handle(d.dispatch(Message::ImportModule { name: "m".into() }));
        let boom = handle(d.dispatch(Message::GetAttribute { target: m, name: "boom".into() }));
        let Response::Fault(f) = d.dispatch(Message::Call { target: boom, args: vec![] }) else {
            panic!("expected fault");
        };
        assert_eq!(f.kind, "panic");
        assert_eq!(f.message, "kaboom");
    }

    #[test]
    fn stale_argument_handle_is_not_registered() {
        let env = env();
        let d = Dispatcher::new(&env, ConnId(1));
        let m = handle(d.dispatch(Message::ImportModule { name: "m".into() }));
        let value = WireValue::Handle(Handle(404));
        assert_eq!(
            d.dispatch(Message::SetAttribute { target: m, name: "x".into(), value }),
            Response::NotRegistered(Handle(404))
        );
    }

    #[test]
    fn import_failure_and_listing() {
        let env = env();
        let d = Dispatcher::new(&env, ConnId(1));
        let Response::Fault(f) = d.dispatch(Message::ImportModule { name: "zz".into() }) else {
            panic!("expected fault");
        };
        assert_eq!(f.kind, "ImportError");
        let m = handle(d.dispatch(Message::ImportModule { name: "m".into() }));
        assert_eq!(
            d.dispatch(Message::ListMembers { target: m }),
            Response::Ok(WireValue::List(vec!["boom".into(), "twice".into(), "x".into()]))
        );
        let g = handle(d.dispatch(Message::GetGlobals));
        assert_ne!(g, m);
    }
}
