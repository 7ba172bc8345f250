//! Transparent remote access to in-process objects over TCP.
//!
//! A [`Server`] exports native objects under opaque handles. A [`Client`]
//! imports a module by name and receives a [`Proxy`]; reading members,
//! assigning them and calling them on the proxy runs the operation on the
//! server. Handles are released when the last proxy clone is dropped.
//!
//! # Quick start
//!
//! ```no_run
//! use std::thread;
//!
//! use tether::{Client, Namespace, Native, Server, Value};
//!
//! let math = Namespace::new("mathlib").with_fn("double", |args| {
//!     Ok(Native::Int(args[0].int_arg("x")? * 2))
//! });
//! let server = Server::builder()
//!     .module("mathlib", math.into_ref())
//!     .bind("127.0.0.1:0")?;
//! let addr = server.local_addr();
//! thread::spawn(move || server.serve());
//!
//! let client = Client::connect(addr)?;
//! let double = client.import_module("mathlib")?.get_attr("double")?;
//! let Value::Proxy(double) = double else { unreachable!() };
//! assert_eq!(double.call(&[Value::Int(21)])?, Value::Int(42));
//! client.stop_server()?;
//! # Ok::<(), tether::Error>(())
//! ```

mod client;
mod config;
mod error;
mod native;
mod object;
mod registry;
mod server;
mod sync;

pub use client::{Client, Proxy, Value};
pub use config::{ClientConfig, Mode, ServerConfig};
pub use error::{Error, Result};
pub use native::{Collection, Native, SharedList};
pub use object::{Importer, InvokeError, ModuleTable, Namespace, NativeFn, ObjectRef, RemoteObject};
pub use registry::{ConnId, Registry};
pub use server::{Server, ServerBuilder, StopHandle};
pub use tether_proto::{DEFAULT_PORT, FaultInfo, Handle};
