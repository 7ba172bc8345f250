//! The object server: accepts connections and serves each one's requests.
//!
//! ```no_run
//! use tether::{Namespace, Native, Server};
//!
//! let math = Namespace::new("mathlib").with_fn("neg", |args| {
//!     Ok(Native::Float(-args[0].float_arg("x")?))
//! });
//! let server = Server::builder()
//!     .module("mathlib", math.into_ref())
//!     .bind(("127.0.0.1", 8888))?;
//! server.serve()?;
//! # Ok::<(), tether::Error>(())
//! ```

mod dispatch;
mod marshal;
mod session;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::{Mode, ServerConfig};
use crate::error::Result;
use crate::object::{Importer, ModuleTable, Namespace, ObjectRef};
use crate::registry::{ConnId, Registry};

use self::session::Outcome;

/// State shared by every connection of one server.
pub(crate) struct Environment {
    /// Handle table shared by every connection.
    pub(crate) registry: Arc<Registry>,
    /// Resolves `ImportModule` names.
    pub(crate) importer: Arc<dyn Importer>,
    /// Object answered to `GetGlobals`.
    pub(crate) globals: ObjectRef,
    /// Effective configuration.
    pub(crate) config: ServerConfig,
}

/// Configures and binds a [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    /// Configuration applied at bind time.
    config: ServerConfig,
    /// Built-in importer, unless `importer` is set.
    modules: ModuleTable,
    /// Custom importer.
    importer: Option<Arc<dyn Importer>>,
    /// Custom globals object.
    globals: Option<ObjectRef>,
    /// Registry to share instead of a fresh one.
    registry: Option<Arc<Registry>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("modules", &self.modules.names())
            .field("custom_importer", &self.importer.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerBuilder {
    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Makes `module` importable as `name`.
    #[must_use]
    pub fn module(self, name: impl Into<String>, module: ObjectRef) -> Self {
        self.modules.register(name, module);
        self
    }

    /// Resolves imports through `importer` instead of the built-in table.
    #[must_use]
    pub fn importer(mut self, importer: Arc<dyn Importer>) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Sets the object returned by `GetGlobals`.
    #[must_use]
    pub fn globals(mut self, globals: ObjectRef) -> Self {
        self.globals = Some(globals);
        self
    }

    /// Uses an existing registry, e.g. to inspect it from tests.
    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Binds the listening socket.
    pub fn bind(self, addr: impl ToSocketAddrs) -> Result<Server> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let env = Environment {
            registry: self.registry.unwrap_or_default(),
            importer: self.importer.unwrap_or_else(|| Arc::new(self.modules)),
            globals: self
                .globals
                .unwrap_or_else(|| Namespace::new("__main__").into_ref()),
            config: self.config,
        };
        Ok(Server {
            listener,
            local_addr,
            env: Arc::new(env),
            stop: StopHandle {
                stopped: Arc::new(AtomicBool::new(false)),
                wake: wake_addr(local_addr),
            },
        })
    }
}

/// A bound server, ready to [`serve`](Server::serve).
pub struct Server {
    /// Listening socket.
    listener: TcpListener,
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// State handed to every session.
    env: Arc<Environment>,
    /// Shutdown flag and wake address.
    stop: StopHandle,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("mode", &self.env.config.mode)
            .field("registry", &self.env.registry)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Starts configuring a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Address the server is listening on.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The registry shared by all connections.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.env.registry)
    }

    /// A handle that stops the accept loop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Accepts connections until stopped.
    ///
    /// In threaded mode, sessions still running when the loop exits finish on
    /// their own threads.
    pub fn serve(self) -> Result<()> {
        let mode = self.env.config.mode;
        tracing::info!(addr = %self.local_addr, ?mode, "listening");
        let mut next = 0u64;

        for incoming in self.listener.incoming() {
            if self.stop.is_stopped() {
                break;
            }
            let stream = match incoming {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            next += 1;
            let conn = ConnId(next);
            tracing::info!(%conn, peer = ?stream.peer_addr().ok(), "accepted connection");

            match mode {
                Mode::Sequential => {
                    if session::serve(stream, &self.env, conn) == Outcome::Stop {
                        self.stop.stop();
                    }
                }
                Mode::Threaded => {
                    let env = Arc::clone(&self.env);
                    let stop = self.stop.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("tether-conn-{next}"))
                        .spawn(move || {
                            if session::serve(stream, &env, conn) == Outcome::Stop {
                                stop.stop();
                            }
                        });
                    // The stream went into the closure, so a failed spawn drops it.
                    if let Err(e) = spawned {
                        tracing::error!(%conn, error = %e, "failed to spawn connection thread");
                        continue;
                    }
                }
            }
            if self.stop.is_stopped() {
                break;
            }
        }

        tracing::info!(addr = %self.local_addr, "server stopped");
        Ok(())
    }
}

/// Stops a running [`Server`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    /// Set once by [`stop`](Self::stop).
    stopped: Arc<AtomicBool>,
    /// Where the self-connect that unblocks `accept` goes.
    wake: SocketAddr,
}

impl StopHandle {
    /// Requests shutdown and wakes the accept loop.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            // A blocked accept() only returns on a new connection.
            let _ = TcpStream::connect_timeout(&self.wake, Duration::from_secs(1));
        }
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Address to connect to for waking the listener.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}
