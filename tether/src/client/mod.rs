//! Client connection and proxies.
//!
//! ```no_run
//! use tether::{Client, Value};
//!
//! let client = Client::connect(("127.0.0.1", 8888))?;
//! let math = client.import_module("mathlib")?;
//! let sin = math.get_attr("sin")?.into_proxy().expect("sin is a function");
//! println!("{}", sin.call(&[Value::Float(0.0)])?);
//! client.close()?;
//! # Ok::<(), tether::Error>(())
//! ```
//!
//! One connection carries one request at a time. A [`Client`] and its
//! proxies may be shared across threads; concurrent calls are serialized.

mod cache;
mod marshal;
mod proxy;
mod value;

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tether_proto::{Handle, Limits, Message, Response, WireValue};

use self::cache::ProxyCache;
use self::proxy::ProxyInner;
pub use self::proxy::Proxy;
pub use self::value::Value;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::sync::lock;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Requests may be sent.
    Open,
    /// A fatal error occurred; the stream may be mid-message.
    Broken,
    /// Closed by the client.
    Closed,
}

/// The socket and its framing state.
struct Transport {
    /// Buffered read half.
    reader: BufReader<TcpStream>,
    /// Buffered write half; flushed by every encode.
    writer: BufWriter<TcpStream>,
    /// Whether the stream is still usable.
    link: Link,
}

impl Transport {
    /// Writes one request and reads its response.
    fn exchange(&mut self, request: &WireValue, limits: &Limits) -> Result<Response> {
        tether_proto::encode(&mut self.writer, request)?;
        let reply = tether_proto::decode(&mut self.reader, limits)?;
        Ok(Response::from_wire(reply)?)
    }

    /// Records the new state and shuts the socket down.
    fn shutdown(&mut self, link: Link) {
        self.link = link;
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }
}

/// State shared by a client and its proxies.
///
/// Lock order is `cache` then `transport`; nothing takes the cache while
/// holding the transport.
pub(crate) struct Shared {
    /// The socket, held for one request/response exchange.
    transport: Mutex<Transport>,
    /// Live proxies by handle.
    pub(crate) cache: Mutex<ProxyCache<ProxyInner>>,
    /// Settings this client was opened with.
    pub(crate) config: ClientConfig,
    /// Decoder bounds for responses.
    limits: Limits,
    /// Messages sent so far.
    messages: AtomicU64,
    /// Server address, for logs.
    peer: SocketAddr,
}

impl Shared {
    /// Sends one request and waits for its response.
    pub(crate) fn request(&self, message: &Message) -> Result<Response> {
        let mut transport = lock(&self.transport);
        if transport.link != Link::Open {
            return Err(Error::Closed);
        }
        self.messages.fetch_add(1, Ordering::Relaxed);
        let result = transport.exchange(&message.to_wire(), &self.limits);
        if let Err(e) = &result
            && e.is_fatal()
        {
            tracing::warn!(peer = %self.peer, verb = message.name(), error = %e, "connection failed");
            transport.shutdown(Link::Broken);
        }
        result
    }

    /// Tells the server to drop `handle`. Failures are logged, never raised.
    pub(crate) fn release_remote(&self, handle: Handle) {
        match self.request(&Message::ReleaseObject { target: handle }) {
            Ok(Response::Ok(_)) => tracing::debug!(%handle, "released"),
            Ok(Response::NotRegistered(_)) => {
                tracing::warn!(%handle, "released handle was not registered");
            }
            Ok(other) => tracing::warn!(%handle, response = ?other, "unexpected release response"),
            Err(Error::Closed) => tracing::debug!(%handle, "release skipped on closed connection"),
            Err(e) => tracing::warn!(%handle, error = %e, "release failed"),
        }
    }

    /// Disconnects every live proxy, releasing its handle.
    fn disconnect_all(&self) {
        let live = lock(&self.cache).live();
        for proxy in &live {
            if proxy.disconnect() {
                self.release_remote(proxy.handle);
            }
        }
    }
}

/// A connection to a tether server.
///
/// Dropping the client closes it.
pub struct Client {
    /// State shared with every proxy.
    shared: Arc<Shared>,
}

impl Client {
    /// Connects with default settings.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::connect_with(addr, ClientConfig::default())
    }

    /// Connects with `config`.
    pub fn connect_with(addr: impl ToSocketAddrs, config: ClientConfig) -> Result<Self> {
        let stream = dial(addr, &config)?;
        Self::from_stream(stream, config)
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream, config: ClientConfig) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.response_timeout())?;
        let peer = stream.peer_addr()?;
        let transport = Transport {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            link: Link::Open,
        };
        tracing::debug!(%peer, "connected");
        Ok(Self {
            shared: Arc::new(Shared {
                transport: Mutex::new(transport),
                cache: Mutex::new(ProxyCache::default()),
                limits: config.limits(),
                config,
                messages: AtomicU64::new(0),
                peer,
            }),
        })
    }

    /// Imports a server module and returns a proxy for it.
    pub fn import_module(&self, name: &str) -> Result<Proxy> {
        let reply = self.shared.request(&Message::ImportModule {
            name: name.to_owned(),
        })?;
        self.attach(reply, name)
    }

    /// Returns a proxy for the server's globals object.
    pub fn globals(&self) -> Result<Proxy> {
        let reply = self.shared.request(&Message::GetGlobals)?;
        self.attach(reply, "globals")
    }

    /// Turns a handle reply into a proxy named `name`.
    fn attach(&self, reply: Response, name: &str) -> Result<Proxy> {
        match reply {
            Response::Ok(WireValue::Handle(h)) => Ok(Proxy::attach(&self.shared, h, Some(name))),
            Response::Ok(other) => Err(Error::Protocol(format!(
                "expected a handle for {name}, got a {}",
                other.kind()
            ))),
            Response::Fault(fault) => Err(Error::RemoteFault(fault)),
            Response::NotRegistered(h) => Err(Error::UnknownHandle(h)),
            Response::NoSuchMember(m) => Err(Error::NoSuchMember(m)),
        }
    }

    /// Number of messages sent on this connection, releases and `Bye` included.
    pub fn message_count(&self) -> u64 {
        self.shared.messages.load(Ordering::Relaxed)
    }

    /// Number of proxies currently alive.
    pub fn live_proxies(&self) -> usize {
        lock(&self.shared.cache).live_count()
    }

    /// Server address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    /// Returns `true` until the connection is closed or fails.
    pub fn is_open(&self) -> bool {
        lock(&self.shared.transport).link == Link::Open
    }

    /// Releases every live proxy, says `Bye` and closes the socket.
    ///
    /// Fails with [`Error::Closed`] if the connection is already closed.
    pub fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.shared.disconnect_all();

        let mut transport = lock(&self.shared.transport);
        if transport.link != Link::Open {
            return Err(Error::Closed);
        }
        self.shared.messages.fetch_add(1, Ordering::Relaxed);
        let sent = tether_proto::encode(&mut transport.writer, &Message::Bye.to_wire());
        transport.shutdown(Link::Closed);
        tracing::debug!(peer = %self.shared.peer, "closed");
        sent.map_err(Error::from)
    }

    /// Releases every live proxy, stops the server and closes.
    pub fn stop_server(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.shared.disconnect_all();
        let reply = self.shared.request(&Message::StopServer)?;
        lock(&self.shared.transport).shutdown(Link::Closed);
        match reply {
            Response::Ok(_) => Ok(()),
            Response::Fault(fault) => Err(Error::RemoteFault(fault)),
            other => Err(Error::Protocol(format!("unexpected stop response {other:?}"))),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.is_open()
            && let Err(e) = self.close()
        {
            tracing::debug!(error = %e, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.shared.peer)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Opens the TCP connection, honoring the connect timeout.
fn dial(addr: impl ToSocketAddrs, config: &ClientConfig) -> Result<TcpStream> {
    let Some(timeout) = config.dial_timeout() else {
        return Ok(TcpStream::connect(addr)?);
    };
    let mut last = None;
    for candidate in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = Some(e),
        }
    }
    Err(last
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"))
        .into())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::object::Namespace;
    use crate::server::Server;

    #[test]
    fn attach_reuses_the_live_proxy_and_rebuilds_a_dead_one() {
        let server = Server::builder()
            .module("m", Namespace::new("m").into_ref())
            .bind("127.0.0.1:0")
            .unwrap();
        let addr = server.local_addr();
        let registry = server.registry();
        let stop = server.stop_handle();
        let worker = thread::spawn(move || server.serve());
        let client = Client::connect(addr).unwrap();

        let first = client.import_module("m").unwrap();
        let h = first.handle().unwrap();
        let again = Proxy::attach(&client.shared, h, None);
        assert_eq!(again, first);
        assert_eq!(again.name(), "m");
        assert_eq!(client.live_proxies(), 1);

        // The weak reference keeps the old allocation, so its address cannot
        // be reused by the next attach.
        let old = Arc::downgrade(&first.inner);
        drop(again);
        drop(first);
        assert!(old.upgrade().is_none());
        assert!(!registry.contains(h));

        let fresh = Proxy::attach(&client.shared, h, None);
        assert!(!std::ptr::eq(Arc::as_ptr(&fresh.inner), old.as_ptr()));
        assert_eq!(fresh.name(), h.to_string());
        assert!(!fresh.is_disconnected());
        // The server already dropped `h`; its release is answered
        // NotRegistered and the connection survives.
        drop(fresh);
        assert!(client.is_open());

        client.close().unwrap();
        stop.stop();
        worker.join().unwrap().unwrap();
    }
}
