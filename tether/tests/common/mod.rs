//! Shared fixture: a real server on an ephemeral port with demo modules.
#![allow(dead_code)]

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tether::{FaultInfo, Namespace, Native, ObjectRef, Registry, Server, ServerConfig, StopHandle};
use tether_proto::{Limits, Message, Response, WireValue};

/// A running server that stops when dropped.
pub struct Fixture {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    stop: StopHandle,
    worker: Option<JoinHandle<tether::Result<()>>>,
}

impl Fixture {
    pub fn start() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let server = Server::builder()
            .config(config)
            .module("mathlib", mathlib())
            .module("echo", echo())
            .globals(Namespace::new("__main__").with("answer", 42i64).into_ref())
            .bind("127.0.0.1:0")
            .unwrap();
        let addr = server.local_addr();
        let registry = server.registry();
        let stop = server.stop_handle();
        let worker = thread::spawn(move || server.serve());
        Self {
            addr,
            registry,
            stop,
            worker: Some(worker),
        }
    }

    /// Waits for the accept loop to exit on its own.
    pub fn join(mut self) {
        if let Some(w) = self.worker.take() {
            w.join().unwrap().unwrap();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(w) = self.worker.take() {
            let _ = w.join();
        }
    }
}

pub fn mathlib() -> ObjectRef {
    Namespace::new("mathlib")
        .with("pi", std::f64::consts::PI)
        .with("e", std::f64::consts::E)
        .with_fn("sin", |args| unary("sin", &args).map(|x| Native::Float(x.sin())))
        .with_fn("sqrt", |args| {
            let x = unary("sqrt", &args)?;
            if x < 0.0 {
                return Err(FaultInfo::value_error("math domain error"));
            }
            Ok(Native::Float(x.sqrt()))
        })
        .read_only()
        .into_ref()
}

fn unary(name: &str, args: &[Native]) -> Result<f64, FaultInfo> {
    match args {
        [x] => x.float_arg("x"),
        _ => Err(FaultInfo::arity(name, 1, args.len())),
    }
}

pub fn echo() -> ObjectRef {
    Namespace::new("echo")
        .with_fn("echo", |mut args| {
            if args.len() == 1 {
                Ok(args.remove(0))
            } else {
                Ok(Native::Tuple(args))
            }
        })
        .with_fn("append", |args| match args.as_slice() {
            [Native::List(list), value] => {
                list.push(value.clone());
                Ok(Native::Int(i64::try_from(list.len()).unwrap_or(i64::MAX)))
            }
            _ => Err(FaultInfo::type_error("append(list, value)")),
        })
        .with_fn("sleep_ms", |args| {
            let ms = args.first().map_or(Ok(0), |a| a.int_arg("ms"))?;
            thread::sleep(Duration::from_millis(u64::try_from(ms).unwrap_or(0)));
            Ok(Native::Unit)
        })
        .with_fn("pairs", |_| {
            Ok(Native::Map(vec![
                (Native::from("a"), Native::Int(1)),
                (Native::from("b"), Native::Int(2)),
            ]))
        })
        .with("items", Native::list([Native::Int(1)]))
        .into_ref()
}

/// A connection speaking raw frames, bypassing the client.
pub struct Raw {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Raw {
    pub fn connect(addr: SocketAddr) -> Self {
        let writer = TcpStream::connect(addr).unwrap();
        writer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Self {
            reader: BufReader::new(writer.try_clone().unwrap()),
            writer,
        }
    }

    pub fn send_value(&mut self, value: &WireValue) {
        tether_proto::encode(&mut self.writer, value).unwrap();
        self.writer.flush().unwrap();
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
        self.writer.flush().unwrap();
    }

    pub fn send(&mut self, message: &Message) {
        self.send_value(&message.to_wire());
    }

    pub fn recv(&mut self) -> Response {
        let v = tether_proto::decode(&mut self.reader, &Limits::default()).unwrap();
        Response::from_wire(v).unwrap()
    }

    pub fn request(&mut self, message: &Message) -> Response {
        self.send(message);
        self.recv()
    }

    pub fn handle(&mut self, message: &Message) -> tether::Handle {
        match self.request(message) {
            Response::Ok(WireValue::Handle(h)) => h,
            other => panic!("expected a handle, got {other:?}"),
        }
    }

    /// Returns `true` once the server has closed its side.
    pub fn is_closed(&mut self) -> bool {
        // Unread input on the server side turns its close into a reset.
        match tether_proto::decode(&mut self.reader, &Limits::default()) {
            Err(tether_proto::CodecError::Closed) => true,
            Err(tether_proto::CodecError::Io(e)) => e.kind() == std::io::ErrorKind::ConnectionReset,
            _ => false,
        }
    }
}

/// Polls `cond` for up to two seconds.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
