//! One accepted connection, from first request to close.

use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream};

use tether_proto::{CodecError, FaultInfo, Message, MessageError, Response};

use super::Environment;
use super::dispatch::Dispatcher;
use crate::error::Result;
use crate::registry::ConnId;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The client said `Bye`.
    Bye,
    /// The client asked the whole server to stop.
    Stop,
    /// The peer went away or the stream failed.
    Dropped,
}

/// Serves `stream` until it ends and cleans up after it.
pub(crate) fn serve(stream: TcpStream, env: &Environment, conn: ConnId) -> Outcome {
    let peer = stream.peer_addr().ok();
    let outcome = match run(&stream, env, conn) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(%conn, ?peer, error = %e, "session failed");
            Outcome::Dropped
        }
    };
    let _ = stream.shutdown(Shutdown::Both);

    if outcome == Outcome::Dropped && env.config.release_on_disconnect {
        let released = env.registry.release_owned_by(conn);
        tracing::info!(%conn, released, "released handles of dropped connection");
    }
    tracing::info!(%conn, ?peer, ?outcome, "connection closed");
    outcome
}

/// Reads, dispatches and replies until the session ends.
fn run(stream: &TcpStream, env: &Environment, conn: ConnId) -> Result<Outcome> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(env.config.idle_timeout())?;
    let mut r = BufReader::new(stream.try_clone()?);
    let mut w = BufWriter::new(stream.try_clone()?);
    let limits = env.config.limits();
    let dispatcher = Dispatcher::new(env, conn);

    loop {
        let frame = match tether_proto::decode(&mut r, &limits) {
            Ok(v) => v,
            // Disconnect without Bye.
            Err(CodecError::Closed) => return Ok(Outcome::Dropped),
            Err(e) => return Err(e.into()),
        };
        let message = match Message::from_wire(frame) {
            Ok(m) => m,
            Err(MessageError::UnknownVerb(verb)) => {
                tracing::warn!(%conn, verb, "unknown message kind");
                reply(
                    &mut w,
                    &Response::Fault(FaultInfo::new("ProtocolError", "unknown message kind")),
                )?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(%conn, verb = message.name(), "request");

        match message {
            Message::Bye => return Ok(Outcome::Bye),
            Message::StopServer => {
                reply(&mut w, &Response::Ok(tether_proto::WireValue::Unit))?;
                tracing::info!(%conn, "stop requested");
                return Ok(Outcome::Stop);
            }
            other => reply(&mut w, &dispatcher.dispatch(other))?,
        }
    }
}

/// Writes and flushes one response.
fn reply(w: &mut BufWriter<TcpStream>, response: &Response) -> Result<()> {
    tether_proto::encode(w, &response.to_wire())?;
    w.flush()?;
    Ok(())
}

