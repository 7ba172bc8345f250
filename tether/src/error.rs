//! Error types for tether operations.

use tether_proto::{CodecError, FaultInfo, Handle};

/// Alias for `Result<T, tether::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by tether clients and servers.
///
/// `Transport`, `Malformed`, `Protocol` and `Timeout` leave the connection
/// unusable; every later call on it fails with [`Error::Closed`]. The
/// remaining variants are ordinary per-call failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Socket or stream failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer sent bytes that do not decode.
    #[error("malformed stream: {0}")]
    Malformed(CodecError),

    /// The peer sent a well-formed value that violates the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The handle is not registered on the server.
    #[error("object {0} is not registered")]
    UnknownHandle(Handle),

    /// The object has no such member, or cannot be called.
    #[error("no such member: {0}")]
    NoSuchMember(String),

    /// The remote operation itself failed.
    #[error("remote fault: {0}")]
    RemoteFault(FaultInfo),

    /// No response arrived within the configured read timeout.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The connection was closed or previously failed.
    #[error("connection closed")]
    Closed,

    /// A value cannot be sent as an argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns `true` if the error terminated the connection.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Malformed(_) | Self::Protocol(_) | Self::Timeout | Self::Closed
        )
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Self::Timeout
            }
            CodecError::Io(io) => Self::Transport(io),
            CodecError::Closed => Self::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            other => Self::Malformed(other),
        }
    }
}

impl From<tether_proto::MessageError> for Error {
    fn from(e: tether_proto::MessageError) -> Self {
        Self::Protocol(e.to_string())
    }
}
