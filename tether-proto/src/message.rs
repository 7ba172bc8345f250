//! Request and response messages exchanged over one connection.
//!
//! Each message is a single [`WireValue::Tuple`] whose first element is an
//! integer verb or status code:
//!
//! ```text
//! GetAttribute   (0, handle, name)          -> Ok(value) | NotRegistered | NoSuchMember
//! GetGlobals     (1,)                       -> Ok(handle)
//! Call           (2, handle, (args...))     -> Ok(value) | Fault | NotRegistered | NoSuchMember
//! SetAttribute   (3, handle, name, value)   -> Ok(()) | Fault | NotRegistered
//! ImportModule   (4, name)                  -> Ok(handle) | Fault
//! ReleaseObject  (5, handle)                -> Ok(()) | NotRegistered
//! ListMembers    (6, handle)                -> Ok([names...]) | NotRegistered
//! StopServer     (7,)                       -> Ok(())
//! Bye            (-1,)                      -> no response
//! ```

use std::fmt;

use crate::value::{Handle, WireValue};

/// Verb codes.
pub mod verb {
    /// Read a member of an object.
    pub const GET_ATTRIBUTE: i64 = 0;
    /// Export the server's globals object.
    pub const GET_GLOBALS: i64 = 1;
    /// Invoke an object.
    pub const CALL: i64 = 2;
    /// Assign a member of an object.
    pub const SET_ATTRIBUTE: i64 = 3;
    /// Export a registered module by name.
    pub const IMPORT_MODULE: i64 = 4;
    /// Drop one registry entry.
    pub const RELEASE_OBJECT: i64 = 5;
    /// Enumerate member names of an object.
    pub const LIST_MEMBERS: i64 = 6;
    /// Shut the whole server down.
    pub const STOP_SERVER: i64 = 7;
    /// Close this connection.
    pub const BYE: i64 = -1;
}

/// Response status codes.
pub mod status {
    /// Operation succeeded.
    pub const OK: i64 = 0;
    /// The native operation failed.
    pub const FAULT: i64 = 1;
    /// The target handle is not in the registry.
    pub const NOT_REGISTERED: i64 = 2;
    /// The target has no such member (or no call capability).
    pub const NO_SUCH_MEMBER: i64 = 3;
}

/// Structured description of a failed native operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct FaultInfo {
    /// Error category, e.g. `ValueError`.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

impl FaultInfo {
    /// Creates a fault of the given kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// A fault raised for an argument of the wrong type.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// A fault raised for an argument with the right type but a bad value.
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    /// A fault raised when a call receives the wrong number of arguments.
    pub fn arity(name: &str, expected: usize, got: usize) -> Self {
        Self::type_error(format!(
            "{name}() takes {expected} argument(s) but {got} were given"
        ))
    }

    /// Encodes as `(kind, message)`.
    fn to_wire(&self) -> WireValue {
        WireValue::Tuple(vec![
            WireValue::Str(self.kind.clone()),
            WireValue::Str(self.message.clone()),
        ])
    }

    /// Parses the `(kind, message)` form.
    fn from_wire(v: WireValue) -> Result<Self, MessageError> {
        match v {
            WireValue::Tuple(items) => match <[WireValue; 2]>::try_from(items) {
                Ok([WireValue::Str(kind), WireValue::Str(message)]) => Ok(Self { kind, message }),
                _ => Err(MessageError::malformed("fault", "expected (kind, message)")),
            },
            other => Err(MessageError::malformed("fault", other.kind())),
        }
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FaultInfo {}

/// Reason a well-formed value could not be read as a message or response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum MessageError {
    /// The verb is outside the known set. The stream itself is intact.
    #[error("unknown message kind {0}")]
    UnknownVerb(i64),
    /// The value does not have the shape its verb requires.
    #[error("malformed {what}: {reason}")]
    Malformed {
        /// Which message or response was being read.
        what: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

impl MessageError {
    /// Builds a `Malformed` error.
    fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }

    /// Returns `true` if the connection can keep going after this error.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownVerb(_))
    }
}

/// A request sent by the client.
#[derive(Debug, Clone, PartialEq)]
// Verbs are fixed by the wire protocol; unknown ones are a decode error.
#[allow(clippy::exhaustive_enums)]
pub enum Message {
    /// Read member `name` of `target`.
    GetAttribute {
        /// Object to read from.
        target: Handle,
        /// Member name.
        name: String,
    },
    /// Assign `value` to member `name` of `target`.
    SetAttribute {
        /// Object to write to.
        target: Handle,
        /// Member name.
        name: String,
        /// Wrapped new value.
        value: WireValue,
    },
    /// Invoke `target` with positional `args`.
    Call {
        /// Object to invoke.
        target: Handle,
        /// Wrapped positional arguments.
        args: Vec<WireValue>,
    },
    /// Export module `name`.
    ImportModule {
        /// Module name.
        name: String,
    },
    /// Export the server's globals object.
    GetGlobals,
    /// Enumerate member names of `target`.
    ListMembers {
        /// Object to enumerate.
        target: Handle,
    },
    /// Drop the registry entry for `target`.
    ReleaseObject {
        /// Handle to release.
        target: Handle,
    },
    /// Stop the server.
    StopServer,
    /// Close this connection; no response follows.
    Bye,
}

impl Message {
    /// Returns the message's verb code.
    pub const fn verb(&self) -> i64 {
        match self {
            Self::GetAttribute { .. } => verb::GET_ATTRIBUTE,
            Self::SetAttribute { .. } => verb::SET_ATTRIBUTE,
            Self::Call { .. } => verb::CALL,
            Self::ImportModule { .. } => verb::IMPORT_MODULE,
            Self::GetGlobals => verb::GET_GLOBALS,
            Self::ListMembers { .. } => verb::LIST_MEMBERS,
            Self::ReleaseObject { .. } => verb::RELEASE_OBJECT,
            Self::StopServer => verb::STOP_SERVER,
            Self::Bye => verb::BYE,
        }
    }

    /// Verb name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetAttribute { .. } => "get_attribute",
            Self::SetAttribute { .. } => "set_attribute",
            Self::Call { .. } => "call",
            Self::ImportModule { .. } => "import_module",
            Self::GetGlobals => "get_globals",
            Self::ListMembers { .. } => "list_members",
            Self::ReleaseObject { .. } => "release_object",
            Self::StopServer => "stop_server",
            Self::Bye => "bye",
        }
    }

    /// Converts the message into its wire form.
    pub fn to_wire(&self) -> WireValue {
        let mut items = vec![WireValue::Int(self.verb())];
        match self {
            Self::GetAttribute { target, name } => {
                items.push(WireValue::Handle(*target));
                items.push(WireValue::Str(name.clone()));
            }
            Self::SetAttribute {
                target,
                name,
                value,
            } => {
                items.push(WireValue::Handle(*target));
                items.push(WireValue::Str(name.clone()));
                items.push(value.clone());
            }
            Self::Call { target, args } => {
                items.push(WireValue::Handle(*target));
                items.push(WireValue::Tuple(args.clone()));
            }
            Self::ImportModule { name } => items.push(WireValue::Str(name.clone())),
            Self::ListMembers { target } | Self::ReleaseObject { target } => {
                items.push(WireValue::Handle(*target));
            }
            Self::GetGlobals | Self::StopServer | Self::Bye => {}
        }
        WireValue::Tuple(items)
    }

    /// Parses a decoded wire value as a message.
    pub fn from_wire(v: WireValue) -> Result<Self, MessageError> {
        let (code, mut rest) = split_tagged("message", v)?;
        let what = "message";
        let msg = match code {
            verb::GET_ATTRIBUTE => {
                let [target, name] = take::<2>(what, &mut rest)?;
                Self::GetAttribute {
                    target: handle(what, target)?,
                    name: string(what, name)?,
                }
            }
            verb::SET_ATTRIBUTE => {
                let [target, name, value] = take::<3>(what, &mut rest)?;
                Self::SetAttribute {
                    target: handle(what, target)?,
                    name: string(what, name)?,
                    value,
                }
            }
            verb::CALL => {
                let [target, args] = take::<2>(what, &mut rest)?;
                let WireValue::Tuple(args) = args else {
                    return Err(MessageError::malformed(what, "call arguments must be a tuple"));
                };
                Self::Call {
                    target: handle(what, target)?,
                    args,
                }
            }
            verb::IMPORT_MODULE => {
                let [name] = take::<1>(what, &mut rest)?;
                Self::ImportModule {
                    name: string(what, name)?,
                }
            }
            verb::GET_GLOBALS => {
                take::<0>(what, &mut rest)?;
                Self::GetGlobals
            }
            verb::LIST_MEMBERS => {
                let [target] = take::<1>(what, &mut rest)?;
                Self::ListMembers {
                    target: handle(what, target)?,
                }
            }
            verb::RELEASE_OBJECT => {
                let [target] = take::<1>(what, &mut rest)?;
                Self::ReleaseObject {
                    target: handle(what, target)?,
                }
            }
            verb::STOP_SERVER => {
                take::<0>(what, &mut rest)?;
                Self::StopServer
            }
            verb::BYE => {
                take::<0>(what, &mut rest)?;
                Self::Bye
            }
            other => return Err(MessageError::UnknownVerb(other)),
        };
        Ok(msg)
    }
}

/// A reply to one [`Message`].
#[derive(Debug, Clone, PartialEq)]
// Statuses are fixed by the wire protocol.
#[allow(clippy::exhaustive_enums)]
pub enum Response {
    /// Success, carrying the wrapped result (`Unit` for mutations).
    Ok(WireValue),
    /// The native operation failed.
    Fault(FaultInfo),
    /// The handle is not (or no longer) registered.
    NotRegistered(Handle),
    /// The member does not exist; for calls, the target is not callable.
    NoSuchMember(String),
}

impl Response {
    /// Converts the response into its wire form.
    pub fn to_wire(&self) -> WireValue {
        WireValue::Tuple(match self {
            Self::Ok(v) => vec![WireValue::Int(status::OK), v.clone()],
            Self::Fault(f) => vec![WireValue::Int(status::FAULT), f.to_wire()],
            Self::NotRegistered(h) => {
                vec![WireValue::Int(status::NOT_REGISTERED), WireValue::Handle(*h)]
            }
            Self::NoSuchMember(name) => vec![
                WireValue::Int(status::NO_SUCH_MEMBER),
                WireValue::Str(name.clone()),
            ],
        })
    }

    /// Parses a decoded wire value as a response.
    pub fn from_wire(v: WireValue) -> Result<Self, MessageError> {
        let what = "response";
        let (code, mut rest) = split_tagged(what, v)?;
        let [payload] = take::<1>(what, &mut rest)?;
        match code {
            status::OK => Ok(Self::Ok(payload)),
            status::FAULT => Ok(Self::Fault(FaultInfo::from_wire(payload)?)),
            status::NOT_REGISTERED => Ok(Self::NotRegistered(handle(what, payload)?)),
            status::NO_SUCH_MEMBER => Ok(Self::NoSuchMember(string(what, payload)?)),
            other => Err(MessageError::malformed(what, format!("unknown status {other}"))),
        }
    }
}

/// Splits `(code, fields...)` into the code and the remaining fields.
fn split_tagged(
    what: &'static str,
    v: WireValue,
) -> Result<(i64, std::vec::IntoIter<WireValue>), MessageError> {
    let WireValue::Tuple(items) = v else {
        return Err(MessageError::malformed(what, format!("expected tuple, got {}", v.kind())));
    };
    let mut items = items.into_iter();
    match items.next() {
        Some(WireValue::Int(code)) => Ok((code, items)),
        Some(other) => Err(MessageError::malformed(
            what,
            format!("expected integer tag, got {}", other.kind()),
        )),
        None => Err(MessageError::malformed(what, "empty tuple")),
    }
}

/// Takes exactly `N` remaining fields.
fn take<const N: usize>(
    what: &'static str,
    rest: &mut std::vec::IntoIter<WireValue>,
) -> Result<[WireValue; N], MessageError> {
    let items: Vec<WireValue> = rest.by_ref().collect();
    let got = items.len();
    <[WireValue; N]>::try_from(items)
        .map_err(|_| MessageError::malformed(what, format!("expected {N} fields, got {got}")))
}

/// Reads a handle field.
fn handle(what: &'static str, v: WireValue) -> Result<Handle, MessageError> {
    match v {
        WireValue::Handle(h) => Ok(h),
        other => Err(MessageError::malformed(
            what,
            format!("expected handle, got {}", other.kind()),
        )),
    }
}

/// Reads a string field.
fn string(what: &'static str, v: WireValue) -> Result<String, MessageError> {
    match v {
        WireValue::Str(s) => Ok(s),
        other => Err(MessageError::malformed(
            what,
            format!("expected string, got {}", other.kind()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_survive_wire_form() {
        let cases = vec![
            Message::GetAttribute {
                target: Handle(3),
                name: "sin".into(),
            },
            Message::SetAttribute {
                target: Handle(3),
                name: "x".into(),
                value: WireValue::List(vec![WireValue::Int(1)]),
            },
            Message::Call {
                target: Handle(9),
                args: vec![WireValue::Float(0.0)],
            },
            Message::ImportModule {
                name: "mathlib".into(),
            },
            Message::GetGlobals,
            Message::ListMembers { target: Handle(1) },
            Message::ReleaseObject { target: Handle(1) },
            Message::StopServer,
            Message::Bye,
        ];
        for msg in cases {
            assert_eq!(Message::from_wire(msg.to_wire()).unwrap(), msg);
        }
    }

    #[test]
    fn responses_survive_wire_form() {
        let cases = vec![
            Response::Ok(WireValue::Unit),
            Response::Ok(WireValue::Handle(Handle(4))),
            Response::Fault(FaultInfo::value_error("math domain error")),
            Response::NotRegistered(Handle(12)),
            Response::NoSuchMember("__call__".into()),
        ];
        for resp in cases {
            assert_eq!(Response::from_wire(resp.to_wire()).unwrap(), resp);
        }
    }

    #[test]
    fn unknown_verb_is_recoverable() {
        let err = Message::from_wire(WireValue::Tuple(vec![WireValue::Int(42)])).unwrap_err();
        assert_eq!(err, MessageError::UnknownVerb(42));
        assert!(err.is_recoverable());
    }

    #[test]
    fn wrong_shape_is_fatal() {
        let bad = [
            WireValue::Int(0),
            WireValue::Tuple(vec![]),
            WireValue::Tuple(vec![WireValue::from("get")]),
            WireValue::Tuple(vec![WireValue::Int(verb::GET_ATTRIBUTE), WireValue::Int(1)]),
            WireValue::Tuple(vec![
                WireValue::Int(verb::CALL),
                WireValue::Handle(Handle(1)),
                WireValue::List(vec![]),
            ]),
            WireValue::Tuple(vec![WireValue::Int(verb::BYE), WireValue::Unit]),
        ];
        for v in bad {
            let err = Message::from_wire(v).unwrap_err();
            assert!(!err.is_recoverable(), "{err}");
        }
    }

    #[test]
    fn fault_displays_kind_and_message() {
        let f = FaultInfo::new("ZeroDivisionError", "division by zero");
        assert_eq!(f.to_string(), "ZeroDivisionError: division by zero");
    }
}
