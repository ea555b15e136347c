//! Error kinds raised by the bridge

use crate::handle::Handle;
use thiserror::Error;

/// A value could not satisfy the requested type.
///
/// `from` names the source type (a runtime type tag or a host kind) and `to`
/// the requested host type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert from `{from}` to `{to}`")]
pub struct ConversionError {
    pub from: String,
    pub to: String,
}

impl ConversionError {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Errors that can occur while registering a struct type or a function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("symbol name is empty")]
    EmptyName,

    #[error("'{name}' is not a valid symbol name")]
    InvalidName { name: String },

    #[error("cannot place '{name}': '{segment}' already holds a {found} value")]
    NamespaceConflict {
        name: String,
        segment: String,
        found: String,
    },

    #[error("type '{type_name}' exposes '{field}' more than once")]
    DuplicateField { type_name: String, field: String },

    #[error("function '{name}': only the last parameter may be variadic")]
    VariadicNotLast { name: String },

    #[error("raw function '{name}' must have shape `(State) -> ReturnCount`, found `{shape}`")]
    InvalidRawShape { name: String, shape: String },

    #[error("function '{name}' uses `{shape}` outside the raw calling convention")]
    ContextOutsideRaw { name: String, shape: String },
}

/// Bridge error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("{kind} proxy used after release")]
    UseAfterRelease { kind: &'static str },

    #[error("no host value registered for handle {handle}")]
    NotRegistered { handle: Handle },

    #[error("invalid key type `{key_type}` for table access")]
    KeyType { key_type: String },

    #[error("'{name}' is not a member of '{type_name}'")]
    UnknownMember { type_name: String, name: String },

    #[error("cannot assign to method '{name}' of '{type_name}'")]
    MethodAssignment { type_name: String, name: String },

    #[error("{kind} value cannot be {operation}")]
    Unsupported {
        kind: String,
        operation: &'static str,
    },

    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("invalid sequence index: {reason}")]
    InvalidIndex { reason: String },

    #[error("bad argument #{position} to '{function}': {source}")]
    Argument {
        position: usize,
        function: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{message}")]
    Runtime { message: String },

    #[error("script runtime has been closed")]
    RuntimeClosed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime {
            message: message.into(),
        }
    }

    /// Wrap as an error the embedded runtime can raise.
    pub(crate) fn into_lua(self) -> mlua::Error {
        mlua::Error::external(self)
    }
}

impl From<mlua::Error> for Error {
    /// Recover the bridge error a callback raised, or keep the runtime's message as raised.
    fn from(err: mlua::Error) -> Self {
        match err {
            mlua::Error::CallbackError { cause, .. } => Error::from((*cause).clone()),
            mlua::Error::ExternalError(inner) => match inner.downcast_ref::<Error>() {
                Some(raised) => raised.duplicate(),
                None => Error::runtime(inner.to_string()),
            },
            mlua::Error::RuntimeError(message) => Error::runtime(strip_traceback(&message)),
            other => Error::runtime(other.to_string()),
        }
    }
}

/// The runtime appends a stack traceback to errors leaving a protected call.
fn strip_traceback(message: &str) -> &str {
    message
        .split_once("\nstack traceback:")
        .map_or(message, |(raised, _)| raised)
}

impl Error {
    /// Rebuild an error shared through the runtime. I/O and settings errors
    /// keep their kind and message.
    fn duplicate(&self) -> Self {
        match self {
            Error::Conversion(err) => Error::Conversion(err.clone()),
            Error::Registration(err) => Error::Registration(err.clone()),
            Error::UseAfterRelease { kind } => Error::UseAfterRelease { kind: *kind },
            Error::NotRegistered { handle } => Error::NotRegistered { handle: *handle },
            Error::KeyType { key_type } => Error::KeyType {
                key_type: key_type.clone(),
            },
            Error::UnknownMember { type_name, name } => Error::UnknownMember {
                type_name: type_name.clone(),
                name: name.clone(),
            },
            Error::MethodAssignment { type_name, name } => Error::MethodAssignment {
                type_name: type_name.clone(),
                name: name.clone(),
            },
            Error::Unsupported { kind, operation } => Error::Unsupported {
                kind: kind.clone(),
                operation: *operation,
            },
            Error::IndexOutOfRange { index, len } => Error::IndexOutOfRange {
                index: *index,
                len: *len,
            },
            Error::InvalidIndex { reason } => Error::InvalidIndex {
                reason: reason.clone(),
            },
            Error::Argument {
                position,
                function,
                source,
            } => Error::Argument {
                position: *position,
                function: function.clone(),
                source: Box::new(source.duplicate()),
            },
            Error::Runtime { message } => Error::runtime(message.clone()),
            Error::RuntimeClosed => Error::RuntimeClosed,
            Error::Io(err) => Error::Io(std::io::Error::new(err.kind(), err.to_string())),
            Error::Settings(err) => Error::Settings(serde::de::Error::custom(err.to_string())),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
