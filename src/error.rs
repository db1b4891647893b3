use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use crate::{ObjectPathError, SignatureError};

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    /// The D-Bus error name, if this error was raised by the remote peer.
    ///
    /// Method calls which fail on the remote side surface here with the name
    /// of the D-Bus error, such as
    /// `org.freedesktop.DBus.Error.NameHasNoOwner`.
    pub fn remote_name(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Remote { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Test if the error indicates that the connection has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::ConnectionClosed)
    }

    /// Test if the error is a method reply timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::MethodReplyTimeout)
    }

    pub(crate) fn is_unexpected_eof(&self) -> bool {
        matches!(&self.kind, ErrorKind::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<ObjectPathError> for Error {
    #[inline]
    fn from(error: ObjectPathError) -> Self {
        Self::new(ErrorKind::ObjectPath(error))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::Io(error))
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(..) => write!(f, "I/O error"),
            ErrorKind::Signature(..) => write!(f, "Signature error"),
            ErrorKind::ObjectPath(..) => write!(f, "Object path error"),
            ErrorKind::Utf8(..) => write!(f, "UTF-8 error"),
            ErrorKind::BufferTooShort => write!(f, "Buffer too short"),
            ErrorKind::SignatureTooShort => write!(f, "Signature too short"),
            ErrorKind::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {expected}, found {found}")
            }
            ErrorKind::UnknownEndian(b) => {
                write!(f, "Unknown message endianness: {:?}", *b as char)
            }
            ErrorKind::BodyLengthMismatch { declared, decoded } => {
                write!(
                    f,
                    "Body length mismatch: declared {declared} bytes, decoded {decoded}"
                )
            }
            ErrorKind::ArrayTooLong(length) => {
                write!(f, "Array of length {length} is too long (max is 67108864)")
            }
            ErrorKind::BodyTooLong(length) => {
                write!(f, "Body of length {length} is too long (max is 134217728)")
            }
            ErrorKind::HeaderTooLong(length) => {
                write!(
                    f,
                    "Header of length {length} is too long (max is 67108864)"
                )
            }
            ErrorKind::ZeroSerial => write!(f, "Zero serial in outbound message"),
            ErrorKind::MissingBus => write!(f, "Missing bus to connect to"),
            ErrorKind::InvalidAddress(address) => {
                write!(f, "Invalid d-bus address: {address}")
            }
            ErrorKind::ConnectionClosed => write!(f, "Connection closed"),
            ErrorKind::AuthRejected(mechanisms) => {
                write!(f, "Authentication rejected, server supports: {mechanisms}")
            }
            ErrorKind::AuthError(message) => {
                write!(f, "Authentication error: {message}")
            }
            ErrorKind::AuthUnknownCommand(command) => {
                write!(f, "Unknown command in authentication exchange: {command}")
            }
            ErrorKind::CookieNotFound(context) => {
                write!(f, "SHA1 cookie not found in keyring context {context}")
            }
            ErrorKind::MethodReplyTimeout => write!(f, "Timed out waiting for method reply"),
            ErrorKind::Remote { name, message } => write!(f, "{name}: {message}"),
            ErrorKind::DuplicateHandler(path) => {
                write!(f, "A handler is already registered for {path}")
            }
            ErrorKind::RuleNotForSignals => write!(f, "Match rule is not for signals"),
            ErrorKind::AlreadyCancelled => write!(f, "Watch already cancelled"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::ObjectPath(error) => Some(error),
            ErrorKind::Utf8(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Signature(SignatureError),
    ObjectPath(ObjectPathError),
    Utf8(Utf8Error),
    BufferTooShort,
    SignatureTooShort,
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    UnknownEndian(u8),
    BodyLengthMismatch {
        declared: usize,
        decoded: usize,
    },
    ArrayTooLong(u32),
    BodyTooLong(u32),
    HeaderTooLong(u32),
    ZeroSerial,
    MissingBus,
    InvalidAddress(String),
    ConnectionClosed,
    AuthRejected(String),
    AuthError(String),
    AuthUnknownCommand(String),
    CookieNotFound(String),
    MethodReplyTimeout,
    Remote {
        name: String,
        message: String,
    },
    DuplicateHandler(crate::ObjectPath),
    RuleNotForSignals,
    AlreadyCancelled,
}
