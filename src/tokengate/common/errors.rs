use std::fmt::Display;
use std::net::AddrParseError;
use std::sync::PoisonError;
use std::{fmt, io, result};

use crate::tokengate::pg::protocol::error_codes;

#[derive(Debug)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

#[derive(Debug)]
pub enum ErrorKind {
    /// Malformed framing or an unexpected message on either socket
    ProtocolError(String),
    /// JWT invalid, expired or revoked; or a SCRAM negotiation failure
    AuthError(String),
    /// The database id carried in the token is unknown
    LookupError(String),
    /// Both backend dial attempts failed
    BackendDialError(String),
    /// The backend rejected the session with an ErrorResponse (already forwarded to the client)
    BackendError(String),
    Timeout,
    PoisonError,
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
    JWTError(jsonwebtoken::errors::Error),
    UTF8Error(std::str::Utf8Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(s.to_string())),
        }
    }

    pub fn protocol_error<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::ProtocolError(s.to_string())),
        }
    }

    pub fn auth_error<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::AuthError(s.to_string())),
        }
    }

    pub fn lookup_error<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::LookupError(s.to_string())),
        }
    }

    pub fn dial_error<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::BackendDialError(s.to_string())),
        }
    }

    pub fn backend_error<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::BackendError(s.to_string())),
        }
    }

    pub fn timeout() -> Self {
        Error {
            err: Box::new(ErrorKind::Timeout),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    /// The SQLSTATE to report to the client for this error, if it should be
    /// reported as an ErrorResponse at all. Errors that return None either
    /// already produced a message on the client socket or call for closing
    /// the connection without one.
    pub fn sqlstate(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::ProtocolError(_) => Some(error_codes::PROTOCOL_VIOLATION),
            ErrorKind::AuthError(_) | ErrorKind::JWTError(_) => {
                Some(error_codes::INVALID_AUTHORIZATION_SPECIFICATION)
            }
            ErrorKind::LookupError(_) => Some(error_codes::INVALID_CATALOG_NAME),
            ErrorKind::BackendDialError(_) => Some(error_codes::CONNECTION_FAILURE),
            _ => None,
        }
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(String::from(err))),
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(err)),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::IOError(err)),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::YAMLError(err)),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::JWTError(err)),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error {
            err: Box::new(ErrorKind::UTF8Error(err)),
        }
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::new(err)
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_err: PoisonError<Guard>) -> Self {
        Error {
            err: Box::new(ErrorKind::PoisonError),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::fmt::Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::ProtocolError(s) => f.write_str(s),
            ErrorKind::AuthError(s) => f.write_str(s),
            ErrorKind::LookupError(s) => f.write_str(s),
            ErrorKind::BackendDialError(s) => f.write_str(s),
            ErrorKind::BackendError(s) => f.write_str(s),
            ErrorKind::Timeout => f.write_str("operation timed out"),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the mutex"),
            ErrorKind::StringError(s) => f.write_str(s),
            ErrorKind::IOError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::YAMLError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::JWTError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::UTF8Error(e) => std::fmt::Display::fmt(&e, f),
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}
