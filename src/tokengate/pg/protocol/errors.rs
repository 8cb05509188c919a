use std::fmt;
use std::fmt::{Display, Formatter};

use crate::tokengate::{Error, Result};

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
#[repr(u8)]
pub enum ErrorSeverity {
    Log,
    Info,
    Debug,
    Notice,
    Warning,
    Error,
    Fatal,
    Panic,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ErrorSeverity::Log => "LOG",
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Debug => "DEBUG",
            ErrorSeverity::Notice => "NOTICE",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Fatal => "FATAL",
            ErrorSeverity::Panic => "PANIC",
        }
    }
}

impl Display for ErrorSeverity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for ErrorSeverity {
    fn default() -> Self {
        ErrorSeverity::Log
    }
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ErrorFieldTag(u8);

impl ErrorFieldTag {
    pub const NULL_TERMINATOR: ErrorFieldTag = ErrorFieldTag::new_unchecked(0);
    pub const LOCALIZED_SEVERITY: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'S');
    pub const SEVERITY: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'V');
    pub const CODE: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'C');
    pub const MESSAGE: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'M');
    pub const MESSAGE_DETAIL: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'D');
    pub const MESSAGE_HINT: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'H');
    pub const POSITION: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'P');
    pub const WHERE: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'W');
    pub const FILE: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'F');
    pub const LINE: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'L');
    pub const ROUTINE: ErrorFieldTag = ErrorFieldTag::new_unchecked(b'R');

    pub fn new(b: u8) -> Result<Self> {
        match b {
            0 | b'S' | b'V' | b'C' | b'M' | b'D' | b'H' | b'P' | b'p' | b'q' | b'W' | b's'
            | b't' | b'c' | b'd' | b'n' | b'F' | b'L' | b'R' => Ok(ErrorFieldTag(b)),
            _ => Err(Error::protocol_error(format!(
                "unknown error field tag {}",
                b
            ))),
        }
    }

    pub const fn new_unchecked(b: u8) -> Self {
        ErrorFieldTag(b)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}
