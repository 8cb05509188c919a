use std::fmt::{Debug, Display, Formatter};

use crate::tokengate::{Error, Result};

pub const SSL_NOT_ALLOWED: u8 = b'N';
pub const SSL_REQUEST: i32 = 80877103;
pub const PROTOCOL_VERSION: i32 = 196608;

// Tag defines the Postgres protocol message type tag bytes
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Tag(u8);

impl Tag {
    // includes Startup, CancelRequest, SSLRequest, GSSENCRequest
    pub const UNTAGGED: Tag = Tag(0);
    // Frontend
    pub const PASSWORD_MESSAGE: Tag = Tag::new_unchecked(b'p');
    // also used for GSSAPI, SSPI and SASL responses
    pub const QUERY: Tag = Tag::new_unchecked(b'Q');
    pub const SYNC: Tag = Tag::new_unchecked(b'S');
    pub const TERMINATE: Tag = Tag::new_unchecked(b'X');
    // Backend
    pub const AUTHENTICATION: Tag = Tag::new_unchecked(b'R');
    // one of AuthenticationOk, AuthenticationCleartextPassword, AuthenticationMD5Password,
    // AuthenticationSASL, AuthenticationSASLContinue, AuthenticationSASLFinal, ...
    pub const BACKEND_KEY_DATA: Tag = Tag::new_unchecked(b'K');
    pub const COMMAND_COMPLETE: Tag = Tag::new_unchecked(b'C');
    pub const DATA_ROW: Tag = Tag::new_unchecked(b'D');
    pub const EMPTY_QUERY: Tag = Tag::new_unchecked(b'I');
    pub const READY_FOR_QUERY: Tag = Tag::new_unchecked(b'Z');
    pub const ROW_DESCRIPTION: Tag = Tag::new_unchecked(b'T');
    // Backend Async Messages (can also be synchronous, depending on context)
    pub const ERROR_RESPONSE: Tag = Tag::new_unchecked(b'E');
    // can be sent async e.g. if server is shutdown gracefully
    pub const PARAMETER_STATUS: Tag = Tag::new_unchecked(b'S');
    pub const NOTICE_RESPONSE: Tag = Tag::new_unchecked(b'N');
    pub const NOTIFICATION_RESPONSE: Tag = Tag::new_unchecked(b'A');

    pub fn new(b: u8) -> Result<Self> {
        if tag_name(b).is_some() {
            Ok(Tag(b))
        } else {
            Err(Error::protocol_error(format!(
                "unknown message tag '{}'",
                b as char
            )))
        }
    }

    pub const fn new_unchecked(b: u8) -> Self {
        Tag(b)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

fn tag_name(b: u8) -> Option<&'static str> {
    // Both directions of the v3 protocol. The same byte can name different
    // messages depending on the direction, we don't distinguish here.
    Some(match b {
        0 => "Untagged",
        b'1' => "ParseComplete",
        b'2' => "BindComplete",
        b'3' => "CloseComplete",
        b'A' => "NotificationResponse",
        b'B' => "Bind",
        b'C' => "CommandComplete",
        b'D' => "DataRow", // also Describe
        b'E' => "ErrorResponse", // also Execute
        b'F' => "FunctionCall",
        b'G' => "CopyInResponse",
        b'H' => "CopyOutResponse", // also Flush
        b'I' => "EmptyQueryResponse",
        b'K' => "BackendKeyData",
        b'N' => "NoticeResponse",
        b'P' => "Parse",
        b'Q' => "Query",
        b'R' => "Authentication",
        b'S' => "ParameterStatus", // also Sync
        b'T' => "RowDescription",
        b'V' => "FunctionCallResponse",
        b'W' => "CopyBothResponse",
        b'X' => "Terminate",
        b'Z' => "ReadyForQuery",
        b'c' => "CopyDone",
        b'd' => "CopyData",
        b'f' => "CopyFail",
        b'n' => "NoData",
        b'p' => "PasswordMessage",
        b's' => "PortalSuspended",
        b't' => "ParameterDescription",
        b'v' => "NegotiateProtocolVersion",
        _ => return None,
    })
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = tag_name(self.0) {
            return f.write_str(name);
        }
        f.write_fmt(format_args!("unknown message tag '{}'", self.0))
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
