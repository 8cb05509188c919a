use std::convert::TryInto;
use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::tokengate::pg::protocol::{StartupParams, Tag, SSL_NOT_ALLOWED, SSL_REQUEST};
use crate::tokengate::{Error, Result};

/// Startup packets are capped at the same length Postgres itself enforces.
pub const MAX_STARTUP_PACKET_LEN: u32 = 10_000;
/// Typed messages parsed outside of relay mode are capped at 1MB.
/// Handshake-phase messages are all small, anything bigger is a framing bug.
pub const MAX_MESSAGE_LEN: u32 = 1024 * 1024;

/// AuthenticationCleartextPassword, complete with framing
pub const AUTH_REQUEST_CLEARTEXT_PASSWORD: [u8; 9] = [b'R', 0, 0, 0, 8, 0, 0, 0, 3];
/// AuthenticationOk, complete with framing
pub const AUTHENTICATION_OK: [u8; 9] = [b'R', 0, 0, 0, 8, 0, 0, 0, 0];

/// Read a startup message: `[4-byte length][4-byte version][params]` with no
/// leading tag byte. An SSLRequest is answered with a single 'N' byte (the
/// pre-startup SSL negotiation is frameless) and the next packet is read in
/// its place.
pub async fn read_startup<S>(stream: &mut S) -> Result<(StartupParams, i32)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut frame = [0u8; 4];
        stream.read_exact(&mut frame).await.map_err(eof_is_protocol_error)?;
        let len = u32::from_be_bytes(frame);
        if len < 8 {
            return Err(Error::protocol_error(format!(
                "startup message length {} too short",
                len
            )));
        }
        if len > MAX_STARTUP_PACKET_LEN {
            return Err(Error::protocol_error(format!(
                "startup message length {} exceeds maximum {}",
                len, MAX_STARTUP_PACKET_LEN
            )));
        }

        let mut body = vec![0u8; (len - 4) as usize];
        stream.read_exact(&mut body).await.map_err(eof_is_protocol_error)?;
        let code = i32::from_be_bytes(body[..4].try_into().unwrap());
        if code == SSL_REQUEST {
            debug!("client requested SSL, declining");
            stream.write_all(&[SSL_NOT_ALLOWED]).await?;
            continue;
        }

        let params = StartupParams::parse(&body[4..])?;
        return Ok((params, code));
    }
}

/// Read one typed message: `[1-byte tag][4-byte length][payload]`.
/// Returns the tag and the payload with the framing stripped.
pub async fn read_message<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(Tag, Bytes)> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.map_err(eof_is_protocol_error)?;
    let tag = Tag::new(header[0])?;
    let len = u32::from_be_bytes(header[1..5].try_into().unwrap());
    if len < 4 {
        return Err(Error::protocol_error(format!(
            "{} message length {} too short",
            tag, len
        )));
    }
    if len - 4 > MAX_MESSAGE_LEN {
        return Err(Error::protocol_error(format!(
            "{} message length {} exceeds maximum {}",
            tag, len, MAX_MESSAGE_LEN
        )));
    }

    let mut payload = BytesMut::with_capacity((len - 4) as usize);
    payload.resize((len - 4) as usize, 0);
    stream
        .read_exact(&mut payload)
        .await
        .map_err(eof_is_protocol_error)?;
    Ok((tag, payload.freeze()))
}

/// Write one typed message with its framing: `tag + uint32(len+4) + payload`.
pub async fn write_message<S: AsyncWrite + Unpin>(
    stream: &mut S,
    tag: Tag,
    payload: &[u8],
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(tag.as_u8());
    buf.put_u32(payload.len() as u32 + 4);
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await?;
    Ok(())
}

/// A peer that hangs up mid-message is a framing violation, not an I/O failure.
fn eof_is_protocol_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::protocol_error("unexpected end of stream")
    } else {
        Error::from(e)
    }
}
