use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::tokengate::auth::DatabaseInfo;
use crate::tokengate::pg::protocol::{
    codec, hash_md5_password, AuthType, MessageBuilder, MessageReader, ScramClient, Tag,
};
use crate::tokengate::{Error, Result};

/// The user the proxy authenticates as on the backend, regardless of the user
/// the client reported. A production fork would promote this to a field of
/// DatabaseInfo.
pub const BACKEND_USER: &str = "postgres";

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Drive the backend through authentication until it reports ReadyForQuery.
///
/// ParameterStatus, BackendKeyData and NoticeResponse messages received along
/// the way are forwarded to the client verbatim, in order, so the client
/// learns the server encoding, timezone and its cancellation key. An
/// ErrorResponse from the backend is forwarded verbatim and is terminal.
/// ReadyForQuery is forwarded with its transaction-status byte intact and
/// ends the loop.
pub async fn authenticate<C, B>(client: &mut C, backend: &mut B, db: &DatabaseInfo) -> Result<()>
where
    C: AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let (tag, payload) = codec::read_message(backend).await?;
        match tag {
            Tag::AUTHENTICATION => {
                let mut r = MessageReader::new(&payload);
                let code = r.read_i32();
                r.error()?;
                match AuthType::from_i32(code) {
                    Some(AuthType::Ok) => {
                        debug!(db = %db.name, "backend authentication ok");
                        // remain in the loop until ReadyForQuery
                    }
                    Some(auth_type) => {
                        respond_to_auth_request(client, backend, db, auth_type, &mut r).await?;
                    }
                    None => {
                        return Err(Error::auth_error(format!(
                            "unsupported auth method {}",
                            code
                        )));
                    }
                }
            }
            Tag::ERROR_RESPONSE => {
                codec::write_message(client, tag, &payload).await?;
                return Err(Error::backend_error("backend rejected authentication"));
            }
            Tag::READY_FOR_QUERY => {
                codec::write_message(client, tag, &payload).await?;
                return Ok(());
            }
            Tag::PARAMETER_STATUS | Tag::BACKEND_KEY_DATA | Tag::NOTICE_RESPONSE => {
                codec::write_message(client, tag, &payload).await?;
            }
            _ => {
                return Err(Error::protocol_error(format!(
                    "unexpected {} message during backend authentication",
                    tag
                )));
            }
        }
    }
}

/// Satisfy one authentication request using the stored database password.
async fn respond_to_auth_request<C, B>(
    client: &mut C,
    backend: &mut B,
    db: &DatabaseInfo,
    auth_type: AuthType,
    r: &mut MessageReader<'_>,
) -> Result<()>
where
    C: AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    match auth_type {
        AuthType::ClearText => {
            debug!(db = %db.name, "backend wants cleartext password");
            let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
            mb.write_str(&db.password);
            backend.write_all(&mb.finish()).await?;
            Ok(())
        }
        AuthType::MD5 => {
            debug!(db = %db.name, "backend wants md5 password");
            let salt = r.read_bytes(4)?;
            let digest = hash_md5_password(BACKEND_USER, &db.password, salt);
            let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
            mb.write_str(&digest);
            backend.write_all(&mb.finish()).await?;
            Ok(())
        }
        AuthType::SASL => {
            // The payload lists the offered mechanisms as null-terminated
            // strings ending with an empty one. We always pick SCRAM-SHA-256.
            let mut mechanisms = Vec::new();
            loop {
                let mechanism = r.read_str()?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            debug!(db = %db.name, ?mechanisms, "backend wants SASL, selecting {}", SCRAM_SHA_256);
            sasl_authenticate(client, backend, &db.password).await
        }
        _ => Err(Error::auth_error(format!(
            "unsupported auth method {}",
            auth_type
        ))),
    }
}

/// Run the SCRAM-SHA-256 exchange against the backend. Returns once the
/// server signature has been verified; the following AuthenticationOk is
/// left to the caller's loop.
async fn sasl_authenticate<C, B>(client: &mut C, backend: &mut B, password: &str) -> Result<()>
where
    C: AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let mut scram = ScramClient::new(BACKEND_USER, password);

    // SASLInitialResponse: mechanism name, then the length-prefixed client-first message
    let client_first = scram.client_first_message();
    let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
    mb.write_str(SCRAM_SHA_256);
    mb.write_i32(client_first.len() as i32);
    mb.write_bytes(client_first.as_bytes());
    backend.write_all(&mb.finish()).await?;

    let server_first = read_sasl_data(client, backend, AuthType::SASLContinue).await?;
    let client_final = scram.handle_server_first(&server_first)?;

    // continuation responses carry the bare message, no mechanism prefix
    let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
    mb.write_bytes(client_final.as_bytes());
    backend.write_all(&mb.finish()).await?;

    let server_final = read_sasl_data(client, backend, AuthType::SASLFinal).await?;
    scram.verify_server_final(&server_final)
}

/// Read the next SASL step from the backend, expecting the given code.
/// An ErrorResponse in its place is forwarded to the client and is terminal.
async fn read_sasl_data<C, B>(client: &mut C, backend: &mut B, expected: AuthType) -> Result<String>
where
    C: AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (tag, payload) = codec::read_message(backend).await?;
    match tag {
        Tag::AUTHENTICATION => {
            let mut r = MessageReader::new(&payload);
            let code = r.read_i32();
            r.error()?;
            if AuthType::from_i32(code) != Some(expected) {
                return Err(Error::protocol_error(format!(
                    "expected {} from backend, got auth code {}",
                    expected, code
                )));
            }
            Ok(std::str::from_utf8(r.read_to_end())?.to_string())
        }
        Tag::ERROR_RESPONSE => {
            codec::write_message(client, tag, &payload).await?;
            Err(Error::backend_error("backend rejected SASL authentication"))
        }
        _ => Err(Error::protocol_error(format!(
            "unexpected {} message during SASL exchange",
            tag
        ))),
    }
}
