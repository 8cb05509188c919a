use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::tokengate::auth::{DatabaseInfo, DatabaseLookup, RevocationCache, TokenValidator};
use crate::tokengate::pg::backend_auth::{self, BACKEND_USER};
use crate::tokengate::pg::protocol::codec::{
    self, AUTHENTICATION_OK, AUTH_REQUEST_CLEARTEXT_PASSWORD,
};
use crate::tokengate::pg::protocol::{
    ErrorSeverity, MessageBuilder, MessageErrorBuilder, StartupParams, Tag, PROTOCOL_VERSION,
};
use crate::tokengate::{Error, Result};

/// Time allowed for the dial to the internal host before trying the fallback
const DIAL_TIMEOUT: Duration = Duration::from_millis(200);
/// Time allowed for the dial to the mapped loopback port
const FALLBACK_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// One client connection being shepherded from accept to relay.
///
/// The handshake is strictly request/response on both sockets so a single
/// task drives it sequentially. Once both sides are at ReadyForQuery the
/// session degenerates into a pair of one-way byte copies.
pub struct Session {
    client: TcpStream,
    validator: Arc<dyn TokenValidator>,
    lookup: Arc<dyn DatabaseLookup>,
    revoked: Arc<RevocationCache>,
    handshake_timeout: Duration,
}

impl Session {
    pub fn new(
        client: TcpStream,
        validator: Arc<dyn TokenValidator>,
        lookup: Arc<dyn DatabaseLookup>,
        revoked: Arc<RevocationCache>,
        handshake_timeout: Duration,
    ) -> Self {
        Session {
            client,
            validator,
            lookup,
            revoked,
            handshake_timeout,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        // The deadline covers everything from accept to ReadyForQuery on the
        // client. Relay mode has no inactivity timeout.
        let handshake = timeout(self.handshake_timeout, self.handshake()).await;
        match handshake {
            Ok(Ok(backend)) => relay(self.client, backend).await,
            Ok(Err(e)) => {
                self.report_error(&e).await;
                Err(e)
            }
            Err(_) => {
                debug!("closing connection, handshake deadline exceeded");
                Err(Error::timeout())
            }
        }
    }

    /// The handshake state machine. Returns the authenticated backend
    /// connection, with both sockets at ReadyForQuery.
    async fn handshake(&mut self) -> Result<TcpStream> {
        let (params, version) = codec::read_startup(&mut self.client).await?;
        if version != PROTOCOL_VERSION {
            debug!(version, "client sent unexpected protocol version");
        }
        params
            .get("user")
            .ok_or_else(|| Error::protocol_error("startup message is missing user"))?;
        params
            .get("database")
            .ok_or_else(|| Error::protocol_error("startup message is missing database"))?;

        // The token arrives as the cleartext password
        self.client.write_all(&AUTH_REQUEST_CLEARTEXT_PASSWORD).await?;
        let (tag, payload) = codec::read_message(&mut self.client).await?;
        if tag != Tag::PASSWORD_MESSAGE {
            return Err(Error::protocol_error(format!(
                "expected password message, got {}",
                tag
            )));
        }
        let raw = match payload.last() {
            Some(0) => &payload[..payload.len() - 1],
            _ => &payload[..],
        };
        let token = std::str::from_utf8(raw)
            .map_err(|_| Error::protocol_error("password message is not valid utf-8"))?;

        let claims = self.validator.validate(token).map_err(|e| {
            debug!(%e, "token validation failed");
            Error::auth_error("Invalid JWT token")
        })?;
        if self.revoked.is_revoked(&claims.token_id) {
            debug!(token_id = %claims.token_id, "token is revoked");
            return Err(Error::auth_error("Invalid JWT token"));
        }
        let db = self.lookup.lookup(claims.database_id).ok_or_else(|| {
            Error::lookup_error(format!("database {} does not exist", claims.database_id))
        })?;

        // The commit point: from here the client considers itself connected
        // and any backend-side failure surfaces as an ordinary FATAL error.
        self.client.write_all(&AUTHENTICATION_OK).await?;
        info!(token_id = %claims.token_id, db = %db.name, "client authenticated");

        let mut backend = dial_backend(&db).await?;
        send_backend_startup(&mut backend, &params, &db).await?;
        backend_auth::authenticate(&mut self.client, &mut backend, &db).await?;
        Ok(backend)
    }

    /// Surface a handshake failure on the client socket as a FATAL
    /// ErrorResponse, when this kind of error calls for one. Errors that
    /// already produced a message (a forwarded backend ErrorResponse) or
    /// that mean the socket is unusable map to no SQLSTATE and just close.
    async fn report_error(&mut self, e: &Error) {
        if let Some(code) = e.sqlstate() {
            let msg = MessageErrorBuilder::new(ErrorSeverity::Fatal, code, &e.to_string()).finish();
            if let Err(write_err) = self.client.write_all(&msg).await {
                debug!(%write_err, "could not report error to client");
            }
        }
    }
}

/// Dial the backend's internal address, falling back to its mapped loopback
/// port when one is configured. The internal attempt gets a short timeout,
/// the fallback a generous one.
async fn dial_backend(db: &DatabaseInfo) -> Result<TcpStream> {
    match timeout(DIAL_TIMEOUT, TcpStream::connect((db.host.as_str(), db.port))).await {
        Ok(Ok(stream)) => {
            debug!(host = %db.host, port = db.port, "connected to backend");
            return Ok(stream);
        }
        Ok(Err(e)) => warn!(%e, host = %db.host, port = db.port, "backend dial failed"),
        Err(_) => warn!(host = %db.host, port = db.port, "backend dial timed out"),
    }
    if db.mapped_port > 0 {
        match timeout(
            FALLBACK_DIAL_TIMEOUT,
            TcpStream::connect(("127.0.0.1", db.mapped_port)),
        )
        .await
        {
            Ok(Ok(stream)) => {
                debug!(port = db.mapped_port, "connected to backend on mapped loopback port");
                return Ok(stream);
            }
            Ok(Err(e)) => warn!(%e, port = db.mapped_port, "fallback dial failed"),
            Err(_) => warn!(port = db.mapped_port, "fallback dial timed out"),
        }
    }
    Err(Error::dial_error(format!(
        "could not connect to database \"{}\"",
        db.name
    )))
}

/// Send the startup message to the backend: same protocol version and
/// parameters the client sent, except user and database are forced to the
/// backend's own. Protocol extension parameters (_pq_*) pass through.
async fn send_backend_startup(
    backend: &mut TcpStream,
    params: &StartupParams,
    db: &DatabaseInfo,
) -> Result<()> {
    let mut outbound = StartupParams::new();
    for (k, v) in params.iter() {
        match k {
            "user" => outbound.add("user", BACKEND_USER),
            "database" => outbound.add("database", &db.name),
            _ => outbound.add(k, v),
        }
    }
    let mut mb = MessageBuilder::new(Tag::UNTAGGED);
    mb.write_i32(PROTOCOL_VERSION);
    mb.write_params(&outbound);
    mb.write_byte(0);
    backend.write_all(&mb.finish()).await?;
    Ok(())
}

/// Relay mode: raw byte copies, one per direction. Both sides are past all
/// pre-message negotiation so copying without reframing is protocol-safe.
/// The first direction to error or reach EOF tears both sockets down.
async fn relay(client: TcpStream, backend: TcpStream) -> Result<()> {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut backend_read, mut backend_write) = backend.into_split();

    let mut backend_to_client = tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut backend_read, &mut client_write).await {
            debug!(%e, "backend to client copy ended");
        }
    });

    tokio::select! {
        r = tokio::io::copy(&mut client_read, &mut backend_write) => {
            if let Err(e) = r {
                debug!(%e, "client to backend copy ended");
            }
        }
        _ = &mut backend_to_client => {}
    }
    // Dropping the halves closes both sockets, which unblocks whichever
    // direction is still running.
    backend_to_client.abort();
    Ok(())
}
