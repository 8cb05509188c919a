use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::tokengate::auth::{DatabaseLookup, RevocationCache, TokenValidator};
use crate::tokengate::pg::Session;
use crate::tokengate::server::Listener;
use crate::tokengate::Result;

/// The accept loop: one independent session task per client connection.
/// Sessions share nothing but the revocation cache and the injected
/// collaborators, which are all safe for concurrent use.
pub struct ProxyService {
    listener: Listener,
    validator: Arc<dyn TokenValidator>,
    lookup: Arc<dyn DatabaseLookup>,
    revoked: Arc<RevocationCache>,
    handshake_timeout: Duration,
    max_connections: u32,
    active: Arc<AtomicU32>,
}

impl ProxyService {
    pub fn new(
        address: String,
        max_connections: u32,
        handshake_timeout: Duration,
        validator: Arc<dyn TokenValidator>,
        lookup: Arc<dyn DatabaseLookup>,
        revoked: Arc<RevocationCache>,
    ) -> Result<Self> {
        Ok(Self {
            listener: Listener::new(address)?,
            validator,
            lookup,
            revoked,
            handshake_timeout,
            max_connections,
            active: Arc::new(AtomicU32::new(0)),
        })
    }

    /// The bound address, useful when configured to listen on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(&self) {
        info!(address = %self.listener.address.as_str(), "starting proxy service");
        while let Some(sock) = self.listener.accept().await {
            if self.active.load(Relaxed) >= self.max_connections {
                warn!(limit = self.max_connections, "reached connection limit");
                continue; // dropping the socket closes it
            }
            let _ = sock.set_nodelay(true);

            let session = Session::new(
                sock,
                self.validator.clone(),
                self.lookup.clone(),
                self.revoked.clone(),
                self.handshake_timeout,
            );
            let active = self.active.clone();
            active.fetch_add(1, Relaxed);
            tokio::spawn(async move {
                if let Err(e) = session.run().await {
                    warn!(%e, "proxy session ended with error");
                }
                active.fetch_sub(1, Relaxed);
            });
        }
    }
}
