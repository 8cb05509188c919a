pub mod tokengate;
#[cfg(test)]
mod tests;

pub use crate::tokengate::*;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::tokengate::auth::{JwtValidator, RevocationCache, StaticDatabaseLookup};
use crate::tokengate::config::{load_config, Settings};
use crate::tokengate::pg::ProxyService;

pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than max_level will be written to stdout
        .with_max_level(max_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

/// Load the configuration settings from tokengate.yaml and the environment.
/// See tokengate::config::load_config for more info.
pub fn init_settings() -> Result<&'static Settings> {
    load_config("tokengate.yaml")
}

pub fn init_runtime(conf: &'static Settings) -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(conf.num_workers as usize)
        .enable_all()
        .build()
}

/// Run the proxy until the listener shuts down. In-flight sessions run to
/// natural completion, they are not interrupted.
pub fn run_proxy(conf: &'static Settings, tokio: &Runtime) {
    tokio.block_on(async move {
        let validator = Arc::new(JwtValidator::new(conf.jwt_secret.as_bytes()));
        let lookup = Arc::new(StaticDatabaseLookup::from_config(&conf.databases));
        let revoked = Arc::new(RevocationCache::with_retention(chrono::Duration::hours(
            conf.revoked_retention_hours as i64,
        )));
        tokio::spawn(revoked.clone().cleanup_task());

        let service = ProxyService::new(
            conf.listen_address(),
            conf.max_connections,
            Duration::from_secs(conf.handshake_timeout_seconds as u64),
            validator,
            lookup,
            revoked,
        )
        .expect("could not create proxy service");
        service.run().await
    });
}
