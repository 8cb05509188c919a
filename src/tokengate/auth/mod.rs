mod revocation;

pub use self::revocation::{RevocationCache, RevocationEntry};

use fnv::FnvHashMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::tokengate::config::DatabaseConfig;
use crate::tokengate::{Error, Result};

/// The decoded content of a bearer token. Extra fields in the token are ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// id of the database this token grants access to
    pub database_id: i64,
    /// opaque id of this issued token instance, the unit of revocation
    pub token_id: String,
    /// expiry as unix seconds, enforced during validation
    pub exp: i64,
}

/// Validates the bearer token presented in the password field of the client
/// handshake. Injected into the session so the core can be tested against fakes.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims>;
}

/// The default validator: HS256 JWTs signed with the shared `JWT_SECRET`.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        JwtValidator {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.database_id <= 0 {
            return Err(Error::auth_error("token carries no valid database id"));
        }
        if data.claims.token_id.is_empty() {
            return Err(Error::auth_error("token carries no token id"));
        }
        Ok(data.claims)
    }
}

/// Everything the proxy needs to know about one backend database.
/// Owned by the admin plane, read-only to the proxy.
#[derive(Clone, Debug)]
pub struct DatabaseInfo {
    pub id: i64,
    /// the database name the backend will open
    pub name: String,
    /// internal hostname
    pub host: String,
    pub port: u16,
    /// optional fallback port on loopback, 0 if none
    pub mapped_port: u16,
    /// cleartext password the backend accepts for its superuser
    pub password: String,
}

/// Resolves the database id carried in a token. Must be cheap and
/// non-blocking, it is called on the accept path without any lock held.
pub trait DatabaseLookup: Send + Sync {
    fn lookup(&self, id: i64) -> Option<DatabaseInfo>;
}

/// An immutable in-memory lookup table, built from the configuration.
pub struct StaticDatabaseLookup {
    databases: FnvHashMap<i64, DatabaseInfo>,
}

impl StaticDatabaseLookup {
    pub fn new<I: IntoIterator<Item = DatabaseInfo>>(databases: I) -> Self {
        StaticDatabaseLookup {
            databases: databases.into_iter().map(|db| (db.id, db)).collect(),
        }
    }

    pub fn from_config(databases: &[DatabaseConfig]) -> Self {
        Self::new(databases.iter().map(|db| DatabaseInfo {
            id: db.id,
            name: db.name.clone(),
            host: db.host.clone(),
            port: db.port,
            mapped_port: db.mapped_port,
            password: db.password.clone(),
        }))
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }
}

impl DatabaseLookup for StaticDatabaseLookup {
    fn lookup(&self, id: i64) -> Option<DatabaseInfo> {
        self.databases.get(&id).cloned()
    }
}
