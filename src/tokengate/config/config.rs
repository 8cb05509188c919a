use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::tokengate::{Error, Result};

#[derive(Deserialize)]
pub struct Settings {
    /// config_path is the path of the loaded config file, empty if defaults were used
    #[serde(skip_deserializing)]
    pub config_path: PathBuf,
    /// host to listen on, defaults to 0.0.0.0. Overridden by PROXY_HOST.
    #[serde(default = "default_host")]
    pub host: String,
    /// port to listen on for PostgreSQL connections: default 6432. Overridden by PROXY_PORT.
    #[serde(default = "default_port")]
    pub port: u16,
    /// jwt_secret is consumed only by the HS256 token validator. Overridden by JWT_SECRET.
    #[serde(default)]
    pub jwt_secret: String,
    /// num_workers is the number of tokio worker threads, defaults to the CPU count
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    /// max_connections to allow before rejecting new connections. Important to introduce back-pressure. Default 10,000.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// handshake_timeout_seconds bounds the time from accept to ReadyForQuery. Default 15.
    #[serde(default = "default_handshake_timeout_seconds")]
    pub handshake_timeout_seconds: u32,
    /// revoked_retention_hours is how long revocation entries are kept. Default 24.
    #[serde(default = "default_revoked_retention_hours")]
    pub revoked_retention_hours: u32,
    /// databases this proxy can route to, keyed by the id carried in tokens
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
const fn default_port() -> u16 {
    6432
}
fn default_num_workers() -> u32 {
    num_cpus::get() as u32
}
const fn default_max_connections() -> u32 {
    10000
}
const fn default_handshake_timeout_seconds() -> u32 {
    15
}
const fn default_revoked_retention_hours() -> u32 {
    24
}

#[derive(Deserialize, Clone)]
pub struct DatabaseConfig {
    /// id carried in token claims
    pub id: i64,
    /// database name the backend will open
    pub name: String,
    /// host to connect to, defaults to localhost
    #[serde(default = "default_db_host")]
    pub host: String,
    /// port to connect to, defaults to 5432
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// fallback port on loopback tried when host:port is unreachable, 0 disables the fallback
    #[serde(default)]
    pub mapped_port: u16,
    /// password the backend accepts for its superuser
    #[serde(default)]
    pub password: String,
}

fn default_db_host() -> String {
    "localhost".to_string()
}
const fn default_db_port() -> u16 {
    5432
}

impl Settings {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn load(&mut self, path: PathBuf) -> Result<()> {
        self.config_path = path;

        if let Ok(host) = env::var("PROXY_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("PROXY_PORT") {
            self.port = port
                .parse()
                .map_err(|_| Error::new(format!("PROXY_PORT {} is not a port number", port)))?;
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            self.jwt_secret = secret;
        }

        if self.port == 0 {
            return Err(Error::new("listen port cannot be 0"));
        }
        if self.num_workers == 0 {
            self.num_workers = default_num_workers();
        }
        if self.jwt_secret.is_empty() {
            return Err(Error::new("jwt_secret is required (set JWT_SECRET)"));
        }
        for db in &self.databases {
            if db.id <= 0 {
                return Err(Error::new(format!(
                    "database \"{}\" must have a positive id",
                    db.name
                )));
            }
        }
        Ok(())
    }
}

/// Load the configuration from the given yaml file name (searched for in the
/// usual locations, see find_config_file), then apply environment overrides.
/// A missing config file is not an error, everything can come from the
/// environment.
pub fn load_config(config_name: &str) -> Result<&'static Settings> {
    let mut config: Settings;
    let mut path = PathBuf::new();
    match find_config_file(config_name) {
        Ok(found) => {
            info!(config_path = %found.to_string_lossy().into_owned(), "found config file");
            let file = File::open(&found)?;
            config = serde_yaml::from_reader(file)?;
            path = found;
        }
        Err(_) => {
            debug!("no config file found, using defaults and environment");
            config = serde_yaml::from_str("{}")?;
        }
    }
    config.load(path)?;
    Ok(&*Box::leak(Box::new(config)))
}

fn find_config_file(config_name: &str) -> Result<PathBuf> {
    // Use the full path given as the first command line argument
    if let Some(path) = env::args().nth(1) {
        debug!("using config_path passed on command line");
        return Ok(PathBuf::from(path));
    }

    // Check the current directory or any of its parents for config_name
    if let Ok(start) = env::current_dir() {
        let mut dir = start.as_path();
        while !dir.as_os_str().is_empty() {
            debug!("checking for config file in {}", dir.to_string_lossy());
            let fp = Path::join(dir, config_name);
            if fp.exists() {
                return Ok(fp);
            }
            if let Some(parent) = dir.parent() {
                dir = parent;
            } else {
                break;
            }
        }
    }

    // Check ~/.config/tokengate/{config_name}
    // HOME is required to be set on POSIX systems, but if it's not set we'll try ~/
    let home = env::var("HOME").unwrap_or_else(|_| "~/".to_string());
    let mut conf_path = Path::join(Path::new(&home), Path::join(Path::new(".config/tokengate"), config_name));
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    // Check /etc/tokengate/{config_name}
    conf_path = Path::join(Path::new("/etc/tokengate"), config_name);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    Err(Error::new(format!("config file {} not found", config_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: Settings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 6432);
        assert_eq!(config.max_connections, 10000);
        assert_eq!(config.handshake_timeout_seconds, 15);
        assert_eq!(config.revoked_retention_hours, 24);
        assert!(config.databases.is_empty());
    }

    #[test]
    fn test_database_section() {
        let config: Settings = serde_yaml::from_str(
            "databases:\n  - id: 7\n    name: appdb\n    host: db-7.internal\n    mapped_port: 55432\n    password: p@ss\n",
        )
        .unwrap();
        assert_eq!(config.databases.len(), 1);
        let db = &config.databases[0];
        assert_eq!(db.id, 7);
        assert_eq!(db.name, "appdb");
        assert_eq!(db.port, 5432);
        assert_eq!(db.mapped_port, 55432);
    }
}
