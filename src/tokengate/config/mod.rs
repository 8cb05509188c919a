mod config;

pub use config::*;

pub const LISTEN_BACKLOG: u32 = 1024;
