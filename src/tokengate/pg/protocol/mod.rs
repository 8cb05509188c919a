mod auth_md5;
mod auth_type;
pub mod codec;
pub mod error_codes;
mod errors;
mod message_builder;
mod message_error_builder;
mod message_reader;
mod scram;
mod startup_params;
mod tag;

pub use self::auth_md5::hash_md5_password;
pub use self::auth_type::AuthType;
pub use self::errors::{ErrorFieldTag, ErrorSeverity};
pub use self::message_builder::MessageBuilder;
pub use self::message_error_builder::MessageErrorBuilder;
pub use self::message_reader::MessageReader;
pub use self::scram::{hi, hmac_sha256, sha256, ScramClient};
pub use self::startup_params::StartupParams;
pub use self::tag::{Tag, PROTOCOL_VERSION, SSL_NOT_ALLOWED, SSL_REQUEST};
