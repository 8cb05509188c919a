use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::tokengate::auth::{
    Claims, DatabaseInfo, DatabaseLookup, RevocationCache, TokenValidator,
};
use crate::tokengate::pg::protocol::{
    codec, hash_md5_password, hi, hmac_sha256, sha256, AuthType, MessageBuilder, MessageReader,
    StartupParams, Tag, PROTOCOL_VERSION,
};
use crate::tokengate::pg::ProxyService;
use crate::tokengate::{Error, Result};

pub const TEST_PASSWORD: &str = "p@ss";
pub const TEST_TOKEN: &str = "JWT7";
pub const TEST_TOKEN_ID: &str = "T7";
pub const TEST_DATABASE_ID: i64 = 7;
pub const TEST_DATABASE: &str = "appdb";

pub struct FakeValidator {
    tokens: HashMap<String, Claims>,
}

impl FakeValidator {
    /// Knows TEST_TOKEN out of the box.
    pub fn new() -> Self {
        FakeValidator {
            tokens: HashMap::new(),
        }
        .with_token(TEST_TOKEN, TEST_DATABASE_ID, TEST_TOKEN_ID)
    }

    pub fn with_token(mut self, token: &str, database_id: i64, token_id: &str) -> Self {
        self.tokens.insert(
            token.to_string(),
            Claims {
                database_id,
                token_id: token_id.to_string(),
                exp: chrono::Utc::now().timestamp() + 3600,
            },
        );
        self
    }
}

impl TokenValidator for FakeValidator {
    fn validate(&self, token: &str) -> Result<Claims> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::auth_error("Invalid JWT token"))
    }
}

pub struct FakeLookup {
    databases: HashMap<i64, DatabaseInfo>,
}

impl FakeLookup {
    pub fn empty() -> Self {
        FakeLookup {
            databases: HashMap::new(),
        }
    }

    pub fn with_database(mut self, db: DatabaseInfo) -> Self {
        self.databases.insert(db.id, db);
        self
    }
}

impl DatabaseLookup for FakeLookup {
    fn lookup(&self, id: i64) -> Option<DatabaseInfo> {
        self.databases.get(&id).cloned()
    }
}

pub fn test_database(port: u16, mapped_port: u16) -> DatabaseInfo {
    DatabaseInfo {
        id: TEST_DATABASE_ID,
        name: TEST_DATABASE.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        mapped_port,
        password: TEST_PASSWORD.to_string(),
    }
}

/// Bind the proxy on an ephemeral loopback port and run it in the background.
pub async fn spawn_proxy(
    validator: FakeValidator,
    lookup: FakeLookup,
    revoked: Arc<RevocationCache>,
) -> SocketAddr {
    let service = ProxyService::new(
        "127.0.0.1:0".to_string(),
        16,
        Duration::from_secs(15),
        Arc::new(validator),
        Arc::new(lookup),
        revoked,
    )
    .expect("could not create proxy service");
    let addr = service.local_addr().expect("no local addr");
    tokio::spawn(async move { service.run().await });
    addr
}

/// Returns a loopback port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
    // dropping the listener closes it
}

#[derive(Clone, Copy, Debug)]
pub enum BackendMode {
    Cleartext,
    Md5,
    Scram,
    /// reject the startup with an ErrorResponse before any auth request
    ImmediateError,
}

pub const BACKEND_ERROR_CODE: &str = "28P01";
pub const BACKEND_ERROR_MESSAGE: &str = "password authentication failed for user \"postgres\"";

/// A scripted stand-in for a real Postgres backend: accepts one connection,
/// performs the requested authentication exchange, then answers Query
/// messages with EmptyQueryResponse so relay mode can be exercised.
/// Resolves to the StartupParams the backend received.
pub async fn spawn_mock_backend(mode: BackendMode) -> (u16, JoinHandle<StartupParams>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        serve_backend(&mut sock, mode).await.unwrap()
    });
    (port, handle)
}

async fn serve_backend(sock: &mut TcpStream, mode: BackendMode) -> Result<StartupParams> {
    // the startup message has no tag byte
    let mut frame = [0u8; 4];
    sock.read_exact(&mut frame).await?;
    let len = u32::from_be_bytes(frame);
    let mut body = vec![0u8; (len - 4) as usize];
    sock.read_exact(&mut body).await?;
    let version = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    assert_eq!(version, PROTOCOL_VERSION);
    let params = StartupParams::parse(&body[4..])?;

    match mode {
        BackendMode::ImmediateError => {
            let mut mb = MessageBuilder::new(Tag::ERROR_RESPONSE);
            mb.write_byte(b'S');
            mb.write_str("FATAL");
            mb.write_byte(b'C');
            mb.write_str(BACKEND_ERROR_CODE);
            mb.write_byte(b'M');
            mb.write_str(BACKEND_ERROR_MESSAGE);
            mb.write_byte(0);
            sock.write_all(&mb.finish()).await?;
            return Ok(params);
        }
        BackendMode::Cleartext => {
            send_auth_request(sock, AuthType::ClearText, &[]).await?;
            let password = read_password_message(sock).await?;
            assert_eq!(password, TEST_PASSWORD);
        }
        BackendMode::Md5 => {
            let salt = [0x01, 0x02, 0x03, 0x04];
            send_auth_request(sock, AuthType::MD5, &salt).await?;
            let digest = read_password_message(sock).await?;
            assert_eq!(digest, hash_md5_password("postgres", TEST_PASSWORD, &salt));
        }
        BackendMode::Scram => {
            scram_server(sock).await?;
        }
    }

    // AuthenticationOk, some ParameterStatus, BackendKeyData, ReadyForQuery
    let mut mb = MessageBuilder::new(Tag::AUTHENTICATION);
    mb.write_i32(AuthType::Ok.as_i32());
    mb.add_new(Tag::PARAMETER_STATUS);
    mb.write_str("server_encoding");
    mb.write_str("UTF8");
    mb.add_new(Tag::PARAMETER_STATUS);
    mb.write_str("TimeZone");
    mb.write_str("UTC");
    mb.add_new(Tag::BACKEND_KEY_DATA);
    mb.write_i32(42);
    mb.write_i32(12345);
    mb.add_new(Tag::READY_FOR_QUERY);
    mb.write_byte(b'I');
    sock.write_all(&mb.finish()).await?;

    // relay phase: answer Query messages, stop when the peer hangs up
    loop {
        match codec::read_message(sock).await {
            Ok((Tag::QUERY, _)) => {
                let mut mb = MessageBuilder::new(Tag::EMPTY_QUERY);
                mb.add_new(Tag::READY_FOR_QUERY);
                mb.write_byte(b'I');
                sock.write_all(&mb.finish()).await?;
            }
            Ok((Tag::TERMINATE, _)) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    Ok(params)
}

async fn send_auth_request(sock: &mut TcpStream, auth_type: AuthType, data: &[u8]) -> Result<()> {
    let mut mb = MessageBuilder::new(Tag::AUTHENTICATION);
    mb.write_i32(auth_type.as_i32());
    mb.write_bytes(data);
    sock.write_all(&mb.finish()).await?;
    Ok(())
}

async fn read_password_message(sock: &mut TcpStream) -> Result<String> {
    let (tag, payload) = codec::read_message(sock).await?;
    assert_eq!(tag, Tag::PASSWORD_MESSAGE);
    let mut r = MessageReader::new(&payload);
    Ok(r.read_str()?.to_string())
}

/// The server side of SCRAM-SHA-256, enough of it to verify our client:
/// salt "saltsalt", 4096 iterations, password TEST_PASSWORD.
async fn scram_server(sock: &mut TcpStream) -> Result<()> {
    let mut mb = MessageBuilder::new(Tag::AUTHENTICATION);
    mb.write_i32(AuthType::SASL.as_i32());
    mb.write_str("SCRAM-SHA-256");
    mb.write_byte(0);
    sock.write_all(&mb.finish()).await?;

    // SASLInitialResponse: mechanism, then the length-prefixed client-first message
    let (tag, payload) = codec::read_message(sock).await?;
    assert_eq!(tag, Tag::PASSWORD_MESSAGE);
    let mut r = MessageReader::new(&payload);
    assert_eq!(r.read_str()?, "SCRAM-SHA-256");
    let n = r.read_i32() as usize;
    let client_first = std::str::from_utf8(r.read_bytes(n)?)?.to_string();
    let client_first_bare = client_first
        .strip_prefix("n,,")
        .expect("client-first missing gs2 header")
        .to_string();
    let client_nonce = client_first_bare
        .rsplit_once(",r=")
        .expect("client-first missing nonce")
        .1
        .to_string();

    let salt = b"saltsalt";
    let iterations = 4096u32;
    let server_nonce = format!("{}3rfcNHYJY1ZVvWVs7j", client_nonce);
    let server_first = format!(
        "r={},s={},i={}",
        server_nonce,
        base64::encode(salt),
        iterations
    );
    send_auth_request(sock, AuthType::SASLContinue, server_first.as_bytes()).await?;

    // client-final-message, sent bare
    let (tag, payload) = codec::read_message(sock).await?;
    assert_eq!(tag, Tag::PASSWORD_MESSAGE);
    let client_final = std::str::from_utf8(&payload)?.to_string();
    let (without_proof, proof_b64) = client_final
        .rsplit_once(",p=")
        .expect("client-final missing proof");
    assert!(without_proof.contains(&server_nonce));

    let salted = hi(TEST_PASSWORD.as_bytes(), salt, iterations);
    let client_key = hmac_sha256(&salted, b"Client Key");
    let stored_key = sha256(&client_key);
    let auth_message = format!("{},{},{}", client_first_bare, server_first, without_proof);
    let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
    let proof = base64::decode(proof_b64).expect("proof is not base64");
    let recovered_key: Vec<u8> = proof
        .iter()
        .zip(client_signature.iter())
        .map(|(p, s)| p ^ s)
        .collect();
    assert_eq!(
        sha256(&recovered_key)[..],
        stored_key[..],
        "client proof does not verify"
    );

    let server_key = hmac_sha256(&salted, b"Server Key");
    let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());
    let server_final = format!("v={}", base64::encode(&server_signature));
    send_auth_request(sock, AuthType::SASLFinal, server_final.as_bytes()).await?;
    Ok(())
}

// ---- client-side helpers for driving the proxy over a raw socket ----

pub async fn client_startup(sock: &mut TcpStream, user: &str, database: &str) -> Result<()> {
    let mut params = StartupParams::new();
    params.add("user", user);
    params.add("database", database);
    params.add("application_name", "tokengate_test");
    let mut mb = MessageBuilder::new(Tag::UNTAGGED);
    mb.write_i32(PROTOCOL_VERSION);
    mb.write_params(&params);
    mb.write_byte(0);
    sock.write_all(&mb.finish()).await?;
    Ok(())
}

pub async fn client_password(sock: &mut TcpStream, token: &str) -> Result<()> {
    let mut mb = MessageBuilder::new(Tag::PASSWORD_MESSAGE);
    mb.write_str(token);
    sock.write_all(&mb.finish()).await?;
    Ok(())
}

pub async fn expect_auth_request(sock: &mut TcpStream, expected: AuthType) {
    let (tag, payload) = codec::read_message(sock).await.expect("read auth request");
    assert_eq!(tag, Tag::AUTHENTICATION);
    let mut r = MessageReader::new(&payload);
    assert_eq!(AuthType::from_i32(r.read_i32()), Some(expected));
}

/// Read messages until ReadyForQuery (inclusive), returning the whole trace.
pub async fn read_until_ready(sock: &mut TcpStream) -> Vec<(Tag, Bytes)> {
    let mut msgs = Vec::new();
    loop {
        let (tag, payload) = codec::read_message(sock).await.expect("read message");
        let done = tag == Tag::READY_FOR_QUERY;
        msgs.push((tag, payload));
        if done {
            return msgs;
        }
    }
}

pub fn parse_error_fields(payload: &[u8]) -> HashMap<char, String> {
    let mut fields = HashMap::new();
    let mut r = MessageReader::new(payload);
    loop {
        let field = r.read_byte();
        if field == 0 {
            break;
        }
        let value = r.read_str().expect("error field value");
        fields.insert(field as char, value.to_string());
    }
    fields
}

/// Expect a FATAL ErrorResponse with the given SQLSTATE.
pub async fn expect_fatal(sock: &mut TcpStream, sqlstate: &str) -> HashMap<char, String> {
    let (tag, payload) = codec::read_message(sock).await.expect("read error response");
    assert_eq!(tag, Tag::ERROR_RESPONSE);
    let fields = parse_error_fields(&payload);
    assert_eq!(fields.get(&'S').map(String::as_str), Some("FATAL"));
    assert_eq!(fields.get(&'C').map(String::as_str), Some(sqlstate));
    fields
}
