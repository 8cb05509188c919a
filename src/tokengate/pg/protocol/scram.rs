use crypto::digest::Digest;
use crypto::hmac::Hmac;
use crypto::mac::Mac;
use crypto::pbkdf2::pbkdf2;
use crypto::sha2::Sha256;
use rand::RngCore;

use crate::tokengate::{Error, Result};

const GS2_HEADER: &str = "n,,";
const NONCE_LEN: usize = 24;
/// RFC 7677 names 4096 as the minimum acceptable iteration count.
pub const MIN_ITERATIONS: u32 = 4096;

/// The client side of a SCRAM-SHA-256 exchange (RFC 5802).
///
/// Drives no I/O itself: the caller sends client_first_message, feeds the
/// server-first message to handle_server_first, sends the returned
/// client-final message, and checks the server-final message with
/// verify_server_final.
pub struct ScramClient {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    // both derived by handle_server_first
    auth_message: String,
    server_signature: [u8; 32],
}

impl ScramClient {
    pub fn new(user: &str, password: &str) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::with_nonce(
            user,
            password,
            &base64::encode_config(&nonce, base64::URL_SAFE_NO_PAD),
        )
    }

    /// Like new, but with a caller-chosen nonce. The nonce must consist of
    /// printable ASCII characters excluding ','.
    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        ScramClient {
            password: saslprep(password),
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={}", saslprep(user), nonce),
            auth_message: String::new(),
            server_signature: [0u8; 32],
        }
    }

    pub fn client_first_message(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare)
    }

    /// Process the server-first message and produce the client-final message.
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<String> {
        let (server_nonce, salt_b64, iterations) = parse_server_first(server_first)?;
        if !server_nonce.starts_with(self.client_nonce.as_str())
            || server_nonce.len() <= self.client_nonce.len()
        {
            return Err(Error::auth_error(
                "SCRAM server nonce does not extend the client nonce",
            ));
        }
        if iterations < MIN_ITERATIONS {
            return Err(Error::auth_error(format!(
                "SCRAM iteration count {} below minimum {}",
                iterations, MIN_ITERATIONS
            )));
        }
        let salt = base64::decode(salt_b64)
            .map_err(|e| Error::auth_error(format!("SCRAM salt is not valid base64: {}", e)))?;

        let salted_password = hi(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);
        let server_key = hmac_sha256(&salted_password, b"Server Key");

        let client_final_without_proof =
            format!("c={},r={}", base64::encode(GS2_HEADER), server_nonce);
        self.auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, self.auth_message.as_bytes());
        let mut client_proof = client_key;
        for (p, s) in client_proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }
        self.server_signature = hmac_sha256(&server_key, self.auth_message.as_bytes());

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            base64::encode(&client_proof)
        ))
    }

    /// Check the server-final message against the expected ServerSignature.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        for attr in server_final.split(',') {
            if let Some(e) = attr.strip_prefix("e=") {
                return Err(Error::auth_error(format!("SCRAM server error: {}", e)));
            }
            if let Some(v) = attr.strip_prefix("v=") {
                let signature = base64::decode(v).map_err(|e| {
                    Error::auth_error(format!("SCRAM server signature is not valid base64: {}", e))
                })?;
                return if signature == self.server_signature {
                    Ok(())
                } else {
                    Err(Error::auth_error("SCRAM server signature mismatch"))
                };
            }
        }
        Err(Error::auth_error(
            "SCRAM server final message carries no verifier",
        ))
    }
}

/// Parse `r=<nonce>,s=<salt>,i=<iterations>` from a server-first message.
fn parse_server_first(msg: &str) -> Result<(&str, &str, u32)> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;
    for attr in msg.split(',') {
        if let Some(v) = attr.strip_prefix("r=") {
            nonce = Some(v);
        } else if let Some(v) = attr.strip_prefix("s=") {
            salt = Some(v);
        } else if let Some(v) = attr.strip_prefix("i=") {
            iterations = Some(v.parse::<u32>().map_err(|_| {
                Error::auth_error(format!("SCRAM iteration count {} is not a number", v))
            })?);
        }
    }
    match (nonce, salt, iterations) {
        (Some(r), Some(s), Some(i)) => Ok((r, s, i)),
        _ => Err(Error::auth_error(
            "SCRAM server first message is missing r=, s= or i=",
        )),
    }
}

/// Hi() from RFC 5802: PBKDF2-HMAC-SHA256 with dkLen = 32.
pub fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac = Hmac::new(Sha256::new(), password);
    let mut output = [0u8; 32];
    pbkdf2(&mut mac, salt, iterations, &mut output);
    output
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::new(Sha256::new(), key);
    mac.input(data);
    let mut output = [0u8; 32];
    mac.raw_result(&mut output);
    output
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.input(data);
    let mut output = [0u8; 32];
    hasher.result(&mut output);
    output
}

/// Passwords are prepared with SASLprep; an unnormalizable password is used
/// as-is, which matches libpq.
fn saslprep(s: &str) -> String {
    match stringprep::saslprep(s) {
        Ok(prepared) => prepared.into_owned(),
        Err(_) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The SCRAM-SHA-256 example exchange from RFC 7677 §3.
    const RFC_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const RFC_SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const RFC_CLIENT_FINAL: &str =
        "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const RFC_SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn test_rfc7677_exchange() {
        let mut scram = ScramClient::with_nonce("user", "pencil", RFC_NONCE);
        assert_eq!(
            scram.client_first_message(),
            "n,,n=user,r=rOprNGfwEbeRWgbNEkqO"
        );
        let client_final = scram.handle_server_first(RFC_SERVER_FIRST).unwrap();
        assert_eq!(client_final, RFC_CLIENT_FINAL);
        scram.verify_server_final(RFC_SERVER_FINAL).unwrap();
    }

    #[test]
    fn test_tampered_server_signature_rejected() {
        let mut scram = ScramClient::with_nonce("user", "pencil", RFC_NONCE);
        scram.handle_server_first(RFC_SERVER_FIRST).unwrap();
        let err = scram
            .verify_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .unwrap_err();
        assert!(err.to_string().contains("signature mismatch"));
    }

    #[test]
    fn test_server_error_attribute_rejected() {
        let mut scram = ScramClient::with_nonce("user", "pencil", RFC_NONCE);
        scram.handle_server_first(RFC_SERVER_FIRST).unwrap();
        assert!(scram.verify_server_final("e=other-error").is_err());
    }

    #[test]
    fn test_server_nonce_must_extend_client_nonce() {
        let mut scram = ScramClient::with_nonce("user", "pencil", RFC_NONCE);
        // A server nonce that doesn't start with the client nonce
        assert!(scram
            .handle_server_first("r=somethingelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .is_err());
        // A server nonce equal to the client nonce adds no server entropy
        let mut scram = ScramClient::with_nonce("user", "pencil", RFC_NONCE);
        assert!(scram
            .handle_server_first(&format!("r={},s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096", RFC_NONCE))
            .is_err());
    }

    #[test]
    fn test_low_iteration_count_rejected() {
        let mut scram = ScramClient::with_nonce("user", "pencil", RFC_NONCE);
        let err = scram
            .handle_server_first(&format!(
                "r={}server,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=1024",
                RFC_NONCE
            ))
            .unwrap_err();
        assert!(err.to_string().contains("iteration count"));
    }

    #[test]
    fn test_missing_attributes_rejected() {
        let mut scram = ScramClient::with_nonce("user", "pencil", RFC_NONCE);
        assert!(scram.handle_server_first("s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096").is_err());
        let mut scram = ScramClient::with_nonce("user", "pencil", RFC_NONCE);
        assert!(scram
            .handle_server_first(&format!("r={}server,i=4096", RFC_NONCE))
            .is_err());
    }

    #[test]
    fn test_generated_nonces_are_unique_and_comma_free() {
        let a = ScramClient::new("postgres", "p@ss");
        let b = ScramClient::new("postgres", "p@ss");
        assert_ne!(a.client_nonce, b.client_nonce);
        assert!(!a.client_nonce.contains(','));
    }
}
