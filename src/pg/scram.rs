//! SCRAM-SHA-256 client side of SASL authentication (RFC 5802, RFC 7677).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Client state across the three SCRAM exchanges.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    /// Set once the server-first message has been processed.
    verifier: Option<Verifier>,
}

struct Verifier {
    salted_password: [u8; 32],
    auth_message: String,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        // 18 random bytes encode to 24 base64 characters
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(username, password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce,
            verifier: None,
        }
    }

    /// `n,,n=<user>,r=<client-nonce>`: no channel binding, no authzid.
    pub fn client_first_message(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    fn client_first_bare(&self) -> String {
        // PostgreSQL ignores the SCRAM user name and uses the startup user.
        format!("n={},r={}", self.username.replace('=', "=3D").replace(',', "=2C"), self.client_nonce)
    }

    /// Consume `r=<nonce>,s=<salt>,i=<iterations>` and produce the
    /// client-final message carrying the proof.
    pub fn process_server_first(&mut self, server_msg: &[u8]) -> Result<Vec<u8>, ScramError> {
        let server_first =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(value).map_err(|_| ScramError::InvalidSalt)?);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| ScramError::InvalidIterations)?,
                );
            }
        }

        let combined_nonce = nonce.ok_or(ScramError::MissingNonce)?;
        let salt = salt.ok_or(ScramError::MissingSalt)?;
        let iterations = iterations
            .filter(|&i| i > 0)
            .ok_or(ScramError::InvalidIterations)?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceVerificationFailed);
        }

        let salted_password = hi(&self.password, &salt, iterations)?;
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = sha256(&client_key);

        let client_final_without_proof = format!("c=biws,r={}", combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let client_proof = xor_bytes(&client_key, &client_signature);

        self.verifier = Some(Verifier {
            salted_password,
            auth_message,
        });

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        )
        .into_bytes())
    }

    /// Check the server signature in `v=<verifier>`.
    pub fn verify_server_final(&self, server_msg: &[u8]) -> Result<(), ScramError> {
        let server_final =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::Rejected(err.to_string()));
        }
        let signature = server_final
            .strip_prefix("v=")
            .and_then(|v| BASE64.decode(v).ok())
            .ok_or(ScramError::InvalidServerSignature)?;

        let verifier = self.verifier.as_ref().ok_or(ScramError::InvalidState)?;
        let server_key = hmac_sha256(&verifier.salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, verifier.auth_message.as_bytes())?;

        if signature != expected {
            return Err(ScramError::ServerSignatureVerificationFailed);
        }
        Ok(())
    }
}

/// SCRAM authentication errors.
#[derive(Debug, Clone)]
pub enum ScramError {
    InvalidServerMessage,
    InvalidSalt,
    InvalidIterations,
    MissingNonce,
    MissingSalt,
    NonceVerificationFailed,
    InvalidServerSignature,
    ServerSignatureVerificationFailed,
    Rejected(String),
    InvalidState,
    Crypto,
}

impl std::fmt::Display for ScramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidServerMessage => write!(f, "Invalid server message"),
            Self::InvalidSalt => write!(f, "Invalid salt encoding"),
            Self::InvalidIterations => write!(f, "Invalid iteration count"),
            Self::MissingNonce => write!(f, "Missing nonce in server message"),
            Self::MissingSalt => write!(f, "Missing salt in server message"),
            Self::NonceVerificationFailed => write!(f, "Server nonce verification failed"),
            Self::InvalidServerSignature => write!(f, "Invalid server signature"),
            Self::ServerSignatureVerificationFailed => {
                write!(f, "Server signature verification failed")
            }
            Self::Rejected(reason) => write!(f, "Server rejected authentication: {}", reason),
            Self::InvalidState => write!(f, "Invalid SCRAM state"),
            Self::Crypto => write!(f, "Key derivation failed"),
        }
    }
}

impl std::error::Error for ScramError {}

// ============================================================================
// Helper Functions
// ============================================================================

/// Hi(): PBKDF2 with HMAC-SHA-256
fn hi(password: &str, salt: &[u8], iterations: u32) -> Result<[u8; 32], ScramError> {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut output)
        .map_err(|_| ScramError::Crypto)?;
    Ok(output)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], ScramError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ScramError::Crypto)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn xor_bytes(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    std::array::from_fn(|i| a[i] ^ b[i])
}
