use crate::constants::credentials::{RSA_KEY_BITS, TOKEN_BYTES};
use crate::errors::TunnelError;
use rand::rngs::OsRng;
use rand::RngCore;
use russh::keys::ssh_key::private::{KeypairData, RsaKeypair};
use russh::keys::ssh_key::{rand_core, Algorithm, HashAlg};
use russh::keys::PrivateKey;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Host key algorithm for the per-run server identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKeyKind {
    #[default]
    Ed25519,
    Rsa,
}

impl HostKeyKind {
    pub fn from_env() -> Option<Self> {
        std::env::var("TUNNEL_HOST_KEY")
            .ok()
            .and_then(|raw| raw.parse().ok())
    }
}

impl FromStr for HostKeyKind {
    type Err = TunnelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "ed25519" => Ok(HostKeyKind::Ed25519),
            "rsa" => Ok(HostKeyKind::Rsa),
            other => Err(TunnelError::invalid_config(format!(
                "host key: unsupported value '{}'",
                other
            ))
            .with_hint("Use one of: ed25519, rsa.")),
        }
    }
}

impl fmt::Display for HostKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyKind::Ed25519 => write!(f, "ed25519"),
            HostKeyKind::Rsa => write!(f, "rsa"),
        }
    }
}

/// Everything a client needs to prove, plus the key the server proves itself with.
/// Lives only in memory for one server instance.
#[derive(Clone)]
pub struct Credentials {
    pub host_key: PrivateKey,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn host_key_fingerprint(&self) -> String {
        self.host_key
            .public_key()
            .fingerprint(HashAlg::Sha256)
            .to_string()
    }

    /// Exact match on both halves.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host_key", &self.host_key.algorithm().as_str())
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialIssuer {
    host_key: HostKeyKind,
}

impl CredentialIssuer {
    pub fn new(host_key: HostKeyKind) -> Self {
        Self { host_key }
    }

    pub fn issue(&self) -> Result<Credentials, TunnelError> {
        let host_key = generate_host_key(self.host_key)?;
        let username = random_token(TOKEN_BYTES)?;
        let password = random_token(TOKEN_BYTES)?;
        Ok(Credentials {
            host_key,
            username,
            password,
        })
    }
}

/// Lowercase hex of `bytes` bytes from the OS CSPRNG. Never falls back to a weaker source.
pub fn random_token(bytes: usize) -> Result<String, TunnelError> {
    let mut buf = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|err| TunnelError::setup(format!("secure randomness unavailable: {}", err)))?;
    Ok(hex::encode(buf))
}

fn generate_host_key(kind: HostKeyKind) -> Result<PrivateKey, TunnelError> {
    let mut rng = rand_core::OsRng;
    match kind {
        HostKeyKind::Ed25519 => PrivateKey::random(&mut rng, Algorithm::Ed25519)
            .map_err(|err| TunnelError::setup(format!("failed to generate host key: {}", err))),
        HostKeyKind::Rsa => {
            let keypair = RsaKeypair::random(&mut rng, RSA_KEY_BITS).map_err(|err| {
                TunnelError::setup(format!("failed to generate RSA host key: {}", err))
            })?;
            PrivateKey::new(KeypairData::Rsa(keypair), "")
                .map_err(|err| TunnelError::setup(format!("failed to wrap RSA host key: {}", err)))
        }
    }
}
