//! Runner keypairs, recipient keys and the keyring used to open envelopes

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{EnvelopeError, Result};

/// Derives the key id of a public key
///
/// First 16 bytes of SHA-256 over the SubjectPublicKeyInfo DER, hex encoded.
pub fn key_id_for(public: &RsaPublicKey) -> Result<String> {
    let der = public
        .to_public_key_der()
        .map_err(|e| EnvelopeError::Key(e.to_string()))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(hex::encode(&digest[..16]))
}

/// Public key an envelope is sealed for
#[derive(Debug, Clone)]
pub struct RecipientKey {
    pub key: RsaPublicKey,
    pub key_id: String,
}

impl RecipientKey {
    /// Parses a PEM (SPKI) public key as published by a runner
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem.trim())
            .map_err(|e| EnvelopeError::Key(e.to_string()))?;
        let key_id = key_id_for(&key)?;
        Ok(Self { key, key_id })
    }

    pub fn to_pem(&self) -> Result<String> {
        self.key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| EnvelopeError::Key(e.to_string()))
    }
}

/// A runner's sealing keypair
pub struct RunnerKeypair {
    private: RsaPrivateKey,
    key_id: String,
}

impl RunnerKeypair {
    /// Generates a fresh keypair
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| EnvelopeError::Key(e.to_string()))?;
        Self::from_private(private)
    }

    /// Parses a PKCS#8 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem.trim())
            .map_err(|e| EnvelopeError::Key(e.to_string()))?;
        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self> {
        let key_id = key_id_for(&private.to_public_key())?;
        Ok(Self { private, key_id })
    }

    /// Loads the keypair at `path`, generating and persisting one if absent
    pub fn load_or_generate(path: &Path, bits: usize) -> Result<Self> {
        if path.exists() {
            let pem = std::fs::read_to_string(path)?;
            let keypair = Self::from_pem(&pem)?;
            info!("Loaded runner key {} from {}", keypair.key_id, path.display());
            return Ok(keypair);
        }

        let keypair = Self::generate(bits)?;
        keypair.write_pem(path)?;
        info!(
            "Generated runner key {} at {}",
            keypair.key_id,
            path.display()
        );
        Ok(keypair)
    }

    fn write_pem(&self, path: &Path) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pem = self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| EnvelopeError::Key(e.to_string()))?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(pem.as_bytes())?;
        Ok(())
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The public half, ready to be published or sealed against
    pub fn recipient(&self) -> Result<RecipientKey> {
        Ok(RecipientKey {
            key: self.private.to_public_key(),
            key_id: self.key_id.clone(),
        })
    }

    pub fn public_key_pem(&self) -> Result<String> {
        self.recipient()?.to_pem()
    }
}

impl std::fmt::Debug for RunnerKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerKeypair")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Private keys available to a runner, indexed by key id
#[derive(Debug, Default)]
pub struct Keyring {
    keys: HashMap<String, RsaPrivateKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(keypair: RunnerKeypair) -> Self {
        let mut keyring = Self::new();
        keyring.insert(keypair);
        keyring
    }

    pub fn insert(&mut self, keypair: RunnerKeypair) {
        self.keys.insert(keypair.key_id, keypair.private);
    }

    pub(crate) fn get(&self, key_id: &str) -> Option<&RsaPrivateKey> {
        self.keys.get(key_id)
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
