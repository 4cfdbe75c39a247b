//! Tether sealed envelopes
//!
//! Hybrid encryption that binds a small JSON secret payload to one job on
//! one runner. The sealing side (CLI or control plane) never holds a private
//! key; only the target runner can open an envelope, and only when it
//! supplies the same additional authenticated data (AAD) the envelope was
//! sealed against.
//!
//! Scheme: a fresh AES-256-GCM key and 96-bit IV encrypt the payload with
//! the AAD; the AES key is wrapped with RSA-OAEP(SHA-256) under the runner's
//! public key; the algorithm id, key id, IV, wrapped key and ciphertext are
//! serialized and base64url-encoded into one opaque string.
//!
//! # Example
//!
//! ```no_run
//! use tether_envelope::{Aad, Keyring, RunnerKeypair, open_json, seal_json};
//!
//! # fn main() -> Result<(), tether_envelope::EnvelopeError> {
//! let keypair = RunnerKeypair::generate(2048)?;
//! let recipient = keypair.recipient()?;
//! let aad = Aad::job("proj", uuid::Uuid::new_v4(), "custom", "runner-1")?;
//!
//! let sealed = seal_json(&serde_json::json!({"token": "s3cr3t"}), &recipient, &aad)?;
//!
//! let keyring = Keyring::single(keypair);
//! let opened = open_json(&sealed, &keyring, &aad, &recipient.key_id)?;
//! # Ok(())
//! # }
//! ```

mod aad;
mod codec;
pub mod error;
mod keys;

pub use aad::Aad;
pub use codec::{
    ALGORITHM, Envelope, MAX_PLAINTEXT_BYTES, VERSION, open, open_json, seal, seal_json,
};
pub use error::{EnvelopeError, Result};
pub use keys::{Keyring, RecipientKey, RunnerKeypair, key_id_for};
