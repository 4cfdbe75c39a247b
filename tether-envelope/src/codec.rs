//! Sealing and opening envelopes

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rsa::Oaep;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::aad::Aad;
use crate::error::{EnvelopeError, Result};
use crate::keys::{Keyring, RecipientKey};

/// Envelope format version
pub const VERSION: u32 = 1;

/// Algorithm identifier carried in every envelope
pub const ALGORITHM: &str = "RSA-OAEP-256+A256GCM";

/// Largest plaintext accepted for sealing
pub const MAX_PLAINTEXT_BYTES: usize = 64 * 1024;

const AES_KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Upper bound on the encoded envelope, checked before decoding
const MAX_ENCODED_LEN: usize = 4 * (MAX_PLAINTEXT_BYTES + 2048);

/// Decoded envelope fields
///
/// `iv`, `w` (wrapped key) and `ct` (ciphertext with tag) are base64url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub v: u32,
    pub alg: String,
    pub kid: String,
    pub iv: String,
    pub w: String,
    pub ct: String,
}

impl Envelope {
    /// Decodes the outer base64url layer and checks every field is present
    pub fn decode(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim().trim_end_matches('=');
        if encoded.is_empty() {
            return Err(EnvelopeError::Malformed("empty envelope".to_string()));
        }
        if encoded.len() > MAX_ENCODED_LEN {
            return Err(EnvelopeError::Malformed("envelope too long".to_string()));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| EnvelopeError::Malformed("not base64url".to_string()))?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| EnvelopeError::Malformed(format!("bad envelope body: {}", e)))?;

        if envelope.v != VERSION {
            return Err(EnvelopeError::UnsupportedVersion(envelope.v));
        }
        if envelope.kid.is_empty() {
            return Err(EnvelopeError::Malformed("missing key id".to_string()));
        }

        Ok(envelope)
    }

    pub fn encode(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| EnvelopeError::Malformed(format!("failed to encode envelope: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// Seals `plaintext` for `recipient`, bound to `aad`
pub fn seal(plaintext: &[u8], recipient: &RecipientKey, aad: &Aad) -> Result<String> {
    if plaintext.len() > MAX_PLAINTEXT_BYTES {
        return Err(EnvelopeError::TooLarge {
            len: plaintext.len(),
            max: MAX_PLAINTEXT_BYTES,
        });
    }

    let mut rng = rand::rngs::OsRng;
    let mut key = [0u8; AES_KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut key);
    rng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EnvelopeError::Seal)?;
    let ct = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| EnvelopeError::Seal)?;

    let wrapped = recipient
        .key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), &key)
        .map_err(|_| EnvelopeError::Seal)?;
    key.fill(0);

    debug!(
        "Sealed {} byte payload for key {}",
        plaintext.len(),
        recipient.key_id
    );

    Envelope {
        v: VERSION,
        alg: ALGORITHM.to_string(),
        kid: recipient.key_id.clone(),
        iv: URL_SAFE_NO_PAD.encode(iv),
        w: URL_SAFE_NO_PAD.encode(wrapped),
        ct: URL_SAFE_NO_PAD.encode(ct),
    }
    .encode()
}

/// Seals a JSON document
pub fn seal_json(value: &serde_json::Value, recipient: &RecipientKey, aad: &Aad) -> Result<String> {
    let plaintext = serde_json::to_vec(value).map_err(|_| EnvelopeError::InvalidPayload)?;
    seal(&plaintext, recipient, aad)
}

/// Opens an envelope
///
/// `expected_key_id` is the key id recorded on the job, and `aad` is rebuilt
/// by the caller from the job's own fields. Structural checks run before any
/// cryptographic operation; every cryptographic failure yields
/// [`EnvelopeError::Open`].
pub fn open(encoded: &str, keyring: &Keyring, aad: &Aad, expected_key_id: &str) -> Result<Vec<u8>> {
    let envelope = Envelope::decode(encoded)?;

    if envelope.alg != ALGORITHM {
        return Err(EnvelopeError::AlgorithmMismatch);
    }
    if envelope.kid != expected_key_id {
        return Err(EnvelopeError::KeyIdMismatch);
    }

    let iv = decode_field(&envelope.iv, "iv")?;
    let wrapped = decode_field(&envelope.w, "w")?;
    let ct = decode_field(&envelope.ct, "ct")?;

    if iv.len() != IV_LEN {
        return Err(EnvelopeError::Malformed("bad iv length".to_string()));
    }
    if ct.len() < TAG_LEN {
        return Err(EnvelopeError::Malformed("ciphertext too short".to_string()));
    }

    let private = keyring
        .get(&envelope.kid)
        .ok_or_else(|| EnvelopeError::UnknownKey(envelope.kid.clone()))?;

    if wrapped.len() != private.size() {
        return Err(EnvelopeError::Malformed("bad wrapped key length".to_string()));
    }

    let mut key = private
        .decrypt(Oaep::new::<Sha256>(), &wrapped)
        .map_err(|_| EnvelopeError::Open)?;
    if key.len() != AES_KEY_LEN {
        key.fill(0);
        return Err(EnvelopeError::Open);
    }

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EnvelopeError::Open);
    key.fill(0);

    cipher?
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &ct,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| EnvelopeError::Open)
}

/// Opens an envelope and parses the plaintext as JSON
pub fn open_json(
    encoded: &str,
    keyring: &Keyring,
    aad: &Aad,
    expected_key_id: &str,
) -> Result<serde_json::Value> {
    let plaintext = open(encoded, keyring, aad, expected_key_id)?;
    serde_json::from_slice(&plaintext).map_err(|_| EnvelopeError::InvalidPayload)
}

fn decode_field(value: &str, name: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| EnvelopeError::Malformed(format!("field {} is not base64url", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RunnerKeypair;
    use std::sync::OnceLock;
    use uuid::Uuid;

    struct Fixture {
        keyring: Keyring,
        recipient: RecipientKey,
    }

    fn fixture() -> &'static Fixture {
        static FIXTURE: OnceLock<Fixture> = OnceLock::new();
        FIXTURE.get_or_init(|| {
            let keypair = RunnerKeypair::generate(2048).unwrap();
            let recipient = keypair.recipient().unwrap();
            Fixture {
                keyring: Keyring::single(keypair),
                recipient,
            }
        })
    }

    fn aad() -> Aad {
        Aad::job("proj", Uuid::from_u128(1), "custom", "runner-a").unwrap()
    }

    #[test]
    fn test_seal_then_open() {
        let fx = fixture();
        let payload = serde_json::json!({"token": "abc123", "nested": {"n": 1}});
        let sealed = seal_json(&payload, &fx.recipient, &aad()).unwrap();

        let opened = open_json(&sealed, &fx.keyring, &aad(), &fx.recipient.key_id).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_wrong_aad_fails_generically() {
        let fx = fixture();
        let sealed = seal(b"{}", &fx.recipient, &aad()).unwrap();
        let other = Aad::job("proj", Uuid::from_u128(2), "custom", "runner-a").unwrap();

        let err = open(&sealed, &fx.keyring, &other, &fx.recipient.key_id).unwrap_err();
        assert!(matches!(err, EnvelopeError::Open));
        assert_eq!(err.to_string(), "sealed input could not be opened");
    }

    #[test]
    fn test_envelope_carries_algorithm_and_key_id() {
        let fx = fixture();
        let sealed = seal(b"{}", &fx.recipient, &aad()).unwrap();
        let envelope = Envelope::decode(&sealed).unwrap();
        assert_eq!(envelope.v, VERSION);
        assert_eq!(envelope.alg, ALGORITHM);
        assert_eq!(envelope.kid, fx.recipient.key_id);
    }

    #[test]
    fn test_key_id_mismatch_rejected_before_crypto() {
        let fx = fixture();
        let sealed = seal(b"{}", &fx.recipient, &aad()).unwrap();
        let err = open(&sealed, &fx.keyring, &aad(), "someone-else").unwrap_err();
        assert!(matches!(err, EnvelopeError::KeyIdMismatch));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let fx = fixture();
        let sealed = seal(b"{}", &fx.recipient, &aad()).unwrap();
        let empty = Keyring::new();
        let err = open(&sealed, &empty, &aad(), &fx.recipient.key_id).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownKey(_)));
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let fx = fixture();
        let sealed = seal(b"{}", &fx.recipient, &aad()).unwrap();
        let mut envelope = Envelope::decode(&sealed).unwrap();
        envelope.alg = "RSA1_5+A128CBC".to_string();
        let tampered = envelope.encode().unwrap();

        let err = open(&tampered, &fx.keyring, &aad(), &fx.recipient.key_id).unwrap_err();
        assert!(matches!(err, EnvelopeError::AlgorithmMismatch));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let fx = fixture();
        let kid = &fx.recipient.key_id;

        for bad in ["", "!!!not-base64!!!", "e30"] {
            let err = open(bad, &fx.keyring, &aad(), kid).unwrap_err();
            assert!(matches!(err, EnvelopeError::Malformed(_)), "{bad}: {err:?}");
        }

        let missing_ct = URL_SAFE_NO_PAD.encode(
            serde_json::json!({"v": 1, "alg": ALGORITHM, "kid": kid, "iv": "AAAA", "w": "AAAA"})
                .to_string(),
        );
        assert!(matches!(
            open(&missing_ct, &fx.keyring, &aad(), kid),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let fx = fixture();
        let sealed = seal(b"{}", &fx.recipient, &aad()).unwrap();
        let mut envelope = Envelope::decode(&sealed).unwrap();
        envelope.v = 2;
        let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&envelope).unwrap());
        assert!(matches!(
            open(&encoded, &fx.keyring, &aad(), &fx.recipient.key_id),
            Err(EnvelopeError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let fx = fixture();
        let sealed = seal(b"{\"a\":1}", &fx.recipient, &aad()).unwrap();
        let mut envelope = Envelope::decode(&sealed).unwrap();
        let mut ct = URL_SAFE_NO_PAD.decode(&envelope.ct).unwrap();
        ct[0] ^= 0x01;
        envelope.ct = URL_SAFE_NO_PAD.encode(ct);

        let err = open(
            &envelope.encode().unwrap(),
            &fx.keyring,
            &aad(),
            &fx.recipient.key_id,
        )
        .unwrap_err();
        assert!(matches!(err, EnvelopeError::Open));
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let fx = fixture();
        let big = vec![b'a'; MAX_PLAINTEXT_BYTES + 1];
        assert!(matches!(
            seal(&big, &fx.recipient, &aad()),
            Err(EnvelopeError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_non_json_plaintext_reported() {
        let fx = fixture();
        let sealed = seal(b"not json", &fx.recipient, &aad()).unwrap();
        assert!(matches!(
            open_json(&sealed, &fx.keyring, &aad(), &fx.recipient.key_id),
            Err(EnvelopeError::InvalidPayload)
        ));
    }
}
