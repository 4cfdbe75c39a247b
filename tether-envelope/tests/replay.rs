//! Replay properties of sealed envelopes
//!
//! An envelope opened against the AAD it was sealed for always yields the
//! same plaintext; the same envelope presented for any other job, kind or
//! runner never opens.

use std::sync::OnceLock;
use tether_envelope::{Aad, EnvelopeError, Keyring, RecipientKey, RunnerKeypair, open, seal_json};
use uuid::Uuid;

struct Runner {
    keyring: Keyring,
    recipient: RecipientKey,
}

fn runner_a() -> &'static Runner {
    static RUNNER: OnceLock<Runner> = OnceLock::new();
    RUNNER.get_or_init(make_runner)
}

fn runner_b() -> &'static Runner {
    static RUNNER: OnceLock<Runner> = OnceLock::new();
    RUNNER.get_or_init(make_runner)
}

fn job(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn make_runner() -> Runner {
    let keypair = RunnerKeypair::generate(2048).unwrap();
    let recipient = keypair.recipient().unwrap();
    Runner {
        keyring: Keyring::single(keypair),
        recipient,
    }
}

#[test]
fn test_replay_against_same_job_is_idempotent() {
    let runner = runner_a();
    let aad = Aad::job("proj", job(1), "custom", "runner-a").unwrap();
    let payload = serde_json::json!({"db_password": "hunter22", "list": [1, 2, 3]});
    let sealed = seal_json(&payload, &runner.recipient, &aad).unwrap();

    let first = open(&sealed, &runner.keyring, &aad, &runner.recipient.key_id).unwrap();
    let second = open(&sealed, &runner.keyring, &aad, &runner.recipient.key_id).unwrap();
    assert_eq!(first, second);
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&first).unwrap(), payload);
}

#[test]
fn test_replay_against_any_other_binding_fails() {
    let runner = runner_a();
    let aad = Aad::job("proj", job(1), "custom", "runner-a").unwrap();
    let sealed = seal_json(&serde_json::json!({"k": "v"}), &runner.recipient, &aad).unwrap();

    let others = [
        Aad::job("proj", job(2), "custom", "runner-a").unwrap(),
        Aad::job("other", job(1), "custom", "runner-a").unwrap(),
        Aad::job("proj", job(1), "ssh", "runner-a").unwrap(),
        Aad::job("proj", job(1), "custom", "runner-b").unwrap(),
        Aad::setup_draft("proj", "job-1", "custom").unwrap(),
    ];

    for other in others {
        let err = open(&sealed, &runner.keyring, &other, &runner.recipient.key_id).unwrap_err();
        assert!(matches!(err, EnvelopeError::Open), "{other}: {err:?}");
    }
}

#[test]
fn test_other_runner_cannot_open() {
    let a = runner_a();
    let b = runner_b();
    let aad = Aad::job("proj", job(1), "custom", "runner-a").unwrap();
    let sealed = seal_json(&serde_json::json!({"k": "v"}), &a.recipient, &aad).unwrap();

    // runner-b does not hold runner-a's key id
    let err = open(&sealed, &b.keyring, &aad, &a.recipient.key_id).unwrap_err();
    assert!(matches!(err, EnvelopeError::UnknownKey(_)));

    // and claiming its own key id does not help either
    let err = open(&sealed, &b.keyring, &aad, &b.recipient.key_id).unwrap_err();
    assert!(matches!(err, EnvelopeError::KeyIdMismatch));
}

#[test]
fn test_each_seal_is_fresh() {
    let runner = runner_a();
    let aad = Aad::setup_draft("proj", "host-1", "ssh").unwrap();
    let payload = serde_json::json!({"key": "same"});

    let one = seal_json(&payload, &runner.recipient, &aad).unwrap();
    let two = seal_json(&payload, &runner.recipient, &aad).unwrap();
    assert_ne!(one, two);

    for sealed in [one, two] {
        assert!(open(&sealed, &runner.keyring, &aad, &runner.recipient.key_id).is_ok());
    }
}
