//! NIP-01: basic event structure, id hashing and Schnorr signing.

use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced while building, signing or checking events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("event id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// Event fields chosen by the author; `finalize_event` derives the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// An event with its author and id, but no signature yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl Event {
    /// Values of every tag named `name`, in tag order.
    pub fn tag_values(&self, name: &str) -> Vec<String> {
        crate::tag_parsing::collect_tag_values(&self.tags, name)
    }

    /// First value of the tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        crate::tag_parsing::find_tag_value(&self.tags, name)
    }
}

/// Generate a random valid secp256k1 secret key.
pub fn generate_secret_key() -> [u8; 32] {
    loop {
        let candidate: [u8; 32] = rand::random();
        if SecretKey::from_slice(&candidate).is_ok() {
            return candidate;
        }
    }
}

/// Derive the 32-byte x-only public key for a secret key.
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], Nip01Error> {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_seckey_slice(&secp, secret_key)
        .map_err(|error| Nip01Error::InvalidSecretKey(error.to_string()))?;
    let (public_key, _parity) = keypair.x_only_public_key();
    Ok(public_key.serialize())
}

/// Hex-encoded x-only public key for a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    get_public_key(secret_key).map(hex::encode)
}

/// Compute the event id: hex SHA-256 of `[0, pubkey, created_at, kind, tags, content]`.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serde_json::to_string(&json!([
        0,
        event.pubkey,
        event.created_at,
        event.kind,
        event.tags,
        event.content
    ]))?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

/// Sign a template, producing an event with derived `pubkey`, `id` and `sig`.
pub fn finalize_event(template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_seckey_slice(&secp, secret_key)
        .map_err(|error| Nip01Error::InvalidSecretKey(error.to_string()))?;
    let (public_key, _parity) = keypair.x_only_public_key();

    let unsigned = UnsignedEvent {
        pubkey: hex::encode(public_key.serialize()),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };
    let id = get_event_hash(&unsigned)?;
    let digest = decode_32(&id).map_err(Nip01Error::InvalidSignature)?;

    let aux_rand: [u8; 32] = rand::random();
    let signature =
        secp.sign_schnorr_with_aux_rand(&Message::from_digest(digest), &keypair, &aux_rand);

    Ok(Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(signature.serialize()),
    })
}

/// Check that the event id matches its fields.
pub fn validate_event(event: &Event) -> Result<(), Nip01Error> {
    let expected = get_event_hash(&UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    })?;
    if expected != event.id {
        return Err(Nip01Error::IdMismatch {
            expected,
            actual: event.id.clone(),
        });
    }
    Ok(())
}

/// Check the event id and its Schnorr signature.
pub fn verify_event(event: &Event) -> Result<(), Nip01Error> {
    validate_event(event)?;

    let public_key_bytes = decode_32(&event.pubkey).map_err(Nip01Error::InvalidPublicKey)?;
    let public_key = XOnlyPublicKey::from_slice(&public_key_bytes)
        .map_err(|error| Nip01Error::InvalidPublicKey(error.to_string()))?;
    let signature_bytes =
        hex::decode(&event.sig).map_err(|error| Nip01Error::InvalidSignature(error.to_string()))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|error| Nip01Error::InvalidSignature(error.to_string()))?;
    let digest = decode_32(&event.id).map_err(Nip01Error::InvalidSignature)?;

    Secp256k1::verification_only()
        .verify_schnorr(&signature, &Message::from_digest(digest), &public_key)
        .map_err(|error| Nip01Error::InvalidSignature(error.to_string()))
}

fn decode_32(value: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(value).map_err(|error| error.to_string())?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| format!("expected 32 bytes, got {}", bytes.len()))
}
