use anyhow::{Context, Result, anyhow};
use bech32::{Bech32, Hrp};

use crate::nip01::{generate_secret_key, get_public_key};

const NSEC_HRP: &str = "nsec";
const NPUB_HRP: &str = "npub";

#[derive(Clone)]
pub struct Keypair {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl Keypair {
    pub fn from_secret_key(private_key: [u8; 32]) -> Result<Self> {
        let public_key = get_public_key(&private_key).context("failed to derive public key")?;
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn generate() -> Result<Self> {
        Self::from_secret_key(generate_secret_key())
    }

    pub fn npub(&self) -> Result<String> {
        public_key_to_npub(&self.public_key)
    }

    pub fn nsec(&self) -> Result<String> {
        private_key_to_nsec(&self.private_key)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

pub fn public_key_to_npub(public_key: &[u8; 32]) -> Result<String> {
    encode_bech32(NPUB_HRP, public_key)
}

pub fn private_key_to_nsec(private_key: &[u8; 32]) -> Result<String> {
    encode_bech32(NSEC_HRP, private_key)
}

pub fn npub_to_public_key(npub: &str) -> Result<[u8; 32]> {
    decode_bech32(NPUB_HRP, npub)
}

pub fn nsec_to_private_key(nsec: &str) -> Result<[u8; 32]> {
    decode_bech32(NSEC_HRP, nsec)
}

/// Parse a secret key given as 64 hex characters or an `nsec1` string.
pub fn parse_secret_key(value: &str) -> Result<[u8; 32]> {
    let trimmed = value.trim();
    let key = if trimmed.starts_with("nsec1") {
        nsec_to_private_key(trimmed)?
    } else {
        decode_hex_32(trimmed).context("invalid hex secret key")?
    };
    // Rejects zero and out-of-range scalars.
    get_public_key(&key).context("secret key is not a valid secp256k1 scalar")?;
    Ok(key)
}

/// Parse a public key given as 64 hex characters or an `npub1` string; returns lowercase hex.
pub fn parse_public_key(value: &str) -> Result<String> {
    let trimmed = value.trim();
    let key = if trimmed.starts_with("npub1") {
        npub_to_public_key(trimmed)?
    } else {
        decode_hex_32(trimmed).context("invalid hex public key")?
    };
    Ok(hex::encode(key))
}

fn decode_hex_32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow!("expected 32 bytes, got {}", bytes.len()))
}

fn encode_bech32(hrp: &str, data: &[u8; 32]) -> Result<String> {
    let parsed_hrp = Hrp::parse(hrp).context("invalid bech32 hrp")?;
    bech32::encode::<Bech32>(parsed_hrp, data).context("failed to encode bech32")
}

fn decode_bech32(expected_hrp: &str, value: &str) -> Result<[u8; 32]> {
    let (hrp, data) = bech32::decode(value).context("failed to decode bech32")?;
    if hrp.as_str() != expected_hrp {
        return Err(anyhow!(
            "expected bech32 prefix {expected_hrp}, got {}",
            hrp.as_str()
        ));
    }
    <[u8; 32]>::try_from(data.as_slice())
        .map_err(|_| anyhow!("expected 32 bytes, got {}", data.len()))
}
