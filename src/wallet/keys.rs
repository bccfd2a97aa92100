// Key pairs and address derivation

use p256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::core::hash::{double_sha256, hash160};
use crate::{Error, Result};

/// Address version prefix.
pub const VERSION_BYTE: u8 = 0x00;
/// Bytes of the double-SHA-256 appended as a checksum.
pub const CHECKSUM_LENGTH: usize = 4;

/// An ECDSA P-256 key pair.
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    /// Uncompressed public key as X || Y, 64 bytes.
    pub public_key: Vec<u8>,
}

impl Wallet {
    /// Generate a fresh key pair.
    pub fn new() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = encode_pubkey(signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Rebuild a wallet from a stored private scalar.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        let signing_key =
            SigningKey::from_slice(key).map_err(|e| Error::Corrupted(e.to_string()))?;
        let public_key = encode_pubkey(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            public_key,
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn key_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    /// RIPEMD160(SHA256(public key)).
    pub fn pubkey_hash(&self) -> Vec<u8> {
        hash160(&self.public_key)
    }

    /// Base58Check address: version || pubkey_hash || checksum.
    pub fn address(&self) -> String {
        let mut payload = vec![VERSION_BYTE];
        payload.extend_from_slice(&self.pubkey_hash());
        let check = checksum(&payload);
        payload.extend_from_slice(&check);
        bs58::encode(payload).into_string()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_pubkey(key: &VerifyingKey) -> Vec<u8> {
    // uncompressed SEC1 encoding is 0x04 || X || Y; drop the tag
    key.to_encoded_point(false).as_bytes()[1..].to_vec()
}

/// First four bytes of the double SHA-256 of the versioned payload.
fn checksum(payload: &[u8]) -> Vec<u8> {
    double_sha256(payload)[..CHECKSUM_LENGTH].to_vec()
}

/// Whether the address decodes and its checksum matches.
pub fn validate_address(address: &str) -> bool {
    let Ok(decoded) = bs58::decode(address).into_vec() else {
        return false;
    };
    if decoded.len() <= CHECKSUM_LENGTH + 1 {
        return false;
    }
    let (payload, actual) = decoded.split_at(decoded.len() - CHECKSUM_LENGTH);
    checksum(payload) == actual
}

/// Extract the 20-byte public key hash from a Base58Check address.
pub fn pubkey_hash_from_address(address: &str) -> Result<Vec<u8>> {
    if !validate_address(address) {
        return Err(Error::InvalidAddress(address.to_string()));
    }
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    Ok(decoded[1..decoded.len() - CHECKSUM_LENGTH].to_vec())
}
