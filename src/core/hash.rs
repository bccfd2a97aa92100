// Hashing helpers

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SHA256(SHA256(data)) - used for address checksums.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// RIPEMD160(SHA256(data)) - used to derive public key hashes.
pub fn hash160(data: &[u8]) -> Vec<u8> {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_deterministic() {
        let a = sha256(b"hello world");
        let b = sha256(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, sha256(b"hello worlds"));
    }

    #[test]
    fn hash160_is_20_bytes() {
        assert_eq!(hash160(b"some public key").len(), 20);
    }

    #[test]
    fn double_sha256_differs_from_single() {
        let data = b"checksum payload";
        assert_ne!(double_sha256(data), sha256(data));
    }
}
