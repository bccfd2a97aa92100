// Proof of work with a fixed difficulty target

use crate::core::hash::sha256;
use crate::core::Block;

/// Required number of leading zero bits in a block hash.
///
/// A network parameter: every node must agree on it. Kept small so block
/// production stays fast.
pub const DIFFICULTY: u64 = 12;

/// Nonce search and validation against the fixed target.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle: Vec<u8>,
    target: [u8; 32],
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block) -> Self {
        // The target is 2^(256 - DIFFICULTY) as a big-endian 32-byte bound.
        let bit = 256 - DIFFICULTY as usize;
        let mut target = [0u8; 32];
        target[31 - bit / 8] = 1 << (bit % 8);
        Self {
            block,
            merkle: block.hash_transactions(),
            target,
        }
    }

    /// The hashed preimage for a candidate nonce:
    /// prev_hash || merkle_root || nonce (8 bytes BE) || difficulty (8 bytes BE).
    fn preimage(&self, nonce: u64) -> Vec<u8> {
        let mut data =
            Vec::with_capacity(self.block.prev_hash.len() + self.merkle.len() + 16);
        data.extend_from_slice(&self.block.prev_hash);
        data.extend_from_slice(&self.merkle);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&DIFFICULTY.to_be_bytes());
        data
    }

    fn meets_target(&self, hash: &[u8; 32]) -> bool {
        hash[..] < self.target[..]
    }

    /// Enumerate nonces from zero and return the first `(nonce, hash)`
    /// satisfying the target. Terminates probabilistically.
    pub fn run(&self) -> (u64, Vec<u8>) {
        let mut nonce = 0u64;
        loop {
            let hash = sha256(&self.preimage(nonce));
            if self.meets_target(&hash) {
                return (nonce, hash.to_vec());
            }
            nonce += 1;
            if nonce % 1_000_000 == 0 {
                log::debug!("mining: {nonce} nonces tried");
            }
        }
    }

    /// Re-check the block's stored nonce against the target.
    pub fn validate(&self) -> bool {
        let hash = sha256(&self.preimage(self.block.nonce));
        self.meets_target(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    fn test_block() -> Block {
        let wallet = Wallet::new();
        let coinbase = Transaction::coinbase(&wallet.address(), "pow tests").unwrap();
        Block::genesis(coinbase)
    }

    #[test]
    fn target_has_twelve_leading_zero_bits() {
        let block = test_block();
        let pow = ProofOfWork::new(&block);
        assert_eq!(pow.target[0], 0x00);
        assert_eq!(pow.target[1], 0x10);
        assert!(pow.target[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn mined_block_validates() {
        let block = test_block();
        assert!(ProofOfWork::new(&block).validate());
    }

    #[test]
    fn altered_nonce_fails_validation() {
        let mut block = test_block();
        // every nonce below the found one was already rejected by the search
        block.nonce = block.nonce.checked_sub(1).unwrap_or(u64::MAX);
        assert!(!ProofOfWork::new(&block).validate());
    }

    #[test]
    fn found_hash_meets_target() {
        let block = test_block();
        // the stored hash was produced by run(); it must be below the bound
        assert!(block.hash[0] == 0 && block.hash[1] < 0x10);
    }
}
