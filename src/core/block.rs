// Block structure and construction

use std::io::Read;

use crate::consensus::pow::ProofOfWork;
use crate::core::merkle::merkle_root;
use crate::core::serialize::{
    read_u32, read_u64, read_var_bytes, read_varint, write_u32, write_u64, write_var_bytes,
    write_varint, Serializable,
};
use crate::core::transaction::Transaction;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// SHA-256 of the proof-of-work preimage.
    pub hash: Vec<u8>,
    /// Hash of the parent block; empty for genesis.
    pub prev_hash: Vec<u8>,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub height: u32,
}

impl Block {
    /// Assemble a block and run proof-of-work to fill `nonce` and `hash`.
    pub fn create(transactions: Vec<Transaction>, prev_hash: Vec<u8>, height: u32) -> Block {
        let mut block = Block {
            hash: Vec::new(),
            prev_hash,
            transactions,
            nonce: 0,
            height,
        };
        let (nonce, hash) = ProofOfWork::new(&block).run();
        block.nonce = nonce;
        block.hash = hash;
        block
    }

    /// The genesis block: height 0, no parent, a single coinbase.
    pub fn genesis(coinbase: Transaction) -> Block {
        Block::create(vec![coinbase], Vec::new(), 0)
    }

    /// Merkle root over the transactions' serializations, committed in the
    /// proof-of-work preimage.
    pub fn hash_transactions(&self) -> Vec<u8> {
        let leaves: Vec<Vec<u8>> = self.transactions.iter().map(|tx| tx.serialize()).collect();
        merkle_root(&leaves)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }
}

impl Serializable for Block {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_var_bytes(buf, &self.hash);
        write_var_bytes(buf, &self.prev_hash);
        write_u64(buf, self.nonce);
        write_u32(buf, self.height);
        write_varint(buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write_to(buf);
        }
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let hash = read_var_bytes(reader)?;
        let prev_hash = read_var_bytes(reader)?;
        let nonce = read_u64(reader)?;
        let height = read_u32(reader)?;
        let tx_count = read_varint(reader)? as usize;
        let mut transactions = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            transactions.push(Transaction::read_from(reader)?);
        }
        Ok(Self {
            hash,
            prev_hash,
            transactions,
            nonce,
            height,
        })
    }
}
