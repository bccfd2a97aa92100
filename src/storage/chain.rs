// Chain store: block-hash keyed blocks plus a tip pointer, on sled

use std::collections::HashMap;
use std::path::Path;

use p256::ecdsa::SigningKey;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::Db;

use crate::core::{Block, Serializable, Transaction, TxOutputs};
use crate::{Error, Result};

/// Key holding the hash of the current best-height tip.
const LAST_HASH_KEY: &[u8] = b"lh";
const GENESIS_DATA: &str = "Genesis coinbase reward";
const DB_ROOT: &str = "./tmp";

fn db_path(node_id: &str) -> String {
    format!("{DB_ROOT}/blocks_{node_id}")
}

/// Handle to one node's persistent chain.
///
/// The tip pointer is read from the store on demand, so clones of the handle
/// can never disagree about it.
#[derive(Clone)]
pub struct Blockchain {
    db: Db,
}

impl Blockchain {
    /// Create the on-disk chain for a node. Refuses if one already exists.
    pub fn init(address: &str, node_id: &str) -> Result<Self> {
        let path = db_path(node_id);
        if Path::new(&path).exists() {
            return Err(Error::StoreExists(node_id.to_string()));
        }
        std::fs::create_dir_all(DB_ROOT)?;
        Self::create(open_db(&path)?, address)
    }

    /// Write a genesis block paying `address` into an empty database.
    pub fn create(db: Db, address: &str) -> Result<Self> {
        let coinbase = Transaction::coinbase(address, GENESIS_DATA)?;
        let genesis = Block::genesis(coinbase);
        let data = genesis.serialize();
        db.transaction(|txn| -> ConflictableTransactionResult<(), Error> {
            txn.insert(genesis.hash.as_slice(), data.as_slice())?;
            txn.insert(LAST_HASH_KEY, genesis.hash.as_slice())?;
            Ok(())
        })?;
        log::info!("genesis created: {}", hex::encode(&genesis.hash));
        Ok(Self { db })
    }

    /// Open the existing on-disk chain for a node.
    pub fn resume(node_id: &str) -> Result<Self> {
        let path = db_path(node_id);
        if !Path::new(&path).exists() {
            return Err(Error::StoreMissing(node_id.to_string()));
        }
        let db = open_db(&path)?;
        if db.get(LAST_HASH_KEY)?.is_none() {
            return Err(Error::StoreMissing(node_id.to_string()));
        }
        Ok(Self { db })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Hash of the current tip.
    pub fn last_hash(&self) -> Result<Vec<u8>> {
        self.db
            .get(LAST_HASH_KEY)?
            .map(|v| v.to_vec())
            .ok_or_else(|| Error::Corrupted("missing last-hash pointer".to_string()))
    }

    /// Store a block received from a peer. A no-op for known hashes; the tip
    /// pointer advances only when the block is strictly taller.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let data = block.serialize();
        self.db
            .transaction(|txn| -> ConflictableTransactionResult<(), Error> {
                if txn.get(block.hash.as_slice())?.is_some() {
                    return Ok(());
                }
                txn.insert(block.hash.as_slice(), data.as_slice())?;
                let last_hash = txn
                    .get(LAST_HASH_KEY)?
                    .ok_or_else(|| abort("missing last-hash pointer"))?;
                let tip_data = txn
                    .get(&last_hash)?
                    .ok_or_else(|| abort("tip block missing"))?;
                let tip =
                    Block::deserialize(&tip_data).map_err(ConflictableTransactionError::Abort)?;
                if block.height > tip.height {
                    txn.insert(LAST_HASH_KEY, block.hash.as_slice())?;
                }
                Ok(())
            })?;
        Ok(())
    }

    pub fn get_block(&self, hash: &[u8]) -> Result<Block> {
        let data = self.db.get(hash)?.ok_or(Error::BlockNotFound)?;
        Block::deserialize(&data)
    }

    /// Every block hash from tip to genesis.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut hashes = Vec::new();
        for block in self.iter()? {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    pub fn get_best_height(&self) -> Result<u32> {
        let last_hash = self.last_hash()?;
        Ok(self.get_block(&last_hash)?.height)
    }

    /// Build, prove and persist a block on top of the current tip.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let last_hash = self.last_hash()?;
        let last_height = self.get_block(&last_hash)?.height;
        let block = Block::create(transactions, last_hash, last_height + 1);

        let data = block.serialize();
        self.db
            .transaction(|txn| -> ConflictableTransactionResult<(), Error> {
                txn.insert(block.hash.as_slice(), data.as_slice())?;
                txn.insert(LAST_HASH_KEY, block.hash.as_slice())?;
                Ok(())
            })?;
        Ok(block)
    }

    /// Linear scan backward through the chain for a transaction id.
    pub fn find_transaction(&self, id: &[u8]) -> Result<Transaction> {
        for block in self.iter()? {
            for tx in block?.transactions {
                if tx.id == id {
                    return Ok(tx);
                }
            }
        }
        Err(Error::TxNotFound)
    }

    fn previous_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            let prev = self.find_transaction(&input.prev_tx_id)?;
            prev_txs.insert(hex::encode(&prev.id), prev);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, key: &SigningKey) -> Result<()> {
        let prev_txs = self.previous_transactions(tx)?;
        tx.sign(key, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.previous_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Recompute the full unspent set in a single backward scan. Ground
    /// truth for the UTXO index.
    pub fn find_unspent_outputs(&self) -> Result<HashMap<String, TxOutputs>> {
        let mut unspent: HashMap<String, TxOutputs> = HashMap::new();
        let mut spent: HashMap<String, Vec<i64>> = HashMap::new();

        for block in self.iter()? {
            for tx in &block?.transactions {
                let tx_id = hex::encode(&tx.id);
                for (out_index, output) in tx.outputs.iter().enumerate() {
                    let is_spent = spent
                        .get(&tx_id)
                        .is_some_and(|outs| outs.contains(&(out_index as i64)));
                    if is_spent {
                        continue;
                    }
                    unspent
                        .entry(tx_id.clone())
                        .or_default()
                        .outputs
                        .push(output.clone());
                }
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent
                            .entry(hex::encode(&input.prev_tx_id))
                            .or_default()
                            .push(input.out_index);
                    }
                }
            }
        }
        Ok(unspent)
    }

    /// Cursor from the tip back to genesis.
    pub fn iter(&self) -> Result<ChainIterator<'_>> {
        Ok(ChainIterator {
            chain: self,
            current: self.last_hash()?,
        })
    }
}

/// Walks `prev_hash` links in reverse-chronological order; terminates at the
/// genesis block's empty parent.
pub struct ChainIterator<'a> {
    chain: &'a Blockchain,
    current: Vec<u8>,
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() {
            return None;
        }
        match self.chain.get_block(&self.current) {
            Ok(block) => {
                self.current = block.prev_hash.clone();
                Some(Ok(block))
            }
            Err(e) => {
                self.current = Vec::new();
                Some(Err(e))
            }
        }
    }
}

fn abort(msg: &str) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(Error::Corrupted(msg.to_string()))
}

/// Open the store, retrying once if another process just released it.
fn open_db(path: &str) -> Result<Db> {
    match sled::open(path) {
        Ok(db) => Ok(db),
        Err(err) => {
            let message = err.to_string();
            if message.contains("lock") || message.contains("WouldBlock") {
                log::warn!("store at {path} is locked, retrying once");
                Ok(sled::open(path)?)
            } else {
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow::ProofOfWork;
    use crate::wallet::Wallet;

    fn temp_chain() -> (Blockchain, Wallet) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let wallet = Wallet::new();
        let chain = Blockchain::create(db, &wallet.address()).unwrap();
        (chain, wallet)
    }

    #[test]
    fn create_writes_genesis_and_tip() {
        let (chain, _) = temp_chain();
        assert_eq!(chain.get_best_height().unwrap(), 0);

        let tip = chain.last_hash().unwrap();
        let genesis = chain.get_block(&tip).unwrap();
        assert!(genesis.is_genesis());
        assert!(genesis.transactions[0].is_coinbase());
        assert!(ProofOfWork::new(&genesis).validate());
    }

    #[test]
    fn mine_block_extends_the_tip() {
        let (chain, wallet) = temp_chain();
        let genesis_hash = chain.last_hash().unwrap();

        let coinbase = Transaction::coinbase(&wallet.address(), "").unwrap();
        let block = chain.mine_block(vec![coinbase]).unwrap();

        assert_eq!(block.height, 1);
        assert_eq!(block.prev_hash, genesis_hash);
        assert_eq!(chain.last_hash().unwrap(), block.hash);
        assert_eq!(chain.get_best_height().unwrap(), 1);
    }

    #[test]
    fn add_block_is_idempotent_by_hash() {
        let (chain, wallet) = temp_chain();
        let coinbase = Transaction::coinbase(&wallet.address(), "").unwrap();
        let block = chain.mine_block(vec![coinbase]).unwrap();

        chain.add_block(&block).unwrap();
        chain.add_block(&block).unwrap();
        assert_eq!(chain.get_block_hashes().unwrap().len(), 2);
    }

    #[test]
    fn tip_advances_only_for_strictly_taller_blocks() {
        let (chain, wallet) = temp_chain();
        let genesis_hash = chain.last_hash().unwrap();

        let coinbase_a = Transaction::coinbase(&wallet.address(), "branch a").unwrap();
        let tip = chain.mine_block(vec![coinbase_a]).unwrap();

        // a sibling at the same height is stored but does not move the tip
        let coinbase_b = Transaction::coinbase(&wallet.address(), "branch b").unwrap();
        let sibling = Block::create(vec![coinbase_b], genesis_hash, 1);
        chain.add_block(&sibling).unwrap();

        assert_eq!(chain.last_hash().unwrap(), tip.hash);
        assert_eq!(chain.get_block(&sibling.hash).unwrap(), sibling);

        // a taller peer block does move it
        let coinbase_c = Transaction::coinbase(&wallet.address(), "taller").unwrap();
        let taller = Block::create(vec![coinbase_c], sibling.hash.clone(), 2);
        chain.add_block(&taller).unwrap();
        assert_eq!(chain.last_hash().unwrap(), taller.hash);
    }

    #[test]
    fn hashes_run_from_tip_to_genesis() {
        let (chain, wallet) = temp_chain();
        let genesis_hash = chain.last_hash().unwrap();
        let coinbase = Transaction::coinbase(&wallet.address(), "").unwrap();
        let block = chain.mine_block(vec![coinbase]).unwrap();

        let hashes = chain.get_block_hashes().unwrap();
        assert_eq!(hashes, vec![block.hash, genesis_hash]);
    }

    #[test]
    fn parent_links_and_heights_are_consistent() {
        let (chain, wallet) = temp_chain();
        for _ in 0..3 {
            let coinbase = Transaction::coinbase(&wallet.address(), "").unwrap();
            chain.mine_block(vec![coinbase]).unwrap();
        }
        for block in chain.iter().unwrap() {
            let block = block.unwrap();
            assert!(ProofOfWork::new(&block).validate());
            if !block.is_genesis() {
                let parent = chain.get_block(&block.prev_hash).unwrap();
                assert_eq!(block.height, parent.height + 1);
            }
        }
    }

    #[test]
    fn find_transaction_scans_the_chain() {
        let (chain, wallet) = temp_chain();
        let coinbase = Transaction::coinbase(&wallet.address(), "findable").unwrap();
        let id = coinbase.id.clone();
        chain.mine_block(vec![coinbase]).unwrap();

        let found = chain.find_transaction(&id).unwrap();
        assert_eq!(found.id, id);
        assert!(matches!(
            chain.find_transaction(b"no such id"),
            Err(Error::TxNotFound)
        ));
    }

    #[test]
    fn missing_block_is_not_found() {
        let (chain, _) = temp_chain();
        assert!(matches!(
            chain.get_block(&[0u8; 32]),
            Err(Error::BlockNotFound)
        ));
    }
}
