// UTXO index: a prefix-scoped view of spendable outputs in the chain store

use std::collections::HashMap;

use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};

use crate::core::{Block, Serializable, TxOutput, TxOutputs};
use crate::storage::Blockchain;
use crate::{Error, Result};

/// Key prefix separating UTXO entries from blocks in the shared store.
pub const UTXO_PREFIX: &[u8] = b"utxo-";

/// Prefix deletes are chunked so a reindex never builds one huge batch.
const DELETE_BATCH_SIZE: usize = 100_000;

/// View over the chain store's `utxo-` entries. Rebuildable from the chain
/// (`reindex`) and incrementally maintained per block (`update`).
pub struct UtxoSet<'a> {
    pub chain: &'a Blockchain,
}

fn utxo_key(tx_id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(UTXO_PREFIX.len() + tx_id.len());
    key.extend_from_slice(UTXO_PREFIX);
    key.extend_from_slice(tx_id);
    key
}

impl UtxoSet<'_> {
    /// Drop every entry and recompute the unspent set from the chain.
    pub fn reindex(&self) -> Result<()> {
        self.delete_by_prefix(UTXO_PREFIX)?;

        let unspent = self.chain.find_unspent_outputs()?;
        let mut entries = Vec::with_capacity(unspent.len());
        for (tx_id, outputs) in &unspent {
            let id = hex::decode(tx_id).map_err(|e| Error::Corrupted(e.to_string()))?;
            entries.push((utxo_key(&id), outputs.serialize()));
        }
        self.chain
            .db()
            .transaction(|txn| -> ConflictableTransactionResult<(), Error> {
                for (key, value) in &entries {
                    txn.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            })?;
        Ok(())
    }

    /// Apply one block: drop the outputs its inputs spend, then record every
    /// transaction's outputs as unspent.
    pub fn update(&self, block: &Block) -> Result<()> {
        self.chain
            .db()
            .transaction(|txn| -> ConflictableTransactionResult<(), Error> {
                for tx in &block.transactions {
                    if !tx.is_coinbase() {
                        for input in &tx.inputs {
                            let key = utxo_key(&input.prev_tx_id);
                            let data = txn.get(key.as_slice())?.ok_or_else(|| {
                                ConflictableTransactionError::Abort(Error::Corrupted(
                                    "spent output missing from utxo index".to_string(),
                                ))
                            })?;
                            let outs = TxOutputs::deserialize(&data)
                                .map_err(ConflictableTransactionError::Abort)?;
                            let remaining: Vec<TxOutput> = outs
                                .outputs
                                .into_iter()
                                .enumerate()
                                .filter(|(out_index, _)| *out_index as i64 != input.out_index)
                                .map(|(_, output)| output)
                                .collect();
                            if remaining.is_empty() {
                                txn.remove(key.as_slice())?;
                            } else {
                                let updated = TxOutputs { outputs: remaining };
                                txn.insert(key.as_slice(), updated.serialize())?;
                            }
                        }
                    }
                    let fresh = TxOutputs {
                        outputs: tx.outputs.clone(),
                    };
                    txn.insert(utxo_key(&tx.id).as_slice(), fresh.serialize())?;
                }
                Ok(())
            })?;
        Ok(())
    }

    /// Collect outputs locked with `pubkey_hash` until `amount` is covered.
    ///
    /// Selection follows the store's iteration order; callers may only rely
    /// on the accumulated total.
    pub fn find_spendable_outputs(
        &self,
        pubkey_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let mut accumulated = 0u64;
        let mut unspent: HashMap<String, Vec<usize>> = HashMap::new();

        for item in self.chain.db().scan_prefix(UTXO_PREFIX) {
            let (key, value) = item?;
            let tx_id = hex::encode(&key[UTXO_PREFIX.len()..]);
            let outs = TxOutputs::deserialize(&value)?;
            for (out_index, output) in outs.outputs.iter().enumerate() {
                if output.is_locked_with(pubkey_hash) && accumulated < amount {
                    accumulated += output.value;
                    unspent.entry(tx_id.clone()).or_default().push(out_index);
                }
            }
        }
        Ok((accumulated, unspent))
    }

    /// All outputs locked with `pubkey_hash`.
    pub fn find_unspent_outputs(&self, pubkey_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut outputs = Vec::new();
        for item in self.chain.db().scan_prefix(UTXO_PREFIX) {
            let (_, value) = item?;
            let outs = TxOutputs::deserialize(&value)?;
            for output in outs.outputs {
                if output.is_locked_with(pubkey_hash) {
                    outputs.push(output);
                }
            }
        }
        Ok(outputs)
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.chain.db().scan_prefix(UTXO_PREFIX) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn delete_by_prefix(&self, prefix: &[u8]) -> Result<()> {
        let mut batch = sled::Batch::default();
        let mut collected = 0usize;
        for item in self.chain.db().scan_prefix(prefix) {
            let (key, _) = item?;
            batch.remove(key);
            collected += 1;
            if collected == DELETE_BATCH_SIZE {
                self.chain.db().apply_batch(std::mem::take(&mut batch))?;
                collected = 0;
            }
        }
        if collected > 0 {
            self.chain.db().apply_batch(batch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, REWARD};
    use crate::wallet::{new_transaction, Wallet};

    fn temp_chain() -> (Blockchain, Wallet) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let wallet = Wallet::new();
        let chain = Blockchain::create(db, &wallet.address()).unwrap();
        (chain, wallet)
    }

    fn balance(utxo: &UtxoSet, wallet: &Wallet) -> u64 {
        utxo.find_unspent_outputs(&wallet.pubkey_hash())
            .unwrap()
            .iter()
            .map(|output| output.value)
            .sum()
    }

    fn snapshot(chain: &Blockchain) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = chain
            .db()
            .scan_prefix(UTXO_PREFIX)
            .map(|item| {
                let (key, value) = item.unwrap();
                (key.to_vec(), value.to_vec())
            })
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn reindex_exposes_the_genesis_reward() {
        let (chain, wallet) = temp_chain();
        let utxo = UtxoSet { chain: &chain };
        utxo.reindex().unwrap();

        assert_eq!(utxo.count_transactions().unwrap(), 1);
        assert_eq!(balance(&utxo, &wallet), REWARD);
    }

    #[test]
    fn spendable_outputs_cover_the_requested_amount() {
        let (chain, wallet) = temp_chain();
        let utxo = UtxoSet { chain: &chain };
        utxo.reindex().unwrap();

        let (accumulated, selected) = utxo
            .find_spendable_outputs(&wallet.pubkey_hash(), 5)
            .unwrap();
        assert!(accumulated >= 5);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn update_tracks_a_spend() {
        let (chain, wallet) = temp_chain();
        let recipient = Wallet::new();
        let utxo = UtxoSet { chain: &chain };
        utxo.reindex().unwrap();

        let tx = new_transaction(&wallet, &recipient.address(), 5, &utxo).unwrap();
        let coinbase = Transaction::coinbase(&wallet.address(), "").unwrap();
        let block = chain.mine_block(vec![coinbase, tx]).unwrap();
        utxo.update(&block).unwrap();

        assert_eq!(balance(&utxo, &wallet), REWARD + REWARD - 5);
        assert_eq!(balance(&utxo, &recipient), 5);
    }

    #[test]
    fn reindex_is_the_fixed_point_of_update() {
        let (chain, wallet) = temp_chain();
        let recipient = Wallet::new();
        let utxo = UtxoSet { chain: &chain };
        utxo.reindex().unwrap();

        for amount in [5u64, 7] {
            let tx = new_transaction(&wallet, &recipient.address(), amount, &utxo).unwrap();
            let coinbase = Transaction::coinbase(&wallet.address(), "").unwrap();
            let block = chain.mine_block(vec![coinbase, tx]).unwrap();
            utxo.update(&block).unwrap();
        }

        let incremental = snapshot(&chain);
        utxo.reindex().unwrap();
        let rebuilt = snapshot(&chain);
        assert_eq!(incremental, rebuilt);
    }

    #[test]
    fn fully_spent_transactions_are_evicted() {
        let (chain, wallet) = temp_chain();
        let recipient = Wallet::new();
        let utxo = UtxoSet { chain: &chain };
        utxo.reindex().unwrap();

        let genesis_tip = chain.last_hash().unwrap();
        let genesis_coinbase_id = chain
            .get_block(&genesis_tip)
            .unwrap()
            .transactions[0]
            .id
            .clone();

        // spend the whole genesis reward, leaving no change
        let tx = new_transaction(&wallet, &recipient.address(), REWARD, &utxo).unwrap();
        let coinbase = Transaction::coinbase(&wallet.address(), "").unwrap();
        let block = chain.mine_block(vec![coinbase, tx]).unwrap();
        utxo.update(&block).unwrap();

        let key = utxo_key(&genesis_coinbase_id);
        assert!(chain.db().get(key).unwrap().is_none());
        assert_eq!(balance(&utxo, &recipient), REWARD);
    }
}
