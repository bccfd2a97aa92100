// Builds spending transactions from a wallet and the UTXO index

use crate::core::{Transaction, TxInput, TxOutput};
use crate::storage::UtxoSet;
use crate::wallet::Wallet;
use crate::{Error, Result};

/// Build and sign a transaction paying `amount` to `to`, with change back to
/// the wallet when the selected outputs overshoot.
pub fn new_transaction(
    wallet: &Wallet,
    to: &str,
    amount: u64,
    utxo: &UtxoSet,
) -> Result<Transaction> {
    let pubkey_hash = wallet.pubkey_hash();
    let (accumulated, spendable) = utxo.find_spendable_outputs(&pubkey_hash, amount)?;
    if accumulated < amount {
        return Err(Error::InsufficientFunds {
            available: accumulated,
            required: amount,
        });
    }

    let mut inputs = Vec::new();
    for (tx_id, out_indexes) in &spendable {
        let prev_tx_id = hex::decode(tx_id).map_err(|e| Error::Corrupted(e.to_string()))?;
        for &out_index in out_indexes {
            inputs.push(TxInput {
                prev_tx_id: prev_tx_id.clone(),
                out_index: out_index as i64,
                signature: Vec::new(),
                pubkey: wallet.public_key.clone(),
            });
        }
    }

    let mut outputs = vec![TxOutput::locked(amount, to)?];
    if accumulated > amount {
        outputs.push(TxOutput::locked(accumulated - amount, &wallet.address())?);
    }

    let mut tx = Transaction {
        id: Vec::new(),
        inputs,
        outputs,
    };
    tx.id = tx.hash();
    utxo.chain.sign_transaction(&mut tx, wallet.signing_key())?;
    Ok(tx)
}
