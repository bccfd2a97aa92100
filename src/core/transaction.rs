// Transactions: UTXO inputs/outputs, coinbase, trimmed-copy signing

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::generic_array::GenericArray;
use p256::EncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::core::hash::sha256;
use crate::core::serialize::{
    read_i64, read_u64, read_var_bytes, read_varint, write_i64, write_u64, write_var_bytes,
    write_varint, Serializable,
};
use crate::{wallet, Error, Result};

/// Fixed coinbase reward.
pub const REWARD: u64 = 20;

/// Reference to a previous transaction output, plus proof of ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the referenced output; empty for coinbase.
    pub prev_tx_id: Vec<u8>,
    /// Index of the referenced output; -1 for coinbase.
    pub out_index: i64,
    /// ECDSA signature as r || s, 64 bytes.
    pub signature: Vec<u8>,
    /// Uncompressed public key as X || Y, 64 bytes. Coinbase inputs carry
    /// free-form data here instead.
    pub pubkey: Vec<u8>,
}

/// A value locked to a public key hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: Vec<u8>,
}

impl TxOutput {
    /// Create an output locked to the owner of the given address.
    pub fn locked(value: u64, address: &str) -> Result<Self> {
        Ok(Self {
            value,
            pubkey_hash: wallet::pubkey_hash_from_address(address)?,
        })
    }

    /// Whether this output is spendable by the given public key hash.
    pub fn is_locked_with(&self, pubkey_hash: &[u8]) -> bool {
        self.pubkey_hash == pubkey_hash
    }
}

/// Grouped outputs of one transaction as persisted in the UTXO index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOutputs {
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Vec<u8>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a coinbase transaction paying the fixed reward to `to`.
    ///
    /// Empty `data` is replaced with 24 random bytes rendered as hex.
    pub fn coinbase(to: &str, data: &str) -> Result<Transaction> {
        let data = if data.is_empty() {
            let mut random = [0u8; 24];
            OsRng.fill_bytes(&mut random);
            hex::encode(random)
        } else {
            data.to_string()
        };
        let input = TxInput {
            prev_tx_id: Vec::new(),
            out_index: -1,
            signature: Vec::new(),
            pubkey: data.into_bytes(),
        };
        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![TxOutput::locked(REWARD, to)?],
        };
        tx.id = tx.hash();
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_tx_id.is_empty() && self.inputs[0].out_index == -1
    }

    /// Transaction id: SHA-256 of the serialization with `id` cleared.
    pub fn hash(&self) -> Vec<u8> {
        let mut copy = self.clone();
        copy.id = Vec::new();
        sha256(&copy.serialize()).to_vec()
    }

    /// Copy with every input's signature and pubkey cleared; the signing
    /// message template.
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx_id: input.prev_tx_id.clone(),
                out_index: input.out_index,
                signature: Vec::new(),
                pubkey: Vec::new(),
            })
            .collect();
        Transaction {
            id: self.id.clone(),
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Sign every input with the owner's private key.
    ///
    /// `prev_txs` maps hex ids to the transactions holding the referenced
    /// outputs; a missing entry is a logic error, not a validation failure.
    pub fn sign(&mut self, key: &SigningKey, prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        self.check_prev_txs(prev_txs)?;

        let mut copy = self.trimmed_copy();
        for index in 0..self.inputs.len() {
            let digest = signing_digest(&mut copy, index, prev_txs);
            let signature: Signature = key
                .sign_prehash(&digest)
                .map_err(|_| Error::SignatureInvalid)?;
            self.inputs[index].signature = signature.to_bytes().to_vec();
        }
        Ok(())
    }

    /// Check every input's signature against the referenced outputs.
    ///
    /// Malformed signature or pubkey bytes verify as `false`.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        self.check_prev_txs(prev_txs)?;

        let mut copy = self.trimmed_copy();
        for (index, input) in self.inputs.iter().enumerate() {
            let digest = signing_digest(&mut copy, index, prev_txs);
            let Ok(signature) = Signature::from_slice(&input.signature) else {
                return Ok(false);
            };
            let Some(key) = decode_pubkey(&input.pubkey) else {
                return Ok(false);
            };
            if key.verify_prehash(&digest, &signature).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn check_prev_txs(&self, prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        for input in &self.inputs {
            let id = hex::encode(&input.prev_tx_id);
            if !prev_txs.contains_key(&id) {
                return Err(Error::MissingPrevTx(id));
            }
        }
        Ok(())
    }
}

/// Compute the per-input signing digest on the trimmed copy: the referenced
/// output's pubkey hash stands in for the input's pubkey while the copy's id
/// is recomputed, then is cleared again.
fn signing_digest(
    copy: &mut Transaction,
    index: usize,
    prev_txs: &HashMap<String, Transaction>,
) -> Vec<u8> {
    let prev = &prev_txs[&hex::encode(&copy.inputs[index].prev_tx_id)];
    let out_index = copy.inputs[index].out_index as usize;
    copy.inputs[index].signature = Vec::new();
    copy.inputs[index].pubkey = prev.outputs[out_index].pubkey_hash.clone();
    copy.id = copy.hash();
    copy.inputs[index].pubkey = Vec::new();
    copy.id.clone()
}

/// Rebuild a verifying key from the 64-byte X || Y concatenation.
fn decode_pubkey(pubkey: &[u8]) -> Option<VerifyingKey> {
    if pubkey.len() != 64 {
        return None;
    }
    let point = EncodedPoint::from_untagged_bytes(GenericArray::from_slice(pubkey));
    VerifyingKey::from_encoded_point(&point).ok()
}

impl Serializable for TxInput {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_var_bytes(buf, &self.prev_tx_id);
        write_i64(buf, self.out_index);
        write_var_bytes(buf, &self.signature);
        write_var_bytes(buf, &self.pubkey);
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            prev_tx_id: read_var_bytes(reader)?,
            out_index: read_i64(reader)?,
            signature: read_var_bytes(reader)?,
            pubkey: read_var_bytes(reader)?,
        })
    }
}

impl Serializable for TxOutput {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_u64(buf, self.value);
        write_var_bytes(buf, &self.pubkey_hash);
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            value: read_u64(reader)?,
            pubkey_hash: read_var_bytes(reader)?,
        })
    }
}

impl Serializable for TxOutputs {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(buf);
        }
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let count = read_varint(reader)? as usize;
        let mut outputs = Vec::with_capacity(count);
        for _ in 0..count {
            outputs.push(TxOutput::read_from(reader)?);
        }
        Ok(Self { outputs })
    }
}

impl Serializable for Transaction {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_var_bytes(buf, &self.id);
        write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(buf);
        }
        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(buf);
        }
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let id = read_var_bytes(reader)?;
        let input_count = read_varint(reader)? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(reader)?);
        }
        let output_count = read_varint(reader)? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(reader)?);
        }
        Ok(Self { id, inputs, outputs })
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Transaction   {}", hex::encode(&self.id))?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "  Input       {i}")?;
            writeln!(f, "    TxID      {}", hex::encode(&input.prev_tx_id))?;
            writeln!(f, "    Out       {}", input.out_index)?;
            writeln!(f, "    Signature {}", hex::encode(&input.signature))?;
            writeln!(f, "    PubKey    {}", hex::encode(&input.pubkey))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "  Output      {i}")?;
            writeln!(f, "    Value     {}", output.value)?;
            writeln!(f, "    Script    {}", hex::encode(&output.pubkey_hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn spend_of(prev: &Transaction, owner: &Wallet, to: &str, amount: u64) -> Transaction {
        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![TxInput {
                prev_tx_id: prev.id.clone(),
                out_index: 0,
                signature: Vec::new(),
                pubkey: owner.public_key.clone(),
            }],
            outputs: vec![TxOutput::locked(amount, to).unwrap()],
        };
        tx.id = tx.hash();
        tx
    }

    #[test]
    fn coinbase_is_detected() {
        let wallet = Wallet::new();
        let tx = Transaction::coinbase(&wallet.address(), "").unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, REWARD);
    }

    #[test]
    fn empty_coinbase_data_is_filled() {
        let wallet = Wallet::new();
        let tx = Transaction::coinbase(&wallet.address(), "").unwrap();
        // 24 random bytes rendered as hex
        assert_eq!(tx.inputs[0].pubkey.len(), 48);
    }

    #[test]
    fn id_is_a_pure_function_of_content() {
        let wallet = Wallet::new();
        let tx = Transaction::coinbase(&wallet.address(), "genesis data").unwrap();
        assert_eq!(tx.id, tx.hash());
        let mut changed = tx.clone();
        changed.outputs[0].value += 1;
        assert_ne!(changed.hash(), tx.id);
    }

    #[test]
    fn serialization_round_trips() {
        let wallet = Wallet::new();
        let tx = Transaction::coinbase(&wallet.address(), "round trip").unwrap();
        let decoded = Transaction::deserialize(&tx.serialize()).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn trimmed_copy_clears_proofs() {
        let owner = Wallet::new();
        let recipient = Wallet::new();
        let prev = Transaction::coinbase(&owner.address(), "prev").unwrap();
        let tx = spend_of(&prev, &owner, &recipient.address(), 5);

        let trimmed = tx.trimmed_copy();
        assert!(trimmed.inputs[0].signature.is_empty());
        assert!(trimmed.inputs[0].pubkey.is_empty());
        assert_eq!(trimmed.outputs, tx.outputs);
    }

    #[test]
    fn sign_then_verify() {
        let owner = Wallet::new();
        let recipient = Wallet::new();
        let prev = Transaction::coinbase(&owner.address(), "prev").unwrap();
        let mut tx = spend_of(&prev, &owner, &recipient.address(), 5);

        let mut prev_txs = HashMap::new();
        prev_txs.insert(hex::encode(&prev.id), prev);

        tx.sign(owner.signing_key(), &prev_txs).unwrap();
        assert!(tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let owner = Wallet::new();
        let recipient = Wallet::new();
        let prev = Transaction::coinbase(&owner.address(), "prev").unwrap();
        let mut tx = spend_of(&prev, &owner, &recipient.address(), 5);

        let mut prev_txs = HashMap::new();
        prev_txs.insert(hex::encode(&prev.id), prev);
        tx.sign(owner.signing_key(), &prev_txs).unwrap();

        tx.inputs[0].signature[31] ^= 0x01;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let owner = Wallet::new();
        let thief = Wallet::new();
        let recipient = Wallet::new();
        let prev = Transaction::coinbase(&owner.address(), "prev").unwrap();
        let mut tx = spend_of(&prev, &owner, &recipient.address(), 5);

        let mut prev_txs = HashMap::new();
        prev_txs.insert(hex::encode(&prev.id), prev);
        tx.sign(thief.signing_key(), &prev_txs).unwrap();
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn missing_prev_tx_is_a_distinct_error() {
        let owner = Wallet::new();
        let recipient = Wallet::new();
        let prev = Transaction::coinbase(&owner.address(), "prev").unwrap();
        let mut tx = spend_of(&prev, &owner, &recipient.address(), 5);

        let empty = HashMap::new();
        assert!(matches!(
            tx.sign(owner.signing_key(), &empty),
            Err(Error::MissingPrevTx(_))
        ));
    }
}
