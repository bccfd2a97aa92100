// Per-node wallet file

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::wallet::Wallet;
use crate::{Error, Result};

/// On-disk form of one wallet: hex-encoded key material.
#[derive(Serialize, Deserialize)]
struct StoredWallet {
    private_key: String,
    public_key: String,
}

/// All wallets known to one node, keyed by address.
#[derive(Default)]
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

fn wallets_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("./tmp/wallets_{node_id}.data"))
}

impl Wallets {
    /// Load the wallet file for a node; a missing file is an empty set.
    pub fn load(node_id: &str) -> Result<Self> {
        Self::load_from(&wallets_path(node_id))
    }

    fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read(path)?;
        let stored: HashMap<String, StoredWallet> =
            serde_json::from_slice(&content).map_err(|e| Error::Corrupted(e.to_string()))?;

        let mut wallets = HashMap::with_capacity(stored.len());
        for (address, entry) in stored {
            let key = hex::decode(&entry.private_key)
                .map_err(|e| Error::Corrupted(e.to_string()))?;
            wallets.insert(address, Wallet::from_key_bytes(&key)?);
        }
        Ok(Self { wallets })
    }

    /// Rewrite the whole wallet file for a node.
    pub fn save(&self, node_id: &str) -> Result<()> {
        self.save_to(&wallets_path(node_id))
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stored: HashMap<&String, StoredWallet> = self
            .wallets
            .iter()
            .map(|(address, wallet)| {
                (
                    address,
                    StoredWallet {
                        private_key: hex::encode(wallet.key_bytes()),
                        public_key: hex::encode(&wallet.public_key),
                    },
                )
            })
            .collect();
        let content =
            serde_json::to_vec_pretty(&stored).map_err(|e| Error::Corrupted(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Generate a wallet, add it, and return its address.
    pub fn add_wallet(&mut self) -> String {
        let wallet = Wallet::new();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        address
    }

    pub fn get(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }
}
