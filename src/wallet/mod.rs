// Wallets: P-256 key pairs and Base58Check addresses

mod keys;
mod tx_builder;
mod wallets;

pub use keys::{pubkey_hash_from_address, validate_address, Wallet, CHECKSUM_LENGTH, VERSION_BYTE};
pub use tx_builder::new_transaction;
pub use wallets::Wallets;
