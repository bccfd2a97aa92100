// Core ledger data structures

mod block;
pub mod hash;
pub mod merkle;
mod serialize;
mod transaction;

pub use block::Block;
pub use serialize::*;
pub use transaction::{Transaction, TxInput, TxOutput, TxOutputs, REWARD};
