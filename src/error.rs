// Crate-wide error type

use sled::transaction::TransactionError;
use thiserror::Error;

/// Errors surfaced by chain, wallet and network operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("NODE_ID environment variable is not set")]
    NodeIdUnset,

    #[error("blockchain already exists for node {0}")]
    StoreExists(String),

    #[error("no blockchain found for node {0}, run create-blockchain first")]
    StoreMissing(String),

    #[error("block not found")]
    BlockNotFound,

    #[error("transaction not found")]
    TxNotFound,

    #[error("previous transaction {0} does not exist")]
    MissingPrevTx(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("address {0} is not in the wallet file")]
    UnknownWallet(String),

    #[error("not enough funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("signature operation failed")]
    SignatureInvalid,

    #[error("corrupted input: {0}")]
    Corrupted(String),

    #[error("peer {0} is not available")]
    PeerUnreachable(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Db(#[from] sled::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<TransactionError<Error>> for Error {
    fn from(err: TransactionError<Error>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Error::Db(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
