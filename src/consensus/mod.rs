// Proof-of-work consensus

pub mod pow;

pub use pow::{ProofOfWork, DIFFICULTY};
