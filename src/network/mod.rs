// P2P gossip protocol

pub mod message;
mod node;

pub use message::{Message, PROTOCOL_VERSION};
pub use node::{send_transaction, Node, CENTRAL_NODE};
