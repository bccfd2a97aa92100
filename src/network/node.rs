// P2P node: TCP listener, gossip handlers, mempool and miner

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::core::{Block, Serializable, Transaction};
use crate::network::message::{
    AddrPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message,
    TxPayload, VersionPayload, PROTOCOL_VERSION,
};
use crate::storage::{Blockchain, UtxoSet};
use crate::{Error, Result};

/// Bootstrap peer; the first known node acts as the gossip hub.
pub const CENTRAL_NODE: &str = "localhost:3000";

/// One running node. Shared state lives behind per-structure locks; handlers
/// take snapshots before any network I/O.
pub struct Node {
    address: String,
    miner_address: Option<String>,
    chain: Blockchain,
    known_nodes: Mutex<Vec<String>>,
    blocks_in_transit: Mutex<Vec<Vec<u8>>>,
    mempool: Mutex<HashMap<String, Transaction>>,
}

impl Node {
    pub fn new(node_id: &str, miner_address: Option<String>, chain: Blockchain) -> Self {
        Self {
            address: format!("localhost:{node_id}"),
            miner_address,
            chain,
            known_nodes: Mutex::new(vec![CENTRAL_NODE.to_string()]),
            blocks_in_transit: Mutex::new(Vec::new()),
            mempool: Mutex::new(HashMap::new()),
        }
    }

    fn is_central(&self) -> bool {
        self.address == CENTRAL_NODE
    }

    /// Listen for requests until a termination signal arrives.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.address).await?;
        log::info!("node listening on {}", self.address);

        let db = self.chain.db().clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            log::info!("signal received, closing the store");
            if let Err(e) = db.flush() {
                log::error!("store flush failed: {e}");
            }
            std::process::exit(0);
        });

        if !self.is_central() {
            self.send_version(CENTRAL_NODE).await;
        }

        loop {
            let (stream, peer) = listener.accept().await?;
            let node = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = node.handle_connection(stream).await {
                    log::error!("connection from {peer}: {e}");
                }
            });
        }
    }

    /// Read one full request, dispatch it, close the connection.
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let mut request = Vec::new();
        stream.read_to_end(&mut request).await?;
        drop(stream);

        let message = match Message::deserialize(&request) {
            Ok(message) => message,
            Err(Error::UnknownCommand(command)) => {
                log::warn!("unknown command {command:?}, dropping request");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        log::info!("received {} command", message.command());

        match message {
            Message::Version(payload) => self.handle_version(payload).await,
            Message::Addr(payload) => self.handle_addr(payload).await,
            Message::GetBlocks(payload) => self.handle_get_blocks(payload).await,
            Message::GetData(payload) => self.handle_get_data(payload).await,
            Message::Inv(payload) => self.handle_inv(payload).await,
            Message::Block(payload) => self.handle_block(payload).await,
            Message::Tx(payload) => self.handle_tx(payload).await,
        }
    }

    async fn handle_version(&self, payload: VersionPayload) -> Result<()> {
        let best_height = self.chain.get_best_height()?;
        if best_height < payload.best_height {
            self.send_get_blocks(&payload.addr_from).await;
        } else if best_height > payload.best_height {
            self.send_version(&payload.addr_from).await;
        }
        let mut nodes = self.known_nodes.lock().await;
        if !nodes.contains(&payload.addr_from) {
            nodes.push(payload.addr_from);
        }
        Ok(())
    }

    async fn handle_addr(&self, payload: AddrPayload) -> Result<()> {
        let peers = {
            let mut nodes = self.known_nodes.lock().await;
            for addr in payload.addr_list {
                if !nodes.contains(&addr) {
                    nodes.push(addr);
                }
            }
            log::info!("{} known nodes", nodes.len());
            nodes.clone()
        };
        for peer in peers {
            self.send_get_blocks(&peer).await;
        }
        Ok(())
    }

    async fn handle_get_blocks(&self, payload: GetBlocksPayload) -> Result<()> {
        let hashes = self.chain.get_block_hashes()?;
        self.send_inv(&payload.addr_from, InvKind::Block, hashes).await;
        Ok(())
    }

    async fn handle_get_data(&self, payload: GetDataPayload) -> Result<()> {
        match payload.kind {
            InvKind::Block => {
                let block = self.chain.get_block(&payload.id)?;
                self.send_block(&payload.addr_from, &block).await;
            }
            InvKind::Tx => {
                let id = hex::encode(&payload.id);
                let tx = self.mempool.lock().await.get(&id).cloned();
                match tx {
                    Some(tx) => self.send_tx(&payload.addr_from, &tx).await,
                    None => log::warn!("transaction {id} is not in the mempool"),
                }
            }
        }
        Ok(())
    }

    async fn handle_inv(&self, payload: InvPayload) -> Result<()> {
        log::info!("inventory with {} {:?} items", payload.items.len(), payload.kind);
        match payload.kind {
            InvKind::Block => {
                let first = {
                    let mut transit = self.blocks_in_transit.lock().await;
                    *transit = payload.items;
                    if transit.is_empty() {
                        None
                    } else {
                        Some(transit.remove(0))
                    }
                };
                if let Some(hash) = first {
                    self.send_get_data(&payload.addr_from, InvKind::Block, hash).await;
                }
            }
            InvKind::Tx => {
                let Some(id) = payload.items.first() else {
                    return Ok(());
                };
                let in_pool = self.mempool.lock().await.contains_key(&hex::encode(id));
                if !in_pool {
                    self.send_get_data(&payload.addr_from, InvKind::Tx, id.clone()).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_block(&self, payload: BlockPayload) -> Result<()> {
        let block = Block::deserialize(&payload.block)?;
        self.chain.add_block(&block)?;
        log::info!("added block {}", hex::encode(&block.hash));

        let next = {
            let mut transit = self.blocks_in_transit.lock().await;
            if transit.is_empty() {
                None
            } else {
                Some(transit.remove(0))
            }
        };
        match next {
            Some(hash) => {
                self.send_get_data(&payload.addr_from, InvKind::Block, hash).await;
            }
            None => {
                UtxoSet { chain: &self.chain }.reindex()?;
            }
        }
        Ok(())
    }

    async fn handle_tx(&self, payload: TxPayload) -> Result<()> {
        let tx = Transaction::deserialize(&payload.transaction)?;
        let tx_id = tx.id.clone();
        let pool_size = {
            let mut pool = self.mempool.lock().await;
            pool.insert(hex::encode(&tx_id), tx);
            pool.len()
        };
        log::info!("{}: mempool holds {pool_size} transactions", self.address);

        if self.is_central() {
            // gossip the id to everyone but ourselves and the sender
            let peers = self.known_nodes.lock().await.clone();
            for peer in peers {
                if peer != self.address && peer != payload.addr_from {
                    self.send_inv(&peer, InvKind::Tx, vec![tx_id.clone()]).await;
                }
            }
        } else if pool_size >= 2 && self.miner_address.is_some() {
            self.mine_pending().await?;
        }
        Ok(())
    }

    /// Mine verified mempool transactions into blocks until the pool drains.
    async fn mine_pending(&self) -> Result<()> {
        let Some(miner_address) = self.miner_address.clone() else {
            return Ok(());
        };
        loop {
            let candidates: Vec<Transaction> =
                self.mempool.lock().await.values().cloned().collect();

            let mut transactions = Vec::new();
            for tx in candidates {
                match self.chain.verify_transaction(&tx) {
                    Ok(true) => transactions.push(tx),
                    Ok(false) => {
                        log::warn!("transaction {} failed verification", hex::encode(&tx.id))
                    }
                    Err(e) => {
                        log::warn!("cannot verify transaction {}: {e}", hex::encode(&tx.id))
                    }
                }
            }
            if transactions.is_empty() {
                log::info!("no verifiable transactions to mine");
                return Ok(());
            }

            transactions.push(Transaction::coinbase(&miner_address, "")?);
            let block = self.chain.mine_block(transactions)?;
            UtxoSet { chain: &self.chain }.reindex()?;
            log::info!("mined block {}", hex::encode(&block.hash));

            let drained = {
                let mut pool = self.mempool.lock().await;
                for tx in &block.transactions {
                    pool.remove(&hex::encode(&tx.id));
                }
                pool.is_empty()
            };

            let peers = self.known_nodes.lock().await.clone();
            for peer in peers {
                if peer != self.address {
                    self.send_inv(&peer, InvKind::Block, vec![block.hash.clone()]).await;
                }
            }
            if drained {
                return Ok(());
            }
        }
    }

    async fn send_version(&self, addr: &str) {
        let best_height = match self.chain.get_best_height() {
            Ok(height) => height,
            Err(e) => {
                log::error!("cannot read best height: {e}");
                return;
            }
        };
        let message = Message::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            best_height,
            addr_from: self.address.clone(),
        });
        self.send_data(addr, &message.serialize()).await;
    }

    async fn send_get_blocks(&self, addr: &str) {
        let message = Message::GetBlocks(GetBlocksPayload {
            addr_from: self.address.clone(),
        });
        self.send_data(addr, &message.serialize()).await;
    }

    async fn send_get_data(&self, addr: &str, kind: InvKind, id: Vec<u8>) {
        let message = Message::GetData(GetDataPayload {
            addr_from: self.address.clone(),
            kind,
            id,
        });
        self.send_data(addr, &message.serialize()).await;
    }

    async fn send_inv(&self, addr: &str, kind: InvKind, items: Vec<Vec<u8>>) {
        let message = Message::Inv(InvPayload {
            addr_from: self.address.clone(),
            kind,
            items,
        });
        self.send_data(addr, &message.serialize()).await;
    }

    async fn send_block(&self, addr: &str, block: &Block) {
        let message = Message::Block(BlockPayload {
            addr_from: self.address.clone(),
            block: block.serialize(),
        });
        self.send_data(addr, &message.serialize()).await;
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) {
        let message = Message::Tx(TxPayload {
            addr_from: self.address.clone(),
            transaction: tx.serialize(),
        });
        self.send_data(addr, &message.serialize()).await;
    }

    /// Deliver one request; an unreachable peer is pruned from `known_nodes`
    /// for the rest of the process lifetime.
    async fn send_data(&self, addr: &str, data: &[u8]) {
        if let Err(e) = send_raw(addr, data).await {
            log::warn!("{e}");
            let mut nodes = self.known_nodes.lock().await;
            nodes.retain(|node| node != addr);
        }
    }
}

/// Write one framed request to a peer and close the connection.
async fn send_raw(addr: &str, data: &[u8]) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|_| Error::PeerUnreachable(addr.to_string()))?;
    stream.write_all(data).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Hand a locally built transaction to the canonical node. Used by the CLI's
/// `send` command when it does not mine itself.
pub async fn send_transaction(addr: &str, tx: &Transaction) -> Result<()> {
    let message = Message::Tx(TxPayload {
        addr_from: String::new(),
        transaction: tx.serialize(),
    });
    send_raw(addr, &message.serialize()).await
}

/// Resolves when SIGINT or SIGTERM is delivered.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn test_node(node_id: &str, miner: Option<String>) -> (Node, Wallet) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let wallet = Wallet::new();
        let chain = Blockchain::create(db, &wallet.address()).unwrap();
        (Node::new(node_id, miner, chain), wallet)
    }

    #[tokio::test]
    async fn handle_tx_populates_the_mempool() {
        let (node, wallet) = test_node("4001", None);
        let tx = Transaction::coinbase(&wallet.address(), "mempool entry").unwrap();
        let payload = TxPayload {
            addr_from: "localhost:4002".to_string(),
            transaction: tx.serialize(),
        };

        node.handle_tx(payload).await.unwrap();
        let pool = node.mempool.lock().await;
        assert_eq!(pool.len(), 1);
        assert!(pool.contains_key(&hex::encode(&tx.id)));
    }

    #[tokio::test]
    async fn duplicate_tx_messages_are_idempotent() {
        let (node, wallet) = test_node("4003", None);
        let tx = Transaction::coinbase(&wallet.address(), "duplicate").unwrap();
        let payload = TxPayload {
            addr_from: "localhost:4004".to_string(),
            transaction: tx.serialize(),
        };

        node.handle_tx(payload.clone()).await.unwrap();
        node.handle_tx(payload).await.unwrap();
        assert_eq!(node.mempool.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn handle_version_registers_the_sender() {
        let (node, _) = test_node("4005", None);
        let payload = VersionPayload {
            version: PROTOCOL_VERSION,
            best_height: 0,
            addr_from: "localhost:4006".to_string(),
        };

        node.handle_version(payload).await.unwrap();
        let nodes = node.known_nodes.lock().await;
        assert!(nodes.contains(&"localhost:4006".to_string()));
    }

    #[tokio::test]
    async fn duplicate_block_messages_are_idempotent() {
        let (node, wallet) = test_node("4007", None);
        let coinbase = Transaction::coinbase(&wallet.address(), "").unwrap();
        let block = node.chain.mine_block(vec![coinbase]).unwrap();
        let payload = BlockPayload {
            addr_from: "localhost:4008".to_string(),
            block: block.serialize(),
        };

        node.handle_block(payload.clone()).await.unwrap();
        node.handle_block(payload).await.unwrap();
        assert_eq!(node.chain.get_best_height().unwrap(), 1);
        assert_eq!(node.chain.get_block_hashes().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_peer_is_pruned() {
        let (node, _) = test_node("4009", None);
        {
            let mut nodes = node.known_nodes.lock().await;
            nodes.push("localhost:1".to_string());
        }
        node.send_get_blocks("localhost:1").await;
        let nodes = node.known_nodes.lock().await;
        assert!(!nodes.contains(&"localhost:1".to_string()));
    }
}
