// Command-line surface

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::consensus::pow::ProofOfWork;
use crate::core::Transaction;
use crate::network::{self, Node, CENTRAL_NODE};
use crate::storage::{Blockchain, UtxoSet};
use crate::wallet::{self, Wallets};
use crate::{Error, Result};

#[derive(Parser)]
#[command(name = "tinycoin")]
#[command(about = "A small proof-of-work cryptocurrency node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a blockchain and send the genesis reward to an address
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Get the balance for an address
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Print the blocks in the chain
    PrintChain,

    /// Send coins; with --mine the sending node mines the block itself
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        mine: bool,
    },

    /// Create a new wallet
    CreateWallet,

    /// List the addresses in the wallet file
    ListAddresses,

    /// Rebuild the unspent transaction outputs set
    ReindexUtxo,

    /// Start a node; --miner enables mining to the given address
    StartNode {
        #[arg(long)]
        miner: Option<String>,
    },
}

/// Dispatch a parsed command. Every command needs NODE_ID to locate the
/// node's store and wallet file.
pub fn run(cli: Cli) -> Result<()> {
    let node_id = std::env::var("NODE_ID").map_err(|_| Error::NodeIdUnset)?;

    match cli.command {
        Command::CreateBlockchain { address } => create_blockchain(&address, &node_id),
        Command::GetBalance { address } => get_balance(&address, &node_id),
        Command::PrintChain => print_chain(&node_id),
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => send(&from, &to, amount, mine, &node_id),
        Command::CreateWallet => create_wallet(&node_id),
        Command::ListAddresses => list_addresses(&node_id),
        Command::ReindexUtxo => reindex_utxo(&node_id),
        Command::StartNode { miner } => start_node(&node_id, miner),
    }
}

fn require_valid(address: &str) -> Result<()> {
    if !wallet::validate_address(address) {
        return Err(Error::InvalidAddress(address.to_string()));
    }
    Ok(())
}

fn create_blockchain(address: &str, node_id: &str) -> Result<()> {
    require_valid(address)?;
    let chain = Blockchain::init(address, node_id)?;
    let utxo = UtxoSet { chain: &chain };
    utxo.reindex()?;
    println!("Blockchain created, genesis reward sent to {address}");
    Ok(())
}

fn get_balance(address: &str, node_id: &str) -> Result<()> {
    let pubkey_hash = wallet::pubkey_hash_from_address(address)?;
    let chain = Blockchain::resume(node_id)?;
    let utxo = UtxoSet { chain: &chain };

    let balance: u64 = utxo
        .find_unspent_outputs(&pubkey_hash)?
        .iter()
        .map(|output| output.value)
        .sum();
    println!("Balance of {address}: {balance}");
    Ok(())
}

fn print_chain(node_id: &str) -> Result<()> {
    let chain = Blockchain::resume(node_id)?;
    for block in chain.iter()? {
        let block = block?;
        println!();
        println!("Previous Hash {}", hex::encode(&block.prev_hash));
        println!("Hash          {}", hex::encode(&block.hash));
        println!("Height        {}", block.height);
        println!("PoW           {}", ProofOfWork::new(&block).validate());
        for tx in &block.transactions {
            print!("{tx}");
        }
    }
    println!();
    Ok(())
}

fn send(from: &str, to: &str, amount: u64, mine: bool, node_id: &str) -> Result<()> {
    require_valid(from)?;
    require_valid(to)?;

    let chain = Blockchain::resume(node_id)?;
    let utxo = UtxoSet { chain: &chain };
    let wallets = Wallets::load(node_id)?;
    let sender = wallets
        .get(from)
        .ok_or_else(|| Error::UnknownWallet(from.to_string()))?;

    let tx = wallet::new_transaction(sender, to, amount, &utxo)?;
    if mine {
        let coinbase = Transaction::coinbase(from, "")?;
        let block = chain.mine_block(vec![coinbase, tx])?;
        utxo.update(&block)?;
        println!("Mined block {}", hex::encode(&block.hash));
    } else {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(network::send_transaction(CENTRAL_NODE, &tx))?;
        println!("Transaction sent to {CENTRAL_NODE}");
    }
    println!("Success!");
    Ok(())
}

fn create_wallet(node_id: &str) -> Result<()> {
    let mut wallets = Wallets::load(node_id)?;
    let address = wallets.add_wallet();
    wallets.save(node_id)?;
    println!("New address: {address}");
    Ok(())
}

fn list_addresses(node_id: &str) -> Result<()> {
    let wallets = Wallets::load(node_id)?;
    for address in wallets.addresses() {
        println!("{address}");
    }
    Ok(())
}

fn reindex_utxo(node_id: &str) -> Result<()> {
    let chain = Blockchain::resume(node_id)?;
    let utxo = UtxoSet { chain: &chain };
    utxo.reindex()?;
    let count = utxo.count_transactions()?;
    println!("Done! There are {count} transactions in the unspent outputs set.");
    Ok(())
}

fn start_node(node_id: &str, miner: Option<String>) -> Result<()> {
    println!("Starting node {node_id}");
    if let Some(address) = &miner {
        require_valid(address)?;
        println!("Mining is on, rewards go to {address}");
    }
    let chain = Blockchain::resume(node_id)?;
    let node = Arc::new(Node::new(node_id, miner, chain));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(node.run())
}
