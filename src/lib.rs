//! # Emberchain
//!
//! A minimal UTXO cryptocurrency ledger: hash-linked blocks sealed by
//! fixed-difficulty proof-of-work, ECDSA P-256 signed transfers, a sled
//! database underneath, and a small TCP gossip protocol that lets
//! independent nodes converge on the highest chain.
//!
//! Layout:
//! - `core/`: blocks, the chain, merkle digests, mining, transactions
//! - `storage/`: the UTXO index, the mempool, the block download queue
//! - `network/`: known peers and the message-handling node server
//! - `wallet/`: key pairs, addresses, the on-disk wallet file
//! - `config/`, `cli/`, `utils/`, `error/`: the surrounding plumbing

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

pub use crate::cli::{Command, Opt};
pub use crate::config::{Config, GLOBAL_CONFIG};
pub use crate::core::{
    merkle_root, Block, Blockchain, BlockchainIterator, ProofOfWork, TXInput, TXOutput,
    Transaction, SUBSIDY, TARGET_BITS,
};
pub use crate::error::{LedgerError, Result};
pub use crate::network::{send_tx, Node, Nodes, Server, ServerContext, CENTRAL_NODE};
pub use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use crate::utils::{base58_decode, base58_encode, sha256_digest};
pub use crate::wallet::{
    convert_address, hash_pub_key, validate_address, Wallet, Wallets, ADDRESS_CHECK_SUM_LEN,
};
