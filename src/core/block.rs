// A block is sealed once by the proof-of-work engine and never mutated
// afterwards. The genesis block is the one whose previous-hash link is the
// empty string.

use crate::core::{merkle, ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: String,
    hash: String,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
}

impl Block {
    /// Assemble a block at the given height and run the proof-of-work
    /// search to seal it. A block must carry at least one transaction.
    pub fn new_block(
        pre_block_hash: String,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(LedgerError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: String::new(),
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
        };

        let pow = ProofOfWork::new_proof_of_work(block.clone())?;
        let (nonce, hash) = pow.run()?;
        block.nonce = nonce;
        block.hash = hash;

        Ok(block)
    }

    pub fn generate_genesis_block(coinbase: &Transaction) -> Result<Block> {
        Block::new_block(String::new(), &[coinbase.clone()], 0)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    /// Merkle root over the canonical serialization of this block's
    /// transactions, in block order.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let mut serialized_txs = Vec::with_capacity(self.transactions.len());
        for transaction in &self.transactions {
            serialized_txs.push(transaction.serialize()?);
        }
        merkle::merkle_root(&serialized_txs)
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> String {
        self.pre_block_hash.clone()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_hash_bytes(&self) -> Vec<u8> {
        self.hash.as_bytes().to_vec()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    /// Build a block with caller-chosen fields and no proof-of-work search,
    /// for tests that need structurally arbitrary blocks.
    #[cfg(test)]
    pub fn new_unsealed_block(
        timestamp: i64,
        pre_block_hash: String,
        transactions: &[Transaction],
        height: usize,
        nonce: i64,
        hash: String,
    ) -> Block {
        Block {
            timestamp,
            pre_block_hash,
            hash,
            transactions: transactions.to_vec(),
            nonce,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    #[test]
    fn test_empty_transaction_list_is_rejected() {
        assert!(Block::new_block(String::new(), &[], 0).is_err());
    }

    #[test]
    fn test_genesis_block_has_empty_previous_hash() {
        let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS, "").unwrap();
        let genesis = Block::generate_genesis_block(&coinbase).unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.get_height(), 0);
        assert!(!genesis.get_hash().is_empty());
    }

    #[test]
    fn test_serialization_round_trip() {
        let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS, "").unwrap();
        let block = Block::generate_genesis_block(&coinbase).unwrap();

        let bytes = block.serialize().unwrap();
        let restored = Block::deserialize(&bytes).unwrap();

        assert_eq!(block.get_hash(), restored.get_hash());
        assert_eq!(block.get_height(), restored.get_height());
        assert_eq!(block.get_timestamp(), restored.get_timestamp());
        assert_eq!(block.get_nonce(), restored.get_nonce());
    }

    #[test]
    fn test_transaction_digest_tracks_order() {
        let a = Transaction::new_coinbase_tx(TEST_ADDRESS, "a").unwrap();
        let b = Transaction::new_coinbase_tx(TEST_ADDRESS, "b").unwrap();

        let forward = Block::new_unsealed_block(0, String::new(), &[a.clone(), b.clone()], 0, 0, String::new());
        let backward = Block::new_unsealed_block(0, String::new(), &[b, a], 0, 0, String::new());

        assert_ne!(
            forward.hash_transactions().unwrap(),
            backward.hash_transactions().unwrap()
        );
    }
}
