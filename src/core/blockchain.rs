// The ledger: a hash-linked chain of blocks persisted in sled. Blocks live
// in one tree keyed by block hash, with a single reserved key holding the
// hash of the current tip. The UTXO index in storage/ is derived from this
// chain and never the other way around.

use crate::core::{Block, ProofOfWork, TXOutput, Transaction};
use crate::error::{LedgerError, Result};
use data_encoding::HEXLOWER;
use log::info;
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::env::current_dir;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const BLOCKS_TREE: &str = "blocks";

#[derive(Clone)]
pub struct Blockchain {
    // Multiple connection handlers and the miner read or advance the tip
    // concurrently, so it lives behind a shared lock.
    tip_hash: Arc<RwLock<String>>,
    db: Db,
}

impl Blockchain {
    /// Create a fresh ledger at the default path, seeding it with a genesis
    /// block whose coinbase pays `genesis_address`. Fails when a ledger
    /// already exists there.
    pub fn create_blockchain(genesis_address: &str) -> Result<Blockchain> {
        Self::create_blockchain_with_path(genesis_address, &Self::default_db_path()?)
    }

    /// Open the ledger at the default path. Fails when none exists.
    pub fn new_blockchain() -> Result<Blockchain> {
        Self::new_blockchain_with_path(&Self::default_db_path()?)
    }

    pub fn create_blockchain_with_node_id(
        genesis_address: &str,
        node_id: &str,
    ) -> Result<Blockchain> {
        Self::create_blockchain_with_path(genesis_address, &Self::node_db_path(node_id)?)
    }

    pub fn new_blockchain_with_node_id(node_id: &str) -> Result<Blockchain> {
        Self::new_blockchain_with_path(&Self::node_db_path(node_id)?)
    }

    fn default_db_path() -> Result<String> {
        Ok(current_dir()?.join("data").to_string_lossy().to_string())
    }

    // Each node gets its own database directory so several nodes can share
    // one machine.
    fn node_db_path(node_id: &str) -> Result<String> {
        Ok(current_dir()?
            .join("data")
            .join(format!("node_{node_id}"))
            .to_string_lossy()
            .to_string())
    }

    pub fn create_blockchain_with_path(genesis_address: &str, db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = sled::open(&path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = Self::open_blocks_tree(&db)?;

        if blocks_tree
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| LedgerError::Database(format!("Failed to read tip hash: {e}")))?
            .is_some()
        {
            return Err(LedgerError::Database(format!(
                "A blockchain already exists at {db_path}"
            )));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, "")?;
        let genesis = Block::generate_genesis_block(&coinbase_tx)?;
        Self::update_blocks_tree(&blocks_tree, &genesis)?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_string())),
            db,
        })
    }

    pub fn new_blockchain_with_path(db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = sled::open(&path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = Self::open_blocks_tree(&db)?;

        let tip_bytes = blocks_tree
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| LedgerError::Database(format!("Failed to read tip hash: {e}")))?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("blockchain at {db_path}, create one first"))
            })?;

        let tip_hash = String::from_utf8(tip_bytes.to_vec())
            .map_err(|e| LedgerError::Database(format!("Invalid tip hash bytes: {e}")))?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
        })
    }

    fn open_blocks_tree(db: &Db) -> Result<Tree> {
        db.open_tree(BLOCKS_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open blocks tree: {e}")))
    }

    // Store a block and move the tip to it unconditionally. Only used for
    // blocks this node produced itself, which always extend the local tip.
    fn update_blocks_tree(blocks_tree: &Tree, block: &Block) -> Result<()> {
        let block_data = block.serialize()?;
        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block.get_hash(), block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                LedgerError::Database(format!("Failed to store block: {e}"))
            })?;
        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_tip_hash(&self) -> String {
        self.tip_hash
            .read()
            .expect("tip hash lock poisoned")
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &str) {
        let mut tip_hash = self.tip_hash.write().expect("tip hash lock poisoned");
        *tip_hash = String::from(new_tip_hash);
    }

    /// Verify the pending transactions, seal them into a block on top of
    /// the current tip, and append it. Any invalid transaction aborts the
    /// whole attempt before anything is written.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        for (i, transaction) in transactions.iter().enumerate() {
            if !self.verify_transaction(transaction)? {
                return Err(LedgerError::Transaction(format!(
                    "Invalid transaction at index {i}"
                )));
            }
        }
        self.check_for_double_spending(transactions)?;

        let best_height = self.get_best_height()?;
        let block = Block::new_block(self.get_tip_hash(), transactions, best_height + 1)?;

        let blocks_tree = Self::open_blocks_tree(&self.db)?;
        Self::update_blocks_tree(&blocks_tree, &block)?;
        self.set_tip_hash(block.get_hash());

        info!(
            "Mined block {} at height {}",
            block.get_hash(),
            block.get_height()
        );
        Ok(block)
    }

    // Two transactions in one candidate block must not spend the same
    // output.
    fn check_for_double_spending(&self, transactions: &[Transaction]) -> Result<()> {
        let mut spent_outputs: HashSet<(Vec<u8>, i32)> = HashSet::new();
        for transaction in transactions {
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                let reference = (input.get_txid().to_vec(), input.get_vout());
                if !spent_outputs.insert(reference) {
                    return Err(LedgerError::Transaction(format!(
                        "Output {}:{} spent twice within one block",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Append a block received from a peer. Known hashes are an idempotent
    /// no-op. The proof-of-work is checked before the block is considered
    /// at all; the tip only moves when the new height strictly exceeds the
    /// current one.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let blocks_tree = Self::open_blocks_tree(&self.db)?;

        if blocks_tree
            .get(block.get_hash())
            .map_err(|e| LedgerError::Database(format!("Failed to check block existence: {e}")))?
            .is_some()
        {
            return Ok(());
        }

        if !ProofOfWork::validate(block) {
            return Err(LedgerError::InvalidBlock(format!(
                "Proof-of-work check failed for block {}",
                block.get_hash()
            )));
        }

        let best_height = self.get_best_height()?;
        let block_data = block.serialize()?;
        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block.get_hash(), block_data.as_slice())?;
                if block.get_height() > best_height {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                LedgerError::Database(format!("Failed to store block: {e}"))
            })?;

        if block.get_height() > best_height {
            self.set_tip_hash(block.get_hash());
            info!(
                "Tip advanced to {} at height {}",
                block.get_hash(),
                block.get_height()
            );
        }
        Ok(())
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let tip_hash = self.get_tip_hash();
        let tip_block = self
            .get_block(&tip_hash)?
            .ok_or_else(|| LedgerError::NotFound(format!("tip block {tip_hash}")))?;
        Ok(tip_block.get_height())
    }

    pub fn get_block(&self, block_hash: &str) -> Result<Option<Block>> {
        let blocks_tree = Self::open_blocks_tree(&self.db)?;
        match blocks_tree
            .get(block_hash)
            .map_err(|e| LedgerError::Database(format!("Failed to read block: {e}")))?
        {
            Some(block_bytes) => Ok(Some(Block::deserialize(block_bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Every block hash on the canonical chain, tip first.
    pub fn get_block_hashes(&self) -> Vec<Vec<u8>> {
        self.iterator().map(|block| block.get_hash_bytes()).collect()
    }

    /// Walk back from the tip until the transaction shows up; `None` once
    /// the genesis block has been searched too.
    pub fn find_transaction(&self, txid: &[u8]) -> Option<Transaction> {
        for block in self.iterator() {
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Some(transaction.clone());
                }
            }
        }
        None
    }

    /// Full-chain scan producing every output not consumed by any input on
    /// the canonical chain, keyed by hex transaction id with the output
    /// index kept alongside each output. Only the UTXO reindex path calls
    /// this.
    pub fn find_utxo(&self) -> HashMap<String, Vec<(usize, TXOutput)>> {
        let mut utxo: HashMap<String, Vec<(usize, TXOutput)>> = HashMap::new();
        let mut spent_txos: HashMap<String, Vec<i32>> = HashMap::new();

        // Tip-to-genesis order: inputs of later blocks are recorded in
        // spent_txos before the outputs they consume are reached.
        for block in self.iterator() {
            for tx in block.get_transactions() {
                let txid_hex = HEXLOWER.encode(tx.get_id());
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    let already_spent = spent_txos
                        .get(&txid_hex)
                        .is_some_and(|outs| outs.contains(&(idx as i32)));
                    if already_spent {
                        continue;
                    }
                    utxo.entry(txid_hex.clone())
                        .or_default()
                        .push((idx, out.clone()));
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent_txos
                        .entry(HEXLOWER.encode(txin.get_txid()))
                        .or_default()
                        .push(txin.get_vout());
                }
            }
        }
        utxo
    }

    // Resolve the transactions referenced by this one's inputs; absence is
    // a hard error surfaced to sign/verify callers.
    fn resolve_prev_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            let prev_tx = self
                .find_transaction(vin.get_txid())
                .ok_or_else(|| LedgerError::NotFound(format!("previous transaction {txid_hex}")))?;
            prev_txs.insert(txid_hex, prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.resolve_prev_transactions(tx)?;
        tx.sign(pkcs8, &prev_txs)
    }

    /// A transaction is acceptable when none of its inputs are already
    /// consumed on the chain and every signature checks out. Coinbases are
    /// acceptable by definition.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }

        for vin in tx.get_vin() {
            if self.is_output_spent(vin.get_txid(), vin.get_vout()) {
                info!(
                    "Rejecting transaction: output {}:{} is already spent",
                    HEXLOWER.encode(vin.get_txid()),
                    vin.get_vout()
                );
                return Ok(false);
            }
        }

        let prev_txs = self.resolve_prev_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    // Whether any input already on the canonical chain consumes the given
    // output.
    fn is_output_spent(&self, txid: &[u8], vout: i32) -> bool {
        for block in self.iterator() {
            for transaction in block.get_transactions() {
                if transaction.is_coinbase() {
                    continue;
                }
                for input in transaction.get_vin() {
                    if input.get_txid() == txid && input.get_vout() == vout {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Lazy tip-to-genesis cursor. Each advance consumes the current block
    /// and steps to its parent; the walk ends after the genesis block has
    /// been yielded.
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator {
            db: self.db.clone(),
            current_hash: self.get_tip_hash(),
        }
    }
}

pub struct BlockchainIterator {
    db: Db,
    current_hash: String,
}

impl Iterator for BlockchainIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        // The genesis block's empty previous hash never matches a stored
        // key, which terminates the walk.
        let blocks_tree = self.db.open_tree(BLOCKS_TREE).ok()?;
        let data = blocks_tree.get(&self.current_hash).ok()??;
        let block = Block::deserialize(data.as_ref()).ok()?;
        self.current_hash = block.get_pre_block_hash();
        Some(block)
    }
}
