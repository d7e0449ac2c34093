// The UTXO index: a rebuildable cache over the chain, mapping transaction
// id to the outputs of that transaction not yet spent. Entries keep the
// original output index next to each output so spends remove exactly the
// output they reference, regardless of how many earlier outputs are gone.

use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use sled::Tree;
use std::collections::HashMap;

const UTXO_TREE: &str = "chainstate";

pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn open_utxo_tree(&self) -> Result<Tree> {
        self.blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open UTXO tree: {e}")))
    }

    /// Accumulate outputs locked to `pub_key_hash` until the requested
    /// amount is covered or the index runs dry. Returns whatever was
    /// gathered either way; the caller decides whether a shortfall is an
    /// error.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let mut spendable: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0;
        let utxo_tree = self.open_utxo_tree()?;

        for item in utxo_tree.iter() {
            let (k, v) = item
                .map_err(|e| LedgerError::Database(format!("Failed to scan UTXO tree: {e}")))?;
            let outs: Vec<(usize, TXOutput)> = deserialize(v.as_ref())?;

            for (out_index, out) in outs {
                if accumulated >= amount {
                    return Ok((accumulated, spendable));
                }
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated += out.get_value();
                    spendable
                        .entry(HEXLOWER.encode(k.as_ref()))
                        .or_default()
                        .push(out_index);
                }
            }
        }
        Ok((accumulated, spendable))
    }

    /// Every output currently locked to the given key hash, for balance
    /// queries.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let utxo_tree = self.open_utxo_tree()?;
        let mut utxos = vec![];

        for item in utxo_tree.iter() {
            let (_, v) = item
                .map_err(|e| LedgerError::Database(format!("Failed to scan UTXO tree: {e}")))?;
            let outs: Vec<(usize, TXOutput)> = deserialize(v.as_ref())?;
            for (_, out) in outs {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.push(out);
                }
            }
        }
        Ok(utxos)
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<u64> {
        let utxo_tree = self.open_utxo_tree()?;
        let mut counter = 0;
        for item in utxo_tree.iter() {
            item.map_err(|e| LedgerError::Database(format!("Failed to scan UTXO tree: {e}")))?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Throw the whole index away and rebuild it from a full chain scan.
    /// This is the startup and post-sync path, never the per-block one.
    pub fn reindex(&self) -> Result<()> {
        let utxo_tree = self.open_utxo_tree()?;
        utxo_tree
            .clear()
            .map_err(|e| LedgerError::Database(format!("Failed to clear UTXO tree: {e}")))?;

        for (txid_hex, outs) in self.blockchain.find_utxo() {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                LedgerError::Serialization(format!("Invalid transaction id key: {e}"))
            })?;
            utxo_tree
                .insert(txid.as_slice(), serialize(&outs)?)
                .map_err(|e| LedgerError::Database(format!("Failed to insert UTXO entry: {e}")))?;
        }
        Ok(())
    }

    /// Fold one appended block into the index: spent outputs leave their
    /// entries, each transaction's own outputs arrive as a fresh entry.
    /// The result must match what `reindex` would build for the grown
    /// chain.
    pub fn update(&self, block: &Block) -> Result<()> {
        let utxo_tree = self.open_utxo_tree()?;

        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let entry = utxo_tree
                        .get(vin.get_txid())
                        .map_err(|e| {
                            LedgerError::Database(format!("Failed to read UTXO entry: {e}"))
                        })?
                        .ok_or_else(|| {
                            LedgerError::NotFound(format!(
                                "UTXO entry for transaction {}",
                                HEXLOWER.encode(vin.get_txid())
                            ))
                        })?;

                    let outs: Vec<(usize, TXOutput)> = deserialize(entry.as_ref())?;
                    let remaining: Vec<(usize, TXOutput)> = outs
                        .into_iter()
                        .filter(|(out_index, _)| *out_index as i32 != vin.get_vout())
                        .collect();

                    if remaining.is_empty() {
                        utxo_tree.remove(vin.get_txid()).map_err(|e| {
                            LedgerError::Database(format!("Failed to remove UTXO entry: {e}"))
                        })?;
                    } else {
                        utxo_tree
                            .insert(vin.get_txid(), serialize(&remaining)?)
                            .map_err(|e| {
                                LedgerError::Database(format!("Failed to rewrite UTXO entry: {e}"))
                            })?;
                    }
                }
            }

            let fresh: Vec<(usize, TXOutput)> =
                tx.get_vout().iter().cloned().enumerate().collect();
            utxo_tree
                .insert(tx.get_id(), serialize(&fresh)?)
                .map_err(|e| {
                    LedgerError::Database(format!("Failed to insert UTXO entry: {e}"))
                })?;
        }
        Ok(())
    }
}
