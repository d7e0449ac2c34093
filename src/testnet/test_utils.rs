//! Test fixtures shared by the unit tests.

use crate::core::{Blockchain, ProofOfWork, Transaction};
use crate::error::Result;
use crate::wallet::Wallet;
use tempfile::TempDir;

/// A fresh ledger in a temporary directory, genesis reward paid to a new
/// wallet. The TempDir must be kept alive for the ledger's lifetime.
pub fn create_test_blockchain() -> Result<(Blockchain, Wallet, TempDir)> {
    let temp_dir = tempfile::tempdir().map_err(|e| crate::error::LedgerError::Io(e.to_string()))?;
    let wallet = Wallet::new()?;
    let db_path = temp_dir.path().join("chain");
    let blockchain = Blockchain::create_blockchain_with_path(
        &wallet.get_address(),
        db_path.to_str().expect("temp path is valid utf-8"),
    )?;
    Ok((blockchain, wallet, temp_dir))
}

/// Mine one block holding a coinbase for the given address.
pub fn mine_empty_block(blockchain: &Blockchain, reward_address: &str) -> Result<()> {
    let coinbase_tx = Transaction::new_coinbase_tx(reward_address, "")?;
    blockchain.mine_block(&[coinbase_tx])?;
    Ok(())
}

/// Walk the chain from tip to genesis checking linkage, height steps, and
/// proof-of-work on every block.
pub fn validate_chain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let mut expected_hash: Option<String> = None;
    let mut expected_height: Option<usize> = None;

    for block in blockchain.iterator() {
        if let Some(hash) = expected_hash {
            if hash != block.get_hash() {
                return Ok(false);
            }
        }
        if let Some(height) = expected_height {
            if block.get_height() != height {
                return Ok(false);
            }
        }
        if !ProofOfWork::validate(&block) {
            return Ok(false);
        }

        expected_hash = Some(block.get_pre_block_hash());
        expected_height = block.get_height().checked_sub(1);

        if block.is_genesis() {
            return Ok(block.get_height() == 0);
        }
    }
    // The walk must end by reaching genesis, not by a dangling link.
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_chain_is_a_valid_singleton() {
        let (blockchain, _, _tmp) = create_test_blockchain().unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert!(validate_chain_integrity(&blockchain).unwrap());
    }

    #[test]
    fn test_mining_extends_the_chain() {
        let (blockchain, wallet, _tmp) = create_test_blockchain().unwrap();
        mine_empty_block(&blockchain, &wallet.get_address()).unwrap();
        mine_empty_block(&blockchain, &wallet.get_address()).unwrap();

        assert_eq!(blockchain.get_best_height().unwrap(), 2);
        assert!(validate_chain_integrity(&blockchain).unwrap());
    }

    #[test]
    fn test_create_twice_at_same_path_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wallet = Wallet::new().unwrap();
        let db_path = temp_dir.path().join("chain");
        let path = db_path.to_str().unwrap();

        let first = Blockchain::create_blockchain_with_path(&wallet.get_address(), path).unwrap();
        drop(first);
        assert!(Blockchain::create_blockchain_with_path(&wallet.get_address(), path).is_err());
    }

    #[test]
    fn test_open_missing_chain_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nothing-here");
        assert!(Blockchain::new_blockchain_with_path(db_path.to_str().unwrap()).is_err());
    }
}
