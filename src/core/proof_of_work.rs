// Proof-of-work engine with a fixed difficulty. The target never moves:
// a block hash is acceptable when, read as a big-endian unsigned integer,
// it falls below 2^(256 - TARGET_BITS).

use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::info;
use num_bigint::{BigInt, Sign};

/// Leading zero bits a sealed block hash must carry.
pub const TARGET_BITS: u32 = 16;

const MAX_NONCE: i64 = i64::MAX;

pub struct ProofOfWork {
    block: Block,
    target: BigInt,
    // The merkle root is fixed for the life of one engine instance, so it is
    // computed once here instead of on every nonce attempt.
    merkle_root: Vec<u8>,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: Block) -> Result<ProofOfWork> {
        let mut target = BigInt::from(1);
        target <<= 256 - TARGET_BITS;
        let merkle_root = block.hash_transactions()?;
        Ok(ProofOfWork {
            block,
            target,
            merkle_root,
        })
    }

    /// Recompute the hash from the block's stored nonce and check it against
    /// the target. Deterministic, side-effect free, never errors: a block
    /// whose contents cannot even be serialized is simply not valid.
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block.clone()) {
            Ok(pow) => pow,
            Err(_) => return false,
        };
        let hash = sha256_digest(&pow.prepare_data(block.get_nonce()));
        let hash_int = BigInt::from_bytes_be(Sign::Plus, &hash);
        hash_int < pow.target
    }

    // The hash preimage: prev_hash, merkle root, timestamp, target bits,
    // nonce, in that order, integers big-endian.
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(self.block.get_pre_block_hash().as_bytes());
        data.extend(self.merkle_root.as_slice());
        data.extend(self.block.get_timestamp().to_be_bytes());
        data.extend(TARGET_BITS.to_be_bytes());
        data.extend(nonce.to_be_bytes());
        data
    }

    /// Search the nonce space from zero until a hash below the target is
    /// found. This is the one long-running CPU-bound loop in the ledger.
    pub fn run(&self) -> Result<(i64, String)> {
        let mut nonce = 0;
        info!(
            "Mining a block with {} transactions",
            self.block.get_transactions().len()
        );
        while nonce < MAX_NONCE {
            let hash = sha256_digest(&self.prepare_data(nonce));
            let hash_int = BigInt::from_bytes_be(Sign::Plus, &hash);
            if hash_int < self.target {
                let hash_hex = HEXLOWER.encode(&hash);
                info!("Sealed block {hash_hex} at nonce {nonce}");
                return Ok((nonce, hash_hex));
            }
            nonce += 1;
        }
        Err(LedgerError::Mining(
            "Exhausted the nonce space without finding a solution".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn sealed_block() -> Block {
        let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS, "").unwrap();
        Block::new_block(String::new(), &[coinbase], 0).unwrap()
    }

    #[test]
    fn test_sealed_block_validates() {
        let block = sealed_block();
        assert!(ProofOfWork::validate(&block));
    }

    #[test]
    fn test_target_has_expected_magnitude() {
        let block = sealed_block();
        let pow = ProofOfWork::new_proof_of_work(block).unwrap();
        let mut expected = BigInt::from(1);
        expected <<= 256 - TARGET_BITS;
        assert_eq!(pow.target, expected);
    }

    #[test]
    fn test_prepare_data_varies_with_nonce() {
        let block = sealed_block();
        let pow = ProofOfWork::new_proof_of_work(block).unwrap();
        assert_eq!(pow.prepare_data(11), pow.prepare_data(11));
        assert_ne!(pow.prepare_data(11), pow.prepare_data(12));
    }

    #[test]
    fn test_tampered_transactions_fail_validation() {
        let block = sealed_block();
        let extra = Transaction::new_coinbase_tx(TEST_ADDRESS, "second").unwrap();
        let mut transactions = block.get_transactions().to_vec();
        transactions.push(extra);
        let forged = Block::new_unsealed_block(
            block.get_timestamp(),
            block.get_pre_block_hash(),
            &transactions,
            block.get_height(),
            block.get_nonce(),
            block.get_hash().to_string(),
        );
        assert!(!ProofOfWork::validate(&forged));
    }
}
