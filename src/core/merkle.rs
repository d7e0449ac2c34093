// Merkle digest over a block's transaction list. The leaves are SHA-256
// hashes of each transaction's canonical serialized bytes, so transaction
// order is part of the resulting root and therefore of the block identity.

use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;

/// Collapse an ordered list of serialized transactions into a single
/// 32-byte root. A level with an odd number of nodes duplicates its last
/// node before pairing; a single-leaf list is its own tree and the root is
/// that leaf's hash.
pub fn merkle_root(serialized_txs: &[Vec<u8>]) -> Result<Vec<u8>> {
    if serialized_txs.is_empty() {
        return Err(LedgerError::InvalidBlock(
            "Cannot build a merkle tree without transactions".to_string(),
        ));
    }

    let mut level: Vec<Vec<u8>> = serialized_txs
        .iter()
        .map(|bytes| sha256_digest(bytes))
        .collect();

    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1].clone();
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| {
                let mut joined = pair[0].clone();
                joined.extend_from_slice(&pair[1]);
                sha256_digest(&joined)
            })
            .collect();
    }

    Ok(level.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("tx-{i}").into_bytes()).collect()
    }

    #[test]
    fn test_empty_list_is_rejected() {
        assert!(merkle_root(&[]).is_err());
    }

    #[test]
    fn test_single_leaf_root_is_the_leaf_hash() {
        let data = leaves(1);
        let root = merkle_root(&data).unwrap();
        assert_eq!(root, sha256_digest(&data[0]));
    }

    #[test]
    fn test_root_is_deterministic() {
        let data = leaves(5);
        assert_eq!(merkle_root(&data).unwrap(), merkle_root(&data).unwrap());
    }

    #[test]
    fn test_root_is_sensitive_to_any_byte() {
        let data = leaves(4);
        let mut tampered = data.clone();
        tampered[2][0] ^= 0x01;
        assert_ne!(merkle_root(&data).unwrap(), merkle_root(&tampered).unwrap());
    }

    #[test]
    fn test_root_is_sensitive_to_order() {
        let data = leaves(4);
        let mut reordered = data.clone();
        reordered.swap(0, 3);
        assert_ne!(
            merkle_root(&data).unwrap(),
            merkle_root(&reordered).unwrap()
        );
    }

    #[test]
    fn test_odd_count_duplicates_last_leaf() {
        // Three leaves hash like four leaves where the fourth equals the third.
        let three = leaves(3);
        let mut four = three.clone();
        four.push(three[2].clone());
        assert_eq!(merkle_root(&three).unwrap(), merkle_root(&four).unwrap());
    }

    #[test]
    fn test_root_has_digest_width() {
        for n in 1..=8 {
            assert_eq!(merkle_root(&leaves(n)).unwrap().len(), 32);
        }
    }
}
