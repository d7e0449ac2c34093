use crate::core::Transaction;
use data_encoding::HEXLOWER;
use std::collections::HashMap;
use std::sync::RwLock;

/// Transactions received from the network but not yet mined into a block,
/// keyed by hex transaction id. Shared across connection handlers and the
/// miner, so every access goes through the lock. Not persisted; a restart
/// starts empty.
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, tx: Transaction) {
        if let Ok(mut pool) = self.inner.write() {
            pool.insert(HEXLOWER.encode(tx.get_id()), tx);
        } else {
            log::error!("Memory pool lock poisoned on add");
        }
    }

    pub fn get(&self, txid_hex: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.get(txid_hex).cloned(),
            Err(_) => {
                log::error!("Memory pool lock poisoned on get");
                None
            }
        }
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(txid_hex),
            Err(_) => {
                log::error!("Memory pool lock poisoned on contains");
                false
            }
        }
    }

    pub fn remove(&self, txid_hex: &str) {
        if let Ok(mut pool) = self.inner.write() {
            pool.remove(txid_hex);
        } else {
            log::error!("Memory pool lock poisoned on remove");
        }
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.values().cloned().collect(),
            Err(_) => {
                log::error!("Memory pool lock poisoned on get_all");
                Vec::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Memory pool lock poisoned on len");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Block hashes announced by a peer and not yet downloaded. The sync loop
/// requests them one at a time, dropping each hash once requested.
pub struct BlockInTransit {
    inner: RwLock<Vec<Vec<u8>>>,
}

impl Default for BlockInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn add_blocks(&self, hashes: &[Vec<u8>]) {
        if let Ok(mut inner) = self.inner.write() {
            for hash in hashes {
                inner.push(hash.clone());
            }
        } else {
            log::error!("Blocks-in-transit lock poisoned on add_blocks");
        }
    }

    pub fn first(&self) -> Option<Vec<u8>> {
        match self.inner.read() {
            Ok(inner) => inner.first().cloned(),
            Err(_) => {
                log::error!("Blocks-in-transit lock poisoned on first");
                None
            }
        }
    }

    pub fn remove(&self, block_hash: &[u8]) {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(idx) = inner.iter().position(|h| h.as_slice() == block_hash) {
                inner.remove(idx);
            }
        } else {
            log::error!("Blocks-in-transit lock poisoned on remove");
        }
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.clear();
        } else {
            log::error!("Blocks-in-transit lock poisoned on clear");
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.len(),
            Err(_) => {
                log::error!("Blocks-in-transit lock poisoned on len");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_add_get_remove() {
        let pool = MemoryPool::new();
        let tx = Transaction::new_coinbase_tx("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "").unwrap();
        let txid_hex = HEXLOWER.encode(tx.get_id());

        assert!(pool.is_empty());
        pool.add(tx);
        assert!(pool.contains(&txid_hex));
        assert_eq!(pool.len(), 1);
        assert!(pool.get(&txid_hex).is_some());

        pool.remove(&txid_hex);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_transit_queue_order_and_removal() {
        let transit = BlockInTransit::new();
        transit.add_blocks(&[b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);

        assert_eq!(transit.first(), Some(b"aa".to_vec()));
        transit.remove(b"aa");
        assert_eq!(transit.first(), Some(b"bb".to_vec()));
        assert_eq!(transit.len(), 2);

        transit.clear();
        assert!(transit.is_empty());
    }
}
