// The on-disk wallet collection. One file holds every key pair this node
// controls, keyed by address.

use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::env::current_dir;
use std::fs;
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    file_path: PathBuf,
}

impl Wallets {
    /// Load the wallet collection from `wallet.dat` in the working
    /// directory, starting empty when the file does not exist yet.
    pub fn new() -> Result<Wallets> {
        let path = current_dir()?.join(WALLET_FILE);
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Wallets> {
        let mut wallets = Wallets {
            wallets: HashMap::new(),
            file_path: path.to_path_buf(),
        };
        wallets.load_from_file()?;
        Ok(wallets)
    }

    /// Generate a key pair, remember it under its address, and persist the
    /// collection.
    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn load_from_file(&mut self) -> Result<()> {
        if !self.file_path.exists() {
            return Ok(());
        }
        let bytes = fs::read(&self.file_path)
            .map_err(|e| LedgerError::Wallet(format!("Failed to read wallet file: {e}")))?;
        self.wallets = deserialize(&bytes)?;
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        let bytes = serialize(&self.wallets)?;
        fs::write(&self.file_path, bytes)
            .map_err(|e| LedgerError::Wallet(format!("Failed to write wallet file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wallets_persist_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);

        let mut wallets = Wallets::from_file(&path).unwrap();
        let address = wallets.create_wallet().unwrap();

        let reloaded = Wallets::from_file(&path).unwrap();
        assert!(reloaded.get_wallet(&address).is_some());
        assert_eq!(reloaded.get_addresses(), vec![address]);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::from_file(&dir.path().join(WALLET_FILE)).unwrap();
        assert!(wallets.get_addresses().is_empty());
    }
}
