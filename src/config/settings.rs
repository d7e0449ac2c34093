use once_cell::sync::Lazy;
use std::env;
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";

#[derive(Default)]
struct ConfigInner {
    node_addr: String,
    node_id: Option<String>,
    mining_addr: Option<String>,
}

/// Process-wide runtime configuration, seeded from the environment and
/// adjusted by the CLI before the node starts.
pub struct Config {
    inner: RwLock<ConfigInner>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let node_addr = env::var("NODE_ADDRESS").unwrap_or_else(|_| DEFAULT_NODE_ADDR.to_string());
        let node_id = env::var("NODE_ID").ok();

        Config {
            inner: RwLock::new(ConfigInner {
                node_addr,
                node_id,
                mining_addr: None,
            }),
        }
    }

    pub fn get_node_addr(&self) -> String {
        self.inner
            .read()
            .expect("config lock poisoned")
            .node_addr
            .clone()
    }

    pub fn set_node_addr(&self, addr: String) {
        self.inner.write().expect("config lock poisoned").node_addr = addr;
    }

    pub fn get_node_id(&self) -> Option<String> {
        self.inner
            .read()
            .expect("config lock poisoned")
            .node_id
            .clone()
    }

    pub fn set_node_id(&self, node_id: String) {
        self.inner.write().expect("config lock poisoned").node_id = Some(node_id);
    }

    pub fn get_mining_addr(&self) -> Option<String> {
        self.inner
            .read()
            .expect("config lock poisoned")
            .mining_addr
            .clone()
    }

    pub fn set_mining_addr(&self, addr: String) {
        self.inner.write().expect("config lock poisoned").mining_addr = Some(addr);
    }

    /// A node with a configured reward address mines.
    pub fn is_miner(&self) -> bool {
        self.inner
            .read()
            .expect("config lock poisoned")
            .mining_addr
            .is_some()
    }

    /// Derive a node id from the listen address port, for per-node database
    /// isolation ("127.0.0.1:2001" becomes "2001").
    pub fn extract_node_id_from_addr(&self) -> String {
        let addr = self.get_node_addr();
        addr.rsplit(':')
            .next()
            .unwrap_or("default")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mining_addr_toggles_miner_flag() {
        let config = Config::new();
        assert!(!config.is_miner());
        config.set_mining_addr("some-address".to_string());
        assert!(config.is_miner());
        assert_eq!(config.get_mining_addr().as_deref(), Some("some-address"));
    }

    #[test]
    fn test_node_id_from_addr_port() {
        let config = Config::new();
        config.set_node_addr("127.0.0.1:2101".to_string());
        assert_eq!(config.extract_node_id_from_addr(), "2101");
    }
}
