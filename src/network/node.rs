use std::sync::RwLock;

/// One known peer, stored by its listen address.
#[derive(Clone)]
pub struct Node {
    addr: String,
}

impl Node {
    fn new(addr: String) -> Node {
        Node { addr }
    }

    pub fn get_addr(&self) -> String {
        self.addr.clone()
    }
}

/// The peer registry. Addresses arrive from `version` and `addr` messages
/// and leave when sending to them fails; insertion order is preserved and
/// duplicates are ignored.
pub struct Nodes {
    inner: RwLock<Vec<Node>>,
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn add_node(&self, addr: String) {
        let mut inner = self.inner.write().expect("nodes lock poisoned");
        if !inner.iter().any(|node| node.get_addr() == addr) {
            inner.push(Node::new(addr));
        }
    }

    pub fn evict_node(&self, addr: &str) {
        let mut inner = self.inner.write().expect("nodes lock poisoned");
        if let Some(idx) = inner.iter().position(|node| node.get_addr() == addr) {
            inner.remove(idx);
        }
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        self.inner
            .read()
            .expect("nodes lock poisoned")
            .iter()
            .any(|node| node.get_addr() == addr)
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        self.inner.read().expect("nodes lock poisoned").to_vec()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("nodes lock poisoned")
            .iter()
            .map(|node| node.get_addr())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("nodes lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
