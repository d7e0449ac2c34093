//! Peer-to-peer synchronization: the known-node registry and the message
//! handling server that keeps independent nodes converging on one chain.

pub mod node;
pub mod server;

pub use node::{Node, Nodes};
pub use server::{send_tx, Server, ServerContext, CENTRAL_NODE, TRANSACTION_THRESHOLD};
