// Peer synchronization over plain TCP. Every message is one short-lived
// connection carrying a binary envelope: a 12-byte zero-padded ASCII
// command tag followed by a JSON payload. The listener thread only
// accepts; each connection is dispatched on its own thread, so a mining
// run triggered by one connection never blocks the next.

use crate::config::GLOBAL_CONFIG;
use crate::core::{Block, Blockchain, Transaction};
use crate::error::{LedgerError, Result};
use crate::network::Nodes;
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const NODE_VERSION: usize = 1;
/// The bootstrap peer every new node contacts first. It also relays
/// transaction announcements instead of mining them itself.
pub const CENTRAL_NODE: &str = "127.0.0.1:2001";
/// Mempool entries required before a miner node attempts a block.
pub const TRANSACTION_THRESHOLD: usize = 2;

pub const COMMAND_LENGTH: usize = 12;
const TCP_WRITE_TIMEOUT: u64 = 5000;
const TCP_READ_TIMEOUT: u64 = 60_000;

const CMD_ADDR: &str = "addr";
const CMD_BLOCK: &str = "block";
const CMD_GET_BLOCKS: &str = "getblocks";
const CMD_GET_DATA: &str = "getdata";
const CMD_INV: &str = "inv";
const CMD_TX: &str = "tx";
const CMD_VERSION: &str = "version";

/// Whether an inventory or data request refers to blocks or transactions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum OpType {
    Block,
    Tx,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddrPayload {
    addr_from: String,
    addr_list: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockPayload {
    addr_from: String,
    block: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GetBlocksPayload {
    addr_from: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GetDataPayload {
    addr_from: String,
    op_type: OpType,
    id: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InvPayload {
    addr_from: String,
    op_type: OpType,
    items: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TxPayload {
    addr_from: String,
    transaction: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionPayload {
    addr_from: String,
    version: usize,
    best_height: usize,
}

/// The node's shared runtime state, handed to every connection handler.
/// All three structures are lock-guarded internally; none survive a
/// restart.
pub struct ServerContext {
    known_nodes: Nodes,
    memory_pool: MemoryPool,
    blocks_in_transit: BlockInTransit,
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerContext {
    pub fn new() -> ServerContext {
        let known_nodes = Nodes::new();
        known_nodes.add_node(CENTRAL_NODE.to_string());
        ServerContext {
            known_nodes,
            memory_pool: MemoryPool::new(),
            blocks_in_transit: BlockInTransit::new(),
        }
    }

    // Fire-and-forget send. An unreachable peer is dropped from the
    // registry and the current operation carries on without it.
    fn send(&self, addr: &str, command: &str, payload: &[u8]) {
        if addr == GLOBAL_CONFIG.get_node_addr() {
            return;
        }
        if let Err(e) = write_message(addr, command, payload) {
            warn!("Peer {addr} unreachable, dropping it: {e}");
            self.known_nodes.evict_node(addr);
        }
    }
}

/// The P2P node: a listening socket plus the shared runtime state.
pub struct Server {
    blockchain: Blockchain,
    ctx: Arc<ServerContext>,
}

impl Server {
    pub fn new(blockchain: Blockchain) -> Server {
        Server {
            blockchain,
            ctx: Arc::new(ServerContext::new()),
        }
    }

    /// Bind the listener, introduce this node to the bootstrap peer, and
    /// dispatch every inbound connection to its own handler thread.
    pub fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| LedgerError::Network(format!("Failed to bind to {addr}: {e}")))?;
        info!("Node listening on {addr}");

        if addr != CENTRAL_NODE {
            let best_height = self.blockchain.get_best_height()?;
            send_version(&self.ctx, CENTRAL_NODE, best_height);
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let blockchain = self.blockchain.clone();
                    let ctx = Arc::clone(&self.ctx);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(&blockchain, &ctx, stream) {
                            error!("Connection handler failed: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {e}");
                }
            }
        }
        Ok(())
    }
}

// Read one envelope, dispatch it, close the connection.
fn handle_connection(
    blockchain: &Blockchain,
    ctx: &ServerContext,
    mut stream: TcpStream,
) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_millis(TCP_READ_TIMEOUT)))
        .map_err(|e| LedgerError::Network(format!("Failed to set read timeout: {e}")))?;

    let mut request = vec![];
    stream
        .read_to_end(&mut request)
        .map_err(|e| LedgerError::Network(format!("Failed to read request: {e}")))?;
    let _ = stream.shutdown(Shutdown::Both);

    if request.len() < COMMAND_LENGTH {
        return Err(LedgerError::Network(format!(
            "Truncated message of {} bytes",
            request.len()
        )));
    }

    let command = bytes_to_command(&request[..COMMAND_LENGTH])?;
    let payload = &request[COMMAND_LENGTH..];
    info!("Received {command} command");

    match command.as_str() {
        CMD_ADDR => handle_addr(ctx, payload),
        CMD_BLOCK => handle_block(blockchain, ctx, payload),
        CMD_GET_BLOCKS => handle_get_blocks(blockchain, ctx, payload),
        CMD_GET_DATA => handle_get_data(blockchain, ctx, payload),
        CMD_INV => handle_inv(ctx, payload),
        CMD_TX => handle_tx(blockchain, ctx, payload),
        CMD_VERSION => handle_version(blockchain, ctx, payload),
        unknown => Err(LedgerError::Network(format!("Unknown command {unknown}"))),
    }
}

fn handle_addr(ctx: &ServerContext, payload: &[u8]) -> Result<()> {
    let payload: AddrPayload = decode_payload(payload)?;
    let self_addr = GLOBAL_CONFIG.get_node_addr();

    for addr in payload.addr_list {
        if addr != self_addr {
            ctx.known_nodes.add_node(addr);
        }
    }
    if payload.addr_from != self_addr {
        ctx.known_nodes.add_node(payload.addr_from);
    }
    info!("{} known nodes", ctx.known_nodes.len());

    // A fresh peer list is the cue to resync from everyone.
    for node in ctx.known_nodes.get_nodes() {
        send_get_blocks(ctx, &node.get_addr());
    }
    Ok(())
}

fn handle_block(blockchain: &Blockchain, ctx: &ServerContext, payload: &[u8]) -> Result<()> {
    let payload: BlockPayload = decode_payload(payload)?;
    let block = Block::deserialize(&payload.block)?;

    blockchain.add_block(&block)?;
    info!("Added block {} from {}", block.get_hash(), payload.addr_from);

    if ctx.blocks_in_transit.is_empty() {
        // Download finished, rebuild the index for the synced chain.
        UTXOSet::new(blockchain.clone()).reindex()?;
    } else if let Some(block_hash) = ctx.blocks_in_transit.first() {
        send_get_data(ctx, &payload.addr_from, OpType::Block, &block_hash);
        ctx.blocks_in_transit.remove(&block_hash);
    }
    Ok(())
}

fn handle_get_blocks(blockchain: &Blockchain, ctx: &ServerContext, payload: &[u8]) -> Result<()> {
    let payload: GetBlocksPayload = decode_payload(payload)?;
    let hashes = blockchain.get_block_hashes();
    send_inv(ctx, &payload.addr_from, OpType::Block, &hashes);
    Ok(())
}

fn handle_get_data(blockchain: &Blockchain, ctx: &ServerContext, payload: &[u8]) -> Result<()> {
    let payload: GetDataPayload = decode_payload(payload)?;
    match payload.op_type {
        OpType::Block => {
            let block_hash = String::from_utf8(payload.id)
                .map_err(|e| LedgerError::Network(format!("Invalid block hash bytes: {e}")))?;
            match blockchain.get_block(&block_hash)? {
                Some(block) => send_block(ctx, &payload.addr_from, &block)?,
                None => warn!("Requested block {block_hash} not found"),
            }
        }
        OpType::Tx => {
            let txid_hex = HEXLOWER.encode(&payload.id);
            match ctx.memory_pool.get(&txid_hex) {
                Some(tx) => send_tx_to(ctx, &payload.addr_from, &tx)?,
                None => warn!("Requested transaction {txid_hex} not in the pool"),
            }
        }
    }
    Ok(())
}

fn handle_inv(ctx: &ServerContext, payload: &[u8]) -> Result<()> {
    let payload: InvPayload = decode_payload(payload)?;
    info!(
        "Received inventory with {} {:?} items",
        payload.items.len(),
        payload.op_type
    );

    match payload.op_type {
        OpType::Block => {
            ctx.blocks_in_transit.add_blocks(&payload.items);
            if let Some(block_hash) = payload.items.first() {
                send_get_data(ctx, &payload.addr_from, OpType::Block, block_hash);
                ctx.blocks_in_transit.remove(block_hash);
            }
        }
        OpType::Tx => {
            if let Some(txid) = payload.items.first() {
                if !ctx.memory_pool.contains(&HEXLOWER.encode(txid)) {
                    send_get_data(ctx, &payload.addr_from, OpType::Tx, txid);
                }
            }
        }
    }
    Ok(())
}

fn handle_tx(blockchain: &Blockchain, ctx: &ServerContext, payload: &[u8]) -> Result<()> {
    let payload: TxPayload = decode_payload(payload)?;
    let tx = Transaction::deserialize(&payload.transaction)?;
    let txid = tx.get_id_bytes();
    ctx.memory_pool.add(tx);
    info!("Pooled transaction {}", HEXLOWER.encode(&txid));

    let self_addr = GLOBAL_CONFIG.get_node_addr();
    if self_addr == CENTRAL_NODE {
        // The bootstrap node relays announcements instead of mining.
        for node in ctx.known_nodes.get_nodes() {
            let addr = node.get_addr();
            if addr != self_addr && addr != payload.addr_from {
                send_inv(ctx, &addr, OpType::Tx, &[txid.clone()]);
            }
        }
    } else if ctx.memory_pool.len() >= TRANSACTION_THRESHOLD && GLOBAL_CONFIG.is_miner() {
        mine_pending_transactions(blockchain, ctx)?;
    }
    Ok(())
}

fn handle_version(blockchain: &Blockchain, ctx: &ServerContext, payload: &[u8]) -> Result<()> {
    let payload: VersionPayload = decode_payload(payload)?;
    let local_best_height = blockchain.get_best_height()?;
    info!(
        "Version from {}: height {} (local {})",
        payload.addr_from, payload.best_height, local_best_height
    );

    if local_best_height < payload.best_height {
        send_get_blocks(ctx, &payload.addr_from);
    } else if local_best_height > payload.best_height {
        send_version(ctx, &payload.addr_from, local_best_height);
    }

    if !ctx.known_nodes.node_is_known(&payload.addr_from) {
        ctx.known_nodes.add_node(payload.addr_from.clone());
        // The bootstrap node answers a newcomer with its peer list.
        if GLOBAL_CONFIG.get_node_addr() == CENTRAL_NODE {
            send_addr(ctx, &payload.addr_from)?;
        }
    }
    Ok(())
}

// The miner loop: verify what the pool holds, seal a block with a coinbase
// on top, publish, and go again while transactions remain. Entries that
// fail verification are dropped from the pool so a bad straggler cannot
// wedge the loop.
fn mine_pending_transactions(blockchain: &Blockchain, ctx: &ServerContext) -> Result<()> {
    let mining_addr = GLOBAL_CONFIG
        .get_mining_addr()
        .ok_or_else(|| LedgerError::Config("Mining address not configured".to_string()))?;

    loop {
        let mut txs = vec![];
        for tx in ctx.memory_pool.get_all() {
            let txid_hex = HEXLOWER.encode(tx.get_id());
            match blockchain.verify_transaction(&tx) {
                Ok(true) => txs.push(tx),
                Ok(false) => {
                    warn!("Dropping invalid transaction {txid_hex} from the pool");
                    ctx.memory_pool.remove(&txid_hex);
                }
                Err(e) => {
                    warn!("Dropping unverifiable transaction {txid_hex}: {e}");
                    ctx.memory_pool.remove(&txid_hex);
                }
            }
        }
        if txs.is_empty() {
            return Err(LedgerError::Mining(
                "No valid transactions left in the pool".to_string(),
            ));
        }

        let coinbase_tx = Transaction::new_coinbase_tx(&mining_addr, "")?;
        txs.push(coinbase_tx);

        let new_block = blockchain.mine_block(&txs)?;
        UTXOSet::new(blockchain.clone()).reindex()?;
        info!("New block {} mined", new_block.get_hash());

        for tx in &txs {
            ctx.memory_pool.remove(&HEXLOWER.encode(tx.get_id()));
        }

        let self_addr = GLOBAL_CONFIG.get_node_addr();
        for node in ctx.known_nodes.get_nodes() {
            if node.get_addr() != self_addr {
                send_inv(
                    ctx,
                    &node.get_addr(),
                    OpType::Block,
                    &[new_block.get_hash_bytes()],
                );
            }
        }

        if ctx.memory_pool.is_empty() {
            return Ok(());
        }
    }
}

fn send_addr(ctx: &ServerContext, addr: &str) -> Result<()> {
    let payload = encode_payload(&AddrPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        addr_list: ctx.known_nodes.addresses(),
    })?;
    ctx.send(addr, CMD_ADDR, &payload);
    Ok(())
}

fn send_version(ctx: &ServerContext, addr: &str, best_height: usize) {
    match encode_payload(&VersionPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        version: NODE_VERSION,
        best_height,
    }) {
        Ok(payload) => ctx.send(addr, CMD_VERSION, &payload),
        Err(e) => error!("Failed to encode version payload: {e}"),
    }
}

fn send_get_blocks(ctx: &ServerContext, addr: &str) {
    match encode_payload(&GetBlocksPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
    }) {
        Ok(payload) => ctx.send(addr, CMD_GET_BLOCKS, &payload),
        Err(e) => error!("Failed to encode getblocks payload: {e}"),
    }
}

fn send_get_data(ctx: &ServerContext, addr: &str, op_type: OpType, id: &[u8]) {
    match encode_payload(&GetDataPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        op_type,
        id: id.to_vec(),
    }) {
        Ok(payload) => ctx.send(addr, CMD_GET_DATA, &payload),
        Err(e) => error!("Failed to encode getdata payload: {e}"),
    }
}

fn send_inv(ctx: &ServerContext, addr: &str, op_type: OpType, items: &[Vec<u8>]) {
    match encode_payload(&InvPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        op_type,
        items: items.to_vec(),
    }) {
        Ok(payload) => ctx.send(addr, CMD_INV, &payload),
        Err(e) => error!("Failed to encode inv payload: {e}"),
    }
}

fn send_block(ctx: &ServerContext, addr: &str, block: &Block) -> Result<()> {
    let payload = encode_payload(&BlockPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        block: block.serialize()?,
    })?;
    ctx.send(addr, CMD_BLOCK, &payload);
    Ok(())
}

fn send_tx_to(ctx: &ServerContext, addr: &str, tx: &Transaction) -> Result<()> {
    let payload = encode_payload(&TxPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        transaction: tx.serialize()?,
    })?;
    ctx.send(addr, CMD_TX, &payload);
    Ok(())
}

/// One-shot transaction submission used by the CLI `send` path. Unlike the
/// in-server helpers there is no peer registry to demote, so a failure is
/// surfaced to the caller.
pub fn send_tx(addr: &str, tx: &Transaction) -> Result<()> {
    let payload = encode_payload(&TxPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        transaction: tx.serialize()?,
    })?;
    write_message(addr, CMD_TX, &payload)
}

fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload)
        .map_err(|e| LedgerError::Serialization(format!("Payload encoding failed: {e}")))
}

fn decode_payload<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| LedgerError::Serialization(format!("Payload decoding failed: {e}")))
}

// Commands are short ASCII tags padded with zero bytes to a fixed width.
fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    bytes
}

fn bytes_to_command(bytes: &[u8]) -> Result<String> {
    let end = bytes
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(COMMAND_LENGTH);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| LedgerError::Network(format!("Invalid command tag: {e}")))
}

fn write_message(addr: &str, command: &str, payload: &[u8]) -> Result<()> {
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| LedgerError::Network(format!("Invalid address {addr}: {e}")))?;

    let mut stream =
        TcpStream::connect_timeout(&socket_addr, Duration::from_millis(TCP_WRITE_TIMEOUT))
            .map_err(|e| LedgerError::Network(format!("Failed to connect to {addr}: {e}")))?;
    stream
        .set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))
        .map_err(|e| LedgerError::Network(format!("Failed to set write timeout: {e}")))?;

    let mut message = command_to_bytes(command).to_vec();
    message.extend_from_slice(payload);
    stream
        .write_all(&message)
        .map_err(|e| LedgerError::Network(format!("Failed to send {command} to {addr}: {e}")))?;
    stream
        .flush()
        .map_err(|e| LedgerError::Network(format!("Failed to flush {command} to {addr}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tag_round_trip() {
        for command in [
            CMD_ADDR,
            CMD_BLOCK,
            CMD_GET_BLOCKS,
            CMD_GET_DATA,
            CMD_INV,
            CMD_TX,
            CMD_VERSION,
        ] {
            let bytes = command_to_bytes(command);
            assert_eq!(bytes.len(), COMMAND_LENGTH);
            assert_eq!(bytes_to_command(&bytes).unwrap(), command);
        }
    }

    #[test]
    fn test_command_tag_is_zero_padded() {
        let bytes = command_to_bytes(CMD_TX);
        assert_eq!(&bytes[..2], b"tx");
        assert!(bytes[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_version_payload_round_trip() {
        let original = VersionPayload {
            addr_from: "127.0.0.1:2001".to_string(),
            version: NODE_VERSION,
            best_height: 5,
        };
        let bytes = encode_payload(&original).unwrap();
        let decoded: VersionPayload = decode_payload(&bytes).unwrap();
        assert_eq!(decoded.addr_from, original.addr_from);
        assert_eq!(decoded.best_height, original.best_height);
    }

    #[test]
    fn test_envelope_layout() {
        let payload = encode_payload(&GetBlocksPayload {
            addr_from: "127.0.0.1:2002".to_string(),
        })
        .unwrap();
        let mut message = command_to_bytes(CMD_GET_BLOCKS).to_vec();
        message.extend_from_slice(&payload);

        assert_eq!(
            bytes_to_command(&message[..COMMAND_LENGTH]).unwrap(),
            CMD_GET_BLOCKS
        );
        let decoded: GetBlocksPayload = decode_payload(&message[COMMAND_LENGTH..]).unwrap();
        assert_eq!(decoded.addr_from, "127.0.0.1:2002");
    }

    #[test]
    fn test_context_seeds_bootstrap_peer() {
        let ctx = ServerContext::new();
        assert!(ctx.known_nodes.node_is_known(CENTRAL_NODE));
    }
}
