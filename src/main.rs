// CLI entry point. Commands map one-to-one onto the ledger operations the
// core exposes; anything that fails is logged and the process exits with a
// non-zero status.
use clap::Parser;
use data_encoding::HEXLOWER;
use emberchain::{
    convert_address, hash_pub_key, send_tx, validate_address, Blockchain, Command, Opt, Server,
    Transaction, UTXOSet, Wallets, ADDRESS_CHECK_SUM_LEN, CENTRAL_NODE, GLOBAL_CONFIG,
};
use log::{error, LevelFilter};
use std::process;

// The send command mines locally when its mine flag carries this value.
const MINE_TRUE: usize = 1;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

// Open the ledger for this process: nodes started with NODE_ID get their
// own database directory, everything else shares the default one.
fn open_blockchain() -> Result<Blockchain, Box<dyn std::error::Error>> {
    match GLOBAL_CONFIG.get_node_id() {
        Some(node_id) => Ok(Blockchain::new_blockchain_with_node_id(&node_id)?),
        None => Ok(Blockchain::new_blockchain()?),
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let blockchain = match GLOBAL_CONFIG.get_node_id() {
                Some(node_id) => Blockchain::create_blockchain_with_node_id(&address, &node_id)?,
                None => Blockchain::create_blockchain(&address)?,
            };
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::new()?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}");
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }

            // The public key hash sits between the version byte and the
            // checksum of the decoded address.
            let payload = emberchain::base58_decode(&address)?;
            let pub_key_hash = &payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN];

            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain);
            let balance: u64 = utxo_set
                .find_utxo(pub_key_hash)?
                .iter()
                .map(|out| out.get_value())
                .sum();
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::new()?;
            for address in wallets.get_addresses() {
                println!("{address}");
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }
            if amount == 0 {
                return Err("Amount must be positive".into());
            }

            let wallets = Wallets::new()?;
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No local wallet for address: {from}"))?;

            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction = Transaction::new_transfer(wallet, &to, amount, &utxo_set)?;

            if mine == MINE_TRUE {
                // Local mining pays the sender the block reward and folds
                // the new block into the UTXO index incrementally.
                let coinbase_tx = Transaction::new_coinbase_tx(&from, "")?;
                let block = blockchain.mine_block(&[coinbase_tx, transaction])?;
                utxo_set.update(&block)?;
            } else {
                send_tx(CENTRAL_NODE, &transaction)?;
            }
            println!("Success!");
        }
        Command::Printchain => {
            let blockchain = open_blockchain()?;
            for block in blockchain.iterator() {
                println!("Pre block hash: {}", block.get_pre_block_hash());
                println!("Cur block hash: {}", block.get_hash());
                println!("Cur block timestamp: {}", block.get_timestamp());
                println!("Height: {}", block.get_height());

                for tx in block.get_transactions() {
                    println!("- Transaction id: {}", HEXLOWER.encode(tx.get_id()));

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let from =
                                convert_address(&hash_pub_key(input.get_pub_key()));
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                HEXLOWER.encode(input.get_txid()),
                                input.get_vout(),
                                from,
                            );
                        }
                    }
                    for output in tx.get_vout() {
                        let to = convert_address(output.get_pub_key_hash());
                        println!("-- Output value = {}, to = {}", output.get_value(), to);
                    }
                }
                println!();
            }
        }
        Command::Reindexutxo => {
            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner } => {
            let socket_addr = GLOBAL_CONFIG.get_node_addr();
            let node_id = GLOBAL_CONFIG.extract_node_id_from_addr();
            GLOBAL_CONFIG.set_node_id(node_id);

            if let Some(addr) = miner {
                if !validate_address(&addr) {
                    return Err(format!("Invalid miner address: {addr}").into());
                }
                println!("Mining is on. Address to receive rewards: {addr}");
                GLOBAL_CONFIG.set_mining_addr(addr);
            }

            let blockchain = open_blockchain()?;
            let server = Server::new(blockchain);
            server.run(&socket_addr)?;
        }
    }
    Ok(())
}
