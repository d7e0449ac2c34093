// The transaction model. Value moves by consuming previous outputs and
// creating new ones; every non-coinbase input carries an ECDSA signature
// binding it to the output it spends.
//
// Signing and verification both operate on the id of a trimmed copy of the
// transaction, computed from its canonical byte encoding. The signer and
// the verifier therefore hash byte-identical material.

use crate::error::{LedgerError, Result};
use crate::storage::UTXOSet;
use crate::utils::{base58_decode, deserialize, ecdsa_sign, ecdsa_verify, serialize, sha256_digest};
use crate::wallet::{validate_address, Wallet, ADDRESS_CHECK_SUM_LEN};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Fixed per-block reward minted by a coinbase transaction.
pub const SUBSIDY: u64 = 10;

// Output index a coinbase input points at. Coinbase inputs reference no
// real output, the empty txid plus this sentinel marks them.
const COINBASE_OUT_INDEX: i32 = -1;

/// A reference to one spendable output of a prior transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i32,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i32) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i32 {
        self.vout
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    fn is_coinbase_input(&self) -> bool {
        self.txid.is_empty() && self.vout == COINBASE_OUT_INDEX
    }
}

/// A claim on some amount, spendable by whoever controls the key whose
/// hash matches `pub_key_hash`.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    // Locking an output means storing the public key hash extracted from
    // the recipient's address, between the version byte and the checksum.
    fn lock(&mut self, address: &str) -> Result<()> {
        if !validate_address(address) {
            return Err(LedgerError::InvalidAddress(address.to_string()));
        }

        let payload = base58_decode(address)?;
        self.pub_key_hash = payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec();
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// A transfer of value: inputs consumed, outputs created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// The value-minting transaction of a mined block. Its single input
    /// references nothing; the memo (or random bytes when the memo is
    /// empty) rides in the input's pub_key field and makes two coinbases
    /// to the same address distinct.
    pub fn new_coinbase_tx(to: &str, memo: &str) -> Result<Transaction> {
        let data = if memo.is_empty() {
            Uuid::new_v4().as_bytes().to_vec()
        } else {
            memo.as_bytes().to_vec()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_OUT_INDEX,
            signature: vec![],
            pub_key: data,
        };
        let tx_output = TXOutput::new(SUBSIDY, to)?;

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![tx_output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Build and sign a transfer from one wallet to a recipient address,
    /// selecting inputs from the UTXO index. Emits a change output back to
    /// the sender when the selected inputs overshoot the amount.
    pub fn new_transfer(
        from_wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if !validate_address(to) {
            return Err(LedgerError::InvalidAddress(to.to_string()));
        }

        let pub_key_hash = crate::wallet::hash_pub_key(from_wallet.get_public_key());
        let (accumulated, spendable) = utxo_set.find_spendable_outputs(&pub_key_hash, amount)?;
        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, out_indexes) in spendable {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                LedgerError::Serialization(format!("Invalid transaction id key: {e}"))
            })?;
            for out_index in out_indexes {
                let mut input = TXInput::new(&txid, out_index as i32);
                input.pub_key = from_wallet.get_public_key().to_vec();
                inputs.push(input);
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new(change, &from_wallet.get_address())?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;

        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, from_wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// A transaction mints value exactly when its one input references no
    /// prior output.
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].is_coinbase_input()
    }

    // Canonical id: the digest of this transaction with the id field
    // itself zeroed out.
    fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    // The shared basis for signing and verification payloads: every input
    // with signature and pub_key cleared.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    // Looks up the output an input spends, erroring when the prior
    // transaction is absent from the resolved set or the index is out of
    // range.
    fn resolve_prev_output<'a>(
        input: &TXInput,
        prev_txs: &'a HashMap<String, Transaction>,
    ) -> Result<&'a TXOutput> {
        let txid_hex = HEXLOWER.encode(input.get_txid());
        let prev_tx = prev_txs
            .get(&txid_hex)
            .ok_or_else(|| LedgerError::NotFound(format!("previous transaction {txid_hex}")))?;

        let out_index = usize::try_from(input.get_vout()).map_err(|_| {
            LedgerError::Transaction(format!(
                "Negative output index {} on a non-coinbase input",
                input.get_vout()
            ))
        })?;
        prev_tx.vout.get(out_index).ok_or_else(|| {
            LedgerError::Transaction(format!(
                "Output index {out_index} out of range for transaction {txid_hex}"
            ))
        })
    }

    /// Sign every input against the output it spends. Each iteration
    /// temporarily plants the prior output's pub_key_hash in the trimmed
    /// copy, hashes it, signs that id, and clears the field again so the
    /// next input signs only its own binding context.
    pub fn sign(
        &mut self,
        pkcs8: &[u8],
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let prev_output = Self::resolve_prev_output(&self.vin[idx], prev_txs)?;

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_output.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[idx].pub_key = vec![];

            self.vin[idx].signature = ecdsa_sign(pkcs8, &tx_copy.id)?;
        }
        Ok(())
    }

    /// Check every input's signature against the rebuilt signing payload.
    /// A missing prior transaction is a hard error, a bad signature is a
    /// plain `false`.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_output = Self::resolve_prev_output(vin, prev_txs)?;

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_output.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[idx].pub_key = vec![];

            if !ecdsa_verify(vin.get_pub_key(), vin.get_signature(), &tx_copy.id) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_bytes(&self) -> Vec<u8> {
        self.id.clone()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    /// Assemble an unsigned transaction with explicit inputs and outputs,
    /// for tests that wire prior transactions by hand.
    #[cfg(test)]
    pub fn new_unsigned(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }
}
