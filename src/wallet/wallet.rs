// A wallet is one ECDSA P-256 key pair. The address is the base58 text
// form of: version byte, RIPEMD160(SHA256(public key)), and the first four
// bytes of a double-SHA256 checksum over the preceding payload.

use crate::error::{LedgerError, Result};
use crate::utils::{base58_decode, base58_encode, ripemd160_digest, sha256_digest};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = crate::utils::new_key_pair()?;
        let rng = SystemRandom::new();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| {
                    LedgerError::Crypto(format!("Failed to load key pair from PKCS8: {e}"))
                })?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> String {
        convert_address(&hash_pub_key(&self.public_key))
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

/// SHA-256 followed by RIPEMD-160, the hash that locks outputs to a key.
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    ripemd160_digest(&sha256_digest(pub_key))
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let digest = sha256_digest(&sha256_digest(payload));
    digest[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

/// Render a public key hash as an address string.
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload = vec![VERSION];
    payload.extend_from_slice(pub_key_hash);
    payload.extend(checksum(&payload));
    base58_encode(&payload)
}

/// An address is valid when it decodes, is long enough to hold version
/// byte plus checksum, and its checksum re-derives from the payload.
pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };
    if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
        return false;
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    checksum(body) == actual_checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_address_validates() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();
        assert!(validate_address(&address));
    }

    #[test]
    fn test_address_round_trips_pub_key_hash() {
        let wallet = Wallet::new().unwrap();
        let pub_key_hash = hash_pub_key(wallet.get_public_key());
        let address = convert_address(&pub_key_hash);

        let payload = base58_decode(&address).unwrap();
        assert_eq!(
            &payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN],
            pub_key_hash.as_slice()
        );
    }

    #[test]
    fn test_corrupted_address_is_rejected() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();

        let mut corrupted = address.into_bytes();
        // Swap a character for a different base58 character.
        corrupted[4] = if corrupted[4] == b'2' { b'3' } else { b'2' };
        assert!(!validate_address(&String::from_utf8(corrupted).unwrap()));
    }

    #[test]
    fn test_junk_strings_are_rejected() {
        assert!(!validate_address(""));
        assert!(!validate_address("0OIl"));
        assert!(!validate_address("abc"));
    }
}
