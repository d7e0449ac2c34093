//! Hashing, signatures, encodings, and the canonical serializer.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, ecdsa_sign, ecdsa_verify, new_key_pair,
    ripemd160_digest, sha256_digest,
};
pub use serialization::{deserialize, serialize};
