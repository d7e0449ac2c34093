// Canonical byte encoding for everything the ledger persists, hashes, or
// signs. Both directions go through bincode's standard configuration so
// that two nodes encoding the same value always produce identical bytes.
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| LedgerError::Serialization(format!("Encoding failed: {e}")))
}

pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| LedgerError::Serialization(format!("Decoding failed: {e}")))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct Sample {
        seq: u64,
        tag: String,
        payload: Vec<u8>,
    }

    #[test]
    fn test_round_trip() {
        let original = Sample {
            seq: 7,
            tag: "tip".to_string(),
            payload: vec![0xde, 0xad, 0xbe, 0xef],
        };

        let bytes = serialize(&original).unwrap();
        let restored: Sample = deserialize(&bytes).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let value = Sample {
            seq: 42,
            tag: "block".to_string(),
            payload: vec![1, 2, 3],
        };
        assert_eq!(serialize(&value).unwrap(), serialize(&value).unwrap());
    }

    #[test]
    fn test_garbage_input_is_rejected() {
        let garbage = vec![0xff; 16];
        let result: Result<Sample> = deserialize(&garbage);
        assert!(result.is_err());
    }
}
