use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Encode a value as a compact JSON payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Error::from)
}

/// Decode a JSON payload.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ReadingBatch;

    #[test]
    fn test_encode_batch() {
        let batch: ReadingBatch = [("nitrogen", Some(100.0)), ("ph", Some(6.8))]
            .into_iter()
            .collect();

        let bytes = encode(&batch).unwrap();
        let value: serde_json::Value = decode(&bytes).unwrap();

        assert_eq!(value["nitrogen"], 100);
        assert_eq!(value["ph"], 6.8);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result: Result<serde_json::Value> = decode(b"\xa1\x63key");
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
