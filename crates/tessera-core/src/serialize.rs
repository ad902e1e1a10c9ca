use std::io;

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;

use crate::error::CoreError;

/// Serialize to deterministic bincode bytes
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from bincode bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Serialize to compact JSON bytes (transaction wire form)
pub fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from JSON bytes
pub fn from_json_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Deserialize from JSON string
pub fn from_json<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T, CoreError> {
    serde_json::from_str(json).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Serialize to JSON with `", "` between object entries and `": "` after keys.
///
/// Array elements stay comma separated without padding. This is the layout of
/// the persisted database snapshot, so the output must be byte-stable.
pub fn to_json_spaced<T: Serialize>(value: &T) -> Result<String, CoreError> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value
        .serialize(&mut ser)
        .map_err(|e| CoreError::Serialization(e.to_string()))?;
    String::from_utf8(out).map_err(|e| CoreError::Serialization(e.to_string()))
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Marker {
        height: u64,
        round: String,
    }

    #[test]
    fn test_bincode_roundtrip() {
        let original = Marker {
            height: 42,
            round: "registration".to_string(),
        };

        let bytes = to_bytes(&original).unwrap();
        let recovered: Marker = from_bytes(&bytes).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_spaced_layout() {
        let value = json!({"a": [["x", "y"]], "b": {"c": 1}});
        let out = to_json_spaced(&value).unwrap();
        assert_eq!(out, r#"{"a": [["x","y"]], "b": {"c": 1}}"#);
    }

    #[test]
    fn test_spaced_output_parses_back() {
        let value = json!({"k": [1, 2, 3], "nested": {"z": null, "a": true}});
        let out = to_json_spaced(&value).unwrap();
        let parsed: serde_json::Value = from_json(&out).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_json_bytes_rejects_garbage() {
        let result: Result<Marker, _> = from_json_bytes(b"not json");
        assert!(matches!(result, Err(CoreError::Deserialization(_))));
    }
}
