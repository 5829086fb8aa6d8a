//! # Payload Serialization
//!
//! Codec abstraction for message payloads. Supports bincode (default) and
//! JSON (debugging/interop).
//!
//! The contract the runtime relies on:
//! - `to_bytes`/`from_bytes` round-trip every serde-registered type exactly
//! - an empty byte sequence means "absent/default", never an error, via
//!   [`WireFormat::from_bytes_or_default`]

use crate::error::{RpcError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Supported payload codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
}

impl WireFormat {
    /// Get the format identifier byte for wire protocol
    pub fn format_byte(self) -> u8 {
        match self {
            WireFormat::Bincode => 0x01,
            WireFormat::Json => 0x02,
        }
    }

    /// Detect format from identifier byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(WireFormat::Bincode),
            0x02 => Some(WireFormat::Json),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            WireFormat::Bincode => "Bincode",
            WireFormat::Json => "JSON",
        }
    }

    /// Serialize a value to bytes.
    pub fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            WireFormat::Bincode => {
                bincode::serialize(value).map_err(|e| RpcError::Serialize(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::to_vec(value).map_err(|e| RpcError::Serialize(e.to_string()))
            }
        }
    }

    /// Deserialize a value from bytes.
    pub fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            WireFormat::Bincode => {
                bincode::deserialize(bytes).map_err(|e| RpcError::Deserialize(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| RpcError::Deserialize(e.to_string()))
            }
        }
    }

    /// Deserialize, treating an empty byte sequence as the default value.
    pub fn from_bytes_or_default<T: DeserializeOwned + Default>(&self, bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            Ok(T::default())
        } else {
            self.from_bytes(bytes)
        }
    }
}

/// Builder for an ordered sequence of independently-serialized parameters.
///
/// Used on the client send path and by the callback hub: every argument is
/// encoded on its own so the receiving side can decode each one without a
/// schema binding them together.
#[derive(Debug, Clone)]
pub struct ParamList {
    format: WireFormat,
    params: Vec<Vec<u8>>,
}

impl ParamList {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            params: Vec::new(),
        }
    }

    /// Append one serialized parameter.
    pub fn push<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.params.push(self.format.to_bytes(value)?);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_vec(self) -> Vec<Vec<u8>> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
    struct Sample {
        name: String,
        count: u32,
        note: Option<String>,
    }

    #[test]
    fn format_byte_roundtrip() {
        for format in &[WireFormat::Bincode, WireFormat::Json] {
            let byte = format.format_byte();
            assert_eq!(WireFormat::from_byte(byte), Some(*format));
        }
        assert_eq!(WireFormat::from_byte(0xFF), None);
    }

    #[test]
    fn roundtrip_both_formats() {
        let value = Sample {
            name: "svc".into(),
            count: 7,
            note: Some("hi".into()),
        };
        for format in &[WireFormat::Bincode, WireFormat::Json] {
            let bytes = format.to_bytes(&value).unwrap();
            let back: Sample = format.from_bytes(&bytes).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn roundtrip_empty_string_and_absent_option() {
        let value = Sample {
            name: String::new(),
            count: 0,
            note: None,
        };
        for format in &[WireFormat::Bincode, WireFormat::Json] {
            let bytes = format.to_bytes(&value).unwrap();
            let back: Sample = format.from_bytes(&bytes).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn empty_bytes_decode_to_default() {
        let format = WireFormat::Bincode;
        let back: Sample = format.from_bytes_or_default(&[]).unwrap();
        assert_eq!(back, Sample::default());

        let s: String = format.from_bytes_or_default(&[]).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn garbage_bytes_are_an_error_not_a_panic() {
        let format = WireFormat::Json;
        let res: Result<Sample> = format.from_bytes(b"{not json");
        assert!(matches!(res, Err(RpcError::Deserialize(_))));
    }

    #[test]
    fn param_list_serializes_each_argument_independently() {
        let format = WireFormat::Bincode;
        let params = ParamList::new(format)
            .push(&42u32)
            .unwrap()
            .push(&"hello".to_string())
            .unwrap()
            .into_vec();
        assert_eq!(params.len(), 2);
        let a: u32 = format.from_bytes(&params[0]).unwrap();
        let b: String = format.from_bytes(&params[1]).unwrap();
        assert_eq!(a, 42);
        assert_eq!(b, "hello");
    }
}
