//! Pluggable codec for opaque adviser and step parameters.
//!
//! Plan nodes carry their parameters as bytes so the engine never depends on
//! a concrete parameter schema. Only the component that owns a parameter set
//! decodes it, through a `ParameterCodec`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Current format version written by [`VersionedJsonCodec`].
pub const JSON_CODEC_VERSION: u8 = 1;

/// Errors from encoding or decoding parameters.
///
/// A codec failure is a configuration fault and is never retried.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty parameter payload")]
    Empty,

    #[error("unsupported codec version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed parameter payload: {0}")]
    Malformed(String),
}

/// Byte codec for parameter values.
///
/// Object-safe so a single codec instance can be shared as
/// `Arc<dyn ParameterCodec>` between the engine and the advisers.
pub trait ParameterCodec: Send + Sync {
    fn encode_value(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError>;

    fn decode_value(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError>;
}

/// One format-version byte followed by a JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionedJsonCodec;

impl ParameterCodec for VersionedJsonCodec {
    fn encode_value(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError> {
        let body = serde_json::to_vec(value).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(JSON_CODEC_VERSION);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
        let (version, body) = bytes.split_first().ok_or(CodecError::Empty)?;
        if *version != JSON_CODEC_VERSION {
            return Err(CodecError::UnsupportedVersion(*version));
        }
        serde_json::from_slice(body).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

/// Encode a typed parameter struct.
pub fn encode_parameters<T: Serialize>(
    codec: &dyn ParameterCodec,
    params: &T,
) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::to_value(params).map_err(|e| CodecError::Malformed(e.to_string()))?;
    codec.encode_value(&value)
}

/// Decode bytes into a typed parameter struct.
pub fn decode_parameters<T: DeserializeOwned>(
    codec: &dyn ParameterCodec,
    bytes: &[u8],
) -> Result<T, CodecError> {
    let value = codec.decode_value(bytes)?;
    serde_json::from_value(value).map_err(|e| CodecError::Malformed(e.to_string()))
}
