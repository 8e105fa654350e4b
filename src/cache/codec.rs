//! Payload serialisation
//!
//! Values are encoded as JSON, then optionally compressed and encrypted by
//! pluggable [`PayloadTransform`]s. Reading reverses the order: decrypt, then
//! decompress, then decode.

use crate::cache::entry::SerialisationTag;
use crate::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A reversible byte transformation such as compression or encryption
pub trait PayloadTransform: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Transform bytes on their way to the store
    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>>;

    /// Undo [`PayloadTransform::apply`]
    fn revert(&self, data: Vec<u8>) -> Result<Vec<u8>>;
}

/// Encodes and decodes stored payloads
#[derive(Clone, Default)]
pub struct PayloadCodec {
    compressor: Option<Arc<dyn PayloadTransform>>,

    encryptor: Option<Arc<dyn PayloadTransform>>,
}

impl fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCodec")
            .field("compressor", &self.compressor.as_ref().map(|t| t.name().to_string()))
            .field("encryptor", &self.encryptor.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

impl PayloadCodec {
    /// JSON only; compress/encrypt flags are recorded but not applied
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn PayloadTransform>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn with_encryptor(mut self, encryptor: Arc<dyn PayloadTransform>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Encode a value for storage
    pub fn serialise<T: Serialize>(&self, value: &T, tag: SerialisationTag) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec(value)
            .map_err(|e| CacheError::SerialisationFailure(e.to_string()))?;

        if tag.compressed {
            if let Some(compressor) = &self.compressor {
                data = compressor.apply(data).map_err(|e| {
                    CacheError::SerialisationFailure(format!("{}: {}", compressor.name(), e))
                })?;
            }
        }

        if tag.encrypted {
            if let Some(encryptor) = &self.encryptor {
                data = encryptor.apply(data).map_err(|e| {
                    CacheError::SerialisationFailure(format!("{}: {}", encryptor.name(), e))
                })?;
            }
        }

        debug!("Serialised payload ({} bytes, tag {})", data.len(), tag);
        Ok(data)
    }

    /// Decode a stored payload
    pub fn deserialise<T: DeserializeOwned>(&self, data: &[u8], tag: SerialisationTag) -> Result<T> {
        let mut data = data.to_vec();

        if tag.encrypted {
            if let Some(encryptor) = &self.encryptor {
                data = encryptor
                    .revert(data)
                    .map_err(|e| CacheError::CorruptEntry(format!("{}: {}", encryptor.name(), e)))?;
            }
        }

        if tag.compressed {
            if let Some(compressor) = &self.compressor {
                data = compressor
                    .revert(data)
                    .map_err(|e| CacheError::CorruptEntry(format!("{}: {}", compressor.name(), e)))?;
            }
        }

        serde_json::from_slice(&data).map_err(|e| CacheError::CorruptEntry(e.to_string()))
    }
}
