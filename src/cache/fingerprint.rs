//! Request fingerprinting
//!
//! Derives the cache key of a request: a hash of its canonical form (method,
//! URL with sorted query parameters, optional body) plus a hash of the
//! response type it is decoded into.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Placeholder hash for requests that could not be fingerprinted
pub const INVALID_HASH: &str = "no_hash";

/// Raw description of a request, before hashing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: String,

    /// Full URL including query parameters
    pub url: String,

    /// Canonical request body, if any
    pub body: Option<String>,

    /// Name of the type the response is decoded into
    pub response_type: String,
}

impl RequestDescriptor {
    /// Describe a GET request
    pub fn get(url: impl Into<String>, response_type: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            body: None,
            response_type: response_type.into(),
        }
    }

    /// Describe a request with an arbitrary method
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: None,
            response_type: response_type.into(),
        }
    }

    /// Attach a canonical body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Canonical form used for hashing.
    ///
    /// The fragment is dropped and query parameters are sorted so that two
    /// URLs differing only in parameter order hash identically.
    pub fn canonical_form(&self) -> String {
        let without_fragment = self.url.split('#').next().unwrap_or_default();

        let url = match without_fragment.split_once('?') {
            Some((base, query)) => {
                let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
                params.sort_unstable();
                format!("{}?{}", base, params.join("&"))
            }
            None => without_fragment.to_string(),
        };

        let method = self.method.to_ascii_uppercase();
        match &self.body {
            Some(body) => format!("{} {}||{}", method, url, body),
            None => format!("{} {}", method, url),
        }
    }
}

/// Stable identity of a request, used as the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// Name of the response type
    pub response_type: String,

    /// Hash of the canonical request
    pub request_hash: String,

    /// Hash of the response type
    pub class_hash: String,
}

impl RequestIdentity {
    /// Identity used when fingerprinting failed; never matches a stored entry
    pub fn unhashed(response_type: impl Into<String>) -> Self {
        Self {
            response_type: response_type.into(),
            request_hash: INVALID_HASH.to_string(),
            class_hash: INVALID_HASH.to_string(),
        }
    }

    /// Whether this identity can be used as a cache key
    pub fn is_valid(&self) -> bool {
        self.request_hash != INVALID_HASH && self.class_hash != INVALID_HASH
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.request_hash.chars().take(12).collect();
        write!(f, "{}#{}", self.response_type, short)
    }
}

/// Hashing function used for fingerprints
pub trait RequestHasher: Send + Sync {
    /// Hash the given text; must be deterministic
    fn hash(&self, text: &str) -> Result<String>;
}

/// SHA-256 hasher producing lowercase hex digests
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl RequestHasher for Sha256Hasher {
    fn hash(&self, text: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Computes request identities
#[derive(Clone)]
pub struct Fingerprinter {
    hasher: Arc<dyn RequestHasher>,
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter").finish_non_exhaustive()
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(Arc::new(Sha256Hasher))
    }
}

impl Fingerprinter {
    pub fn new(hasher: Arc<dyn RequestHasher>) -> Self {
        Self { hasher }
    }

    /// Fingerprint a request
    pub fn fingerprint(&self, request: &RequestDescriptor) -> Result<RequestIdentity> {
        let request_hash = self
            .hasher
            .hash(&request.canonical_form())
            .map_err(|e| CacheError::FingerprintFailure(format!("request hash: {}", e)))?;

        let class_hash = self.class_hash(&request.response_type)?;

        Ok(RequestIdentity {
            response_type: request.response_type.clone(),
            request_hash,
            class_hash,
        })
    }

    /// Hash a response type name
    pub fn class_hash(&self, response_type: &str) -> Result<String> {
        self.hasher
            .hash(response_type)
            .map_err(|e| CacheError::FingerprintFailure(format!("class hash: {}", e)))
    }
}
