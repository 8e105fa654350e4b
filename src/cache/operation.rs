//! Cache operations and their resolution
//!
//! An [`Operation`] tells the engine what to do with a call: cache it with a
//! given priority, pass it through, invalidate the stored entry or clear a
//! range of entries. Operations have a compact colon-delimited text form so
//! they can be declared in a request header:
//!
//! ```text
//! Cache:STALE_ACCEPTED_FIRST:3600:::true:false
//! DoNotCache
//! Invalidate
//! Clear:CLASS:true
//! ```

use crate::cache::fingerprint::RequestDescriptor;
use crate::cache::policy::CachePriority;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

const SEPARATOR: char = ':';

/// Longest TTL whose millisecond count fits in an `i64`
pub const MAX_TTL_SECONDS: u64 = i64::MAX as u64 / 1_000;

/// Per-call caching options for [`RemoteOperation::Cache`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheOptions {
    pub priority: CachePriority,

    /// Time-to-live; the configured default applies when absent
    pub ttl_seconds: Option<u64>,

    /// Maximum wait for connectivity, forwarded to the transport
    pub connectivity_timeout_seconds: Option<u64>,

    /// Maximum duration of the network call
    pub request_timeout_seconds: Option<u64>,

    /// Encrypt the stored payload; the configured default applies when absent
    pub encrypt: Option<bool>,

    /// Compress the stored payload; the configured default applies when absent
    pub compress: Option<bool>,
}

impl CacheOptions {
    pub fn new(priority: CachePriority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    /// Values above [`MAX_TTL_SECONDS`] are clamped
    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = Some(ttl.min(MAX_TTL_SECONDS));
        self
    }

    pub fn connectivity_timeout_seconds(mut self, timeout: u64) -> Self {
        self.connectivity_timeout_seconds = Some(timeout);
        self
    }

    pub fn request_timeout_seconds(mut self, timeout: u64) -> Self {
        self.request_timeout_seconds = Some(timeout);
        self
    }

    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }
}

/// Operations that involve the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOperation {
    Cache(CacheOptions),
    DoNotCache,
}

/// Which stored entries a clear operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClearScope {
    /// The entry of this exact request
    Request,
    /// Every entry of the request's response type
    Class,
    /// Every entry
    All,
}

impl ClearScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearScope::Request => "REQUEST",
            ClearScope::Class => "CLASS",
            ClearScope::All => "ALL",
        }
    }
}

impl FromStr for ClearScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "REQUEST" => Ok(ClearScope::Request),
            "CLASS" => Ok(ClearScope::Class),
            "ALL" => Ok(ClearScope::All),
            other => Err(format!("unknown clear scope: {}", other)),
        }
    }
}

/// Operations acting only on the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalOperation {
    Invalidate,
    Clear { scope: ClearScope, stale_only: bool },
}

/// What the engine does with a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Remote(RemoteOperation),
    Local(LocalOperation),
}

impl Operation {
    /// Cache with the given options
    pub fn cache(options: CacheOptions) -> Self {
        Operation::Remote(RemoteOperation::Cache(options))
    }

    pub fn do_not_cache() -> Self {
        Operation::Remote(RemoteOperation::DoNotCache)
    }

    pub fn invalidate() -> Self {
        Operation::Local(LocalOperation::Invalidate)
    }

    pub fn clear(scope: ClearScope, stale_only: bool) -> Self {
        Operation::Local(LocalOperation::Clear { scope, stale_only })
    }

    /// Name used as the first token of the serialised form
    pub fn type_name(&self) -> &'static str {
        match self {
            Operation::Remote(RemoteOperation::Cache(_)) => "Cache",
            Operation::Remote(RemoteOperation::DoNotCache) => "DoNotCache",
            Operation::Local(LocalOperation::Invalidate) => "Invalidate",
            Operation::Local(LocalOperation::Clear { .. }) => "Clear",
        }
    }

    /// The cache options, for cache operations
    pub fn cache_options(&self) -> Option<&CacheOptions> {
        match self {
            Operation::Remote(RemoteOperation::Cache(options)) => Some(options),
            _ => None,
        }
    }

    fn arguments(&self) -> Vec<String> {
        fn opt<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }

        match self {
            Operation::Remote(RemoteOperation::Cache(options)) => vec![
                options.priority.to_string(),
                opt(&options.ttl_seconds),
                opt(&options.connectivity_timeout_seconds),
                opt(&options.request_timeout_seconds),
                opt(&options.encrypt),
                opt(&options.compress),
            ],
            Operation::Local(LocalOperation::Clear { scope, stale_only }) => {
                vec![scope.as_str().to_string(), stale_only.to_string()]
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arguments = self.arguments();
        if arguments.iter().all(String::is_empty) {
            f.write_str(self.type_name())
        } else {
            write!(f, "{}{}{}", self.type_name(), SEPARATOR, arguments.join(":"))
        }
    }
}

impl FromStr for Operation {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let params: Vec<&str> = s.split(SEPARATOR).collect();
        let parse_error = |reason: String| CacheError::OperationParse {
            input: s.to_string(),
            reason,
        };

        match params[0] {
            "DoNotCache" => Ok(Operation::do_not_cache()),
            "Invalidate" => Ok(Operation::invalidate()),
            "Clear" => {
                let scope = match params.get(1) {
                    Some(token) if !token.is_empty() => token.parse().map_err(parse_error)?,
                    _ => ClearScope::Class,
                };
                let stale_only = parse_bool(params.get(2).copied())
                    .map_err(parse_error)?
                    .unwrap_or(false);
                Ok(Operation::clear(scope, stale_only))
            }
            "Cache" => {
                // Any other arity falls back to the default cache operation
                if params.len() != 7 {
                    return Ok(Operation::cache(CacheOptions::default()));
                }

                let priority = if params[1].is_empty() {
                    CachePriority::default()
                } else {
                    params[1].parse().map_err(parse_error)?
                };

                let ttl_seconds = parse_u64(params[2]).map_err(parse_error)?;
                if ttl_seconds.map_or(false, |ttl| ttl > MAX_TTL_SECONDS) {
                    return Err(parse_error(format!("ttl out of range: {}", params[2])));
                }

                Ok(Operation::cache(CacheOptions {
                    priority,
                    ttl_seconds,
                    connectivity_timeout_seconds: parse_u64(params[3]).map_err(parse_error)?,
                    request_timeout_seconds: parse_u64(params[4]).map_err(parse_error)?,
                    encrypt: parse_bool(Some(params[5])).map_err(parse_error)?,
                    compress: parse_bool(Some(params[6])).map_err(parse_error)?,
                }))
            }
            other => Err(parse_error(format!("unknown operation type: {}", other))),
        }
    }
}

fn parse_u64(token: &str) -> std::result::Result<Option<u64>, String> {
    if token.is_empty() {
        return Ok(None);
    }
    token
        .parse()
        .map(Some)
        .map_err(|_| format!("not a number: {}", token))
}

fn parse_bool(token: Option<&str>) -> std::result::Result<Option<bool>, String> {
    match token {
        None | Some("") => Ok(None),
        Some("true") => Ok(Some(true)),
        Some("false") => Ok(Some(false)),
        Some(other) => Err(format!("not a boolean: {}", other)),
    }
}

/// What happens when a header operation disagrees with the declared one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeaderConflictPolicy {
    /// The header wins, with a warning
    #[default]
    Override,
    /// The call is rejected
    Reject,
}

/// Whether an explicit per-call operation or the global predicate wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PredicatePrecedence {
    #[default]
    Explicit,
    Predicate,
}

/// Global fallback deciding an operation from the request alone
pub type CachePredicate = Arc<dyn Fn(&RequestDescriptor) -> Option<Operation> + Send + Sync>;

/// Picks the operation of a call from its declared, header and predicate sources
#[derive(Clone, Default)]
pub struct OperationResolver {
    predicate: Option<CachePredicate>,
    header_conflict: HeaderConflictPolicy,
    precedence: PredicatePrecedence,
}

impl fmt::Debug for OperationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationResolver")
            .field("has_predicate", &self.predicate.is_some())
            .field("header_conflict", &self.header_conflict)
            .field("precedence", &self.precedence)
            .finish()
    }
}

impl OperationResolver {
    pub fn new(header_conflict: HeaderConflictPolicy, precedence: PredicatePrecedence) -> Self {
        Self {
            predicate: None,
            header_conflict,
            precedence,
        }
    }

    pub fn with_predicate(mut self, predicate: CachePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Resolve the operation for a call; defaults to [`Operation::do_not_cache`]
    pub fn resolve(
        &self,
        request: &RequestDescriptor,
        declared: Option<Operation>,
        header: Option<&str>,
    ) -> Result<Operation> {
        let from_header = header.map(str::parse::<Operation>).transpose()?;

        let explicit = match (declared, from_header) {
            (Some(declared), Some(header)) if declared != header => match self.header_conflict {
                HeaderConflictPolicy::Override => {
                    warn!(
                        "Header operation {} overrides declared operation {} for {}",
                        header, declared, request.url
                    );
                    Some(header)
                }
                HeaderConflictPolicy::Reject => {
                    return Err(CacheError::ConfigError(format!(
                        "header operation {} conflicts with declared operation {}",
                        header, declared
                    )));
                }
            },
            (declared, header) => header.or(declared),
        };

        let predicted = self.predicate.as_ref().and_then(|predicate| predicate(request));

        let operation = match self.precedence {
            PredicatePrecedence::Explicit => explicit.or(predicted),
            PredicatePrecedence::Predicate => predicted.or(explicit),
        };

        Ok(operation.unwrap_or_else(Operation::do_not_cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestDescriptor {
        RequestDescriptor::get("https://api.example.com/facts", "Facts")
    }

    #[test]
    fn test_serialise_cache_operation() {
        let operation = Operation::cache(
            CacheOptions::new(CachePriority::StaleNotAccepted)
                .ttl_seconds(600)
                .request_timeout_seconds(10)
                .encrypt(true),
        );

        assert_eq!(
            operation.to_string(),
            "Cache:STALE_NOT_ACCEPTED:600::10:true:"
        );
    }

    #[test]
    fn test_serialise_argumentless_operations() {
        assert_eq!(Operation::do_not_cache().to_string(), "DoNotCache");
        assert_eq!(Operation::invalidate().to_string(), "Invalidate");
        assert_eq!(
            Operation::clear(ClearScope::All, true).to_string(),
            "Clear:ALL:true"
        );
    }

    #[test]
    fn test_parse_serialised_forms() {
        let operations = vec![
            Operation::do_not_cache(),
            Operation::invalidate(),
            Operation::clear(ClearScope::Request, false),
            Operation::cache(CacheOptions::new(CachePriority::OfflineStaleAccepted)),
            Operation::cache(
                CacheOptions::new(CachePriority::InvalidateStaleAcceptedLast)
                    .ttl_seconds(30)
                    .connectivity_timeout_seconds(2)
                    .compress(false),
            ),
        ];

        for operation in operations {
            let parsed: Operation = operation.to_string().parse().unwrap();
            assert_eq!(parsed, operation);
        }
    }

    #[test]
    fn test_cache_with_wrong_arity_is_default() {
        let parsed: Operation = "Cache:STALE_NOT_ACCEPTED".parse().unwrap();
        assert_eq!(parsed, Operation::cache(CacheOptions::default()));
    }

    #[test]
    fn test_clear_defaults_to_class_scope() {
        let parsed: Operation = "Clear".parse().unwrap();
        assert_eq!(parsed, Operation::clear(ClearScope::Class, false));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "Purge".parse::<Operation>(),
            Err(CacheError::OperationParse { .. })
        ));
        assert!("Cache:STALE_NOT_ACCEPTED:soon::::".parse::<Operation>().is_err());
        assert!("Clear:ALL:maybe".parse::<Operation>().is_err());
    }

    #[test]
    fn test_ttl_range() {
        let too_long = format!("Cache:STALE_ACCEPTED_FIRST:{}::::", MAX_TTL_SECONDS + 1);
        assert!(matches!(
            too_long.parse::<Operation>(),
            Err(CacheError::OperationParse { .. })
        ));

        let longest = format!("Cache:STALE_ACCEPTED_FIRST:{}::::", MAX_TTL_SECONDS);
        let parsed = longest.parse::<Operation>().unwrap();
        assert_eq!(
            parsed.cache_options().and_then(|o| o.ttl_seconds),
            Some(MAX_TTL_SECONDS)
        );

        let clamped = CacheOptions::default().ttl_seconds(u64::MAX);
        assert_eq!(clamped.ttl_seconds, Some(MAX_TTL_SECONDS));
    }

    #[test]
    fn test_header_overrides_declared_by_default() {
        let resolver = OperationResolver::default();
        let resolved = resolver
            .resolve(&request(), Some(Operation::do_not_cache()), Some("Invalidate"))
            .unwrap();

        assert_eq!(resolved, Operation::invalidate());
    }

    #[test]
    fn test_header_conflict_can_be_rejected() {
        let resolver =
            OperationResolver::new(HeaderConflictPolicy::Reject, PredicatePrecedence::Explicit);
        let result = resolver.resolve(&request(), Some(Operation::do_not_cache()), Some("Invalidate"));

        assert!(matches!(result, Err(CacheError::ConfigError(_))));

        // Agreeing sources are not a conflict
        let resolved = resolver
            .resolve(&request(), Some(Operation::invalidate()), Some("Invalidate"))
            .unwrap();
        assert_eq!(resolved, Operation::invalidate());
    }

    #[test]
    fn test_predicate_precedence() {
        let predicate: CachePredicate =
            Arc::new(|_| Some(Operation::cache(CacheOptions::default())));

        let explicit_first = OperationResolver::default().with_predicate(predicate.clone());
        assert_eq!(
            explicit_first
                .resolve(&request(), Some(Operation::do_not_cache()), None)
                .unwrap(),
            Operation::do_not_cache()
        );
        assert_eq!(
            explicit_first.resolve(&request(), None, None).unwrap(),
            Operation::cache(CacheOptions::default())
        );

        let predicate_first =
            OperationResolver::new(HeaderConflictPolicy::Override, PredicatePrecedence::Predicate)
                .with_predicate(predicate);
        assert_eq!(
            predicate_first
                .resolve(&request(), Some(Operation::do_not_cache()), None)
                .unwrap(),
            Operation::cache(CacheOptions::default())
        );
    }

    #[test]
    fn test_nothing_declared_means_do_not_cache() {
        let resolved = OperationResolver::default()
            .resolve(&request(), None, None)
            .unwrap();
        assert_eq!(resolved, Operation::do_not_cache());
    }
}
