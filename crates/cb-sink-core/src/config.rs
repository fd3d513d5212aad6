//! Configuration types for the Couchbase sink pipeline
//!
//! Uses the `config` crate for layered configuration from files and environment.

use crate::error::{Result, SinkError};
use crate::strategy::{PatchSpec, SubDocOperation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Couchbase connection configuration
    #[serde(default)]
    pub couchbase: CouchbaseConfig,

    /// Document identity and write-mode configuration
    #[serde(default)]
    pub document: DocumentConfig,

    /// Durability thresholds applied to every mutation
    #[serde(default)]
    pub durability: DurabilityConfig,

    /// Batch executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Couchbase Configuration
// ============================================================================

/// Couchbase connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchbaseConfig {
    /// Couchbase hosts
    #[serde(default = "default_cb_hosts")]
    pub hosts: Vec<String>,

    /// Target bucket
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Target scope
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Target collection
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Optional username for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Connection timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_cb_hosts() -> Vec<String> {
    vec!["http://localhost:8091".to_string()]
}

fn default_bucket() -> String {
    "default".to_string()
}

fn default_scope() -> String {
    "_default".to_string()
}

fn default_collection() -> String {
    "_default".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for CouchbaseConfig {
    fn default() -> Self {
        Self {
            hosts: default_cb_hosts(),
            bucket: default_bucket(),
            scope: default_scope(),
            collection: default_collection(),
            username: None,
            password: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

// ============================================================================
// Document Configuration
// ============================================================================

/// How the document body is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentMode {
    /// Replace the whole document
    Document,
    /// Patch a path inside the document
    SubDocument,
    /// Conditional write through a N1QL statement
    N1ql,
}

impl Default for DocumentMode {
    fn default() -> Self {
        Self::Document
    }
}

/// Sub-document write parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubDocumentConfig {
    /// Target path within the document (Couchbase dotted path)
    #[serde(default)]
    pub path: String,

    /// Sub-document operation
    #[serde(default)]
    pub operation: SubDocOperation,

    /// Create intermediate parents when the path is missing
    #[serde(default = "default_true")]
    pub create_paths: bool,

    /// Create the document when it does not exist
    #[serde(default = "default_true")]
    pub create_document: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SubDocumentConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            operation: SubDocOperation::default(),
            create_paths: true,
            create_document: true,
        }
    }
}

/// Conditional (N1QL) write parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct N1qlConfig {
    /// Field names whose values form the match predicate
    #[serde(default)]
    pub where_fields: Vec<String>,

    /// Create the document when no existing document matches
    #[serde(default = "default_true")]
    pub create_document: bool,
}

/// Document identity and write-mode configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// JSON pointer into the content naming the document id field
    ///
    /// Unset means every value-bearing record uses the coordinate id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_path: Option<String>,

    /// Remove the id field from the content after extraction
    #[serde(default)]
    pub remove_id: bool,

    /// Selected write mode
    #[serde(default)]
    pub mode: DocumentMode,

    /// Document expiry applied by full-document writes
    #[serde(default, with = "humantime_serde")]
    pub expiry: Option<Duration>,

    /// Sub-document parameters (used when `mode = sub_document`)
    #[serde(default)]
    pub sub_document: SubDocumentConfig,

    /// N1QL parameters (used when `mode = n1ql`)
    #[serde(default)]
    pub n1ql: N1qlConfig,
}

/// Resolved write mode, fixed for the pipeline lifetime
///
/// Each variant carries only the fields its write path needs. Deletes are
/// never a mode; they are inferred per record from value absence.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteMode {
    /// Full-document replace with optional expiry
    Document { expiry: Option<Duration> },
    /// Partial patch at a configured path
    SubDocument(PatchSpec),
    /// Conditional write keyed on content field values
    N1ql {
        where_fields: Vec<String>,
        create_document: bool,
    },
}

impl DocumentConfig {
    /// Resolve the configured write mode, validating its sub-parameters
    pub fn write_mode(&self) -> Result<WriteMode> {
        match self.mode {
            DocumentMode::Document => Ok(WriteMode::Document {
                expiry: self.expiry,
            }),
            DocumentMode::SubDocument => {
                if self.sub_document.path.is_empty() {
                    return Err(SinkError::config(
                        "sub_document mode requires a non-empty document.sub_document.path",
                    ));
                }
                Ok(WriteMode::SubDocument(PatchSpec {
                    path: self.sub_document.path.clone(),
                    operation: self.sub_document.operation,
                    create_parents: self.sub_document.create_paths,
                    create_document: self.sub_document.create_document,
                }))
            }
            DocumentMode::N1ql => {
                if self.n1ql.where_fields.is_empty() {
                    return Err(SinkError::config(
                        "n1ql mode requires a non-empty document.n1ql.where_fields list",
                    ));
                }
                Ok(WriteMode::N1ql {
                    where_fields: self.n1ql.where_fields.clone(),
                    create_document: self.n1ql.create_document,
                })
            }
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

/// Minimum nodes that must persist a mutation to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistTo {
    None,
    One,
    Two,
    Three,
    Four,
}

impl PersistTo {
    /// Node count for wire parameters
    pub fn nodes(self) -> u8 {
        match self {
            Self::None => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }
}

impl Default for PersistTo {
    fn default() -> Self {
        Self::None
    }
}

/// Minimum replicas that must receive a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateTo {
    None,
    One,
    Two,
    Three,
}

impl ReplicateTo {
    /// Replica count for wire parameters
    pub fn nodes(self) -> u8 {
        match self {
            Self::None => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

impl Default for ReplicateTo {
    fn default() -> Self {
        Self::None
    }
}

/// Acknowledgment thresholds applied to every mutating operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurabilityConfig {
    /// Persistence threshold
    #[serde(default)]
    pub persist_to: PersistTo,

    /// Replication threshold
    #[serde(default)]
    pub replicate_to: ReplicateTo,
}

/// Durability pair handed to each store operation
pub type Durability = DurabilityConfig;

// ============================================================================
// Executor Configuration
// ============================================================================

/// Batch executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Concurrent in-flight store operations per batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    256
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl SinkConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables with prefix CB_SINK_
        builder = builder.add_source(
            config::Environment::with_prefix("CB_SINK")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_full_document() {
        let config = DocumentConfig::default();
        assert_eq!(
            config.write_mode().unwrap(),
            WriteMode::Document { expiry: None }
        );
    }

    #[test]
    fn test_sub_document_mode_requires_path() {
        let config = DocumentConfig {
            mode: DocumentMode::SubDocument,
            ..Default::default()
        };
        assert!(matches!(
            config.write_mode(),
            Err(SinkError::Configuration { .. })
        ));
    }

    #[test]
    fn test_n1ql_mode_requires_where_fields() {
        let config = DocumentConfig {
            mode: DocumentMode::N1ql,
            ..Default::default()
        };
        assert!(matches!(
            config.write_mode(),
            Err(SinkError::Configuration { .. })
        ));
    }

    #[test]
    fn test_durability_nodes() {
        assert_eq!(PersistTo::None.nodes(), 0);
        assert_eq!(PersistTo::Four.nodes(), 4);
        assert_eq!(ReplicateTo::Three.nodes(), 3);
    }
}
