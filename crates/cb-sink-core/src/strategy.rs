//! Store traits for the Couchbase sink pipeline
//!
//! The pipeline never talks to Couchbase directly; it dispatches through
//! the `DocumentStore` trait so the HTTP client can be swapped for an
//! in-memory double in tests and dry runs.

use crate::config::Durability;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Lifecycle Management
// ============================================================================

/// Lifecycle management for components
///
/// Provides graceful startup and shutdown semantics.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Start the component
    ///
    /// Called once before any operations. Should establish connections,
    /// initialize state, and prepare for operation.
    async fn start(&self) -> Result<()>;

    /// Stop the component gracefully
    ///
    /// Called during shutdown. May be called even if start() failed.
    async fn stop(&self) -> Result<()>;

    /// Check if the component is running
    fn is_running(&self) -> bool;
}

/// Health check capability
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Perform health check
    ///
    /// Returns Ok(()) if healthy, Err with details if not.
    async fn health_check(&self) -> Result<()>;

    /// Get component name for health reporting
    fn component_name(&self) -> &'static str;
}

// ============================================================================
// Document Store
// ============================================================================

/// Sub-document operation applied at the configured path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubDocOperation {
    /// Insert the value; fails if the path already exists
    Insert,
    /// Insert or overwrite the value
    Upsert,
    /// Remove the value at the path
    Remove,
}

impl SubDocOperation {
    /// Wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Upsert => "upsert",
            Self::Remove => "remove",
        }
    }
}

impl Default for SubDocOperation {
    fn default() -> Self {
        Self::Upsert
    }
}

/// Parameters of a sub-document patch, fixed at configuration time
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSpec {
    /// Target path within the document (Couchbase dotted path)
    pub path: String,

    /// Operation applied at the path
    pub operation: SubDocOperation,

    /// Create intermediate parents when the path is missing
    pub create_parents: bool,

    /// Create the document when it does not exist
    pub create_document: bool,
}

/// Operation-executing seam over the document store
///
/// Implementations:
/// - `CouchbaseHttpStore`: reqwest client over the Couchbase HTTP APIs
/// - `MemoryStore`: in-process store for tests and dry runs
///
/// Each operation returns `Ok(())`, `SinkError::NotFound`, or another
/// `SinkError`. None of them retry; the caller owns redelivery policy.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replace the whole document with raw, already-serialized content
    ///
    /// The content bytes must reach storage unmodified; no store-side
    /// transcoding is permitted.
    async fn replace(
        &self,
        id: &str,
        content: Bytes,
        durability: Durability,
        expiry: Option<Duration>,
    ) -> Result<()>;

    /// Apply a sub-document patch to the document
    ///
    /// Returns `SinkError::NotFound` when the document does not exist and
    /// `patch.create_document` is false. The content is the value placed
    /// at the patch path (ignored by `Remove`).
    async fn mutate_in(
        &self,
        id: &str,
        patch: &PatchSpec,
        content: Bytes,
        durability: Durability,
    ) -> Result<()>;

    /// Conditionally write content where `where_fields` values match
    ///
    /// The predicate is evaluated against the content's own field values.
    /// Returns `SinkError::NotFound` when nothing matches and
    /// `create_document` is false; with `create_document` the content is
    /// inserted under `id`.
    async fn conditional_write(
        &self,
        id: &str,
        where_fields: &[String],
        content: Bytes,
        create_document: bool,
        durability: Durability,
    ) -> Result<()>;

    /// Remove the document
    ///
    /// Returns `SinkError::NotFound` when the document does not exist;
    /// the caller decides whether that is an error.
    async fn remove(&self, id: &str, durability: Durability) -> Result<()>;
}
