//! # CB Sink Core
//!
//! Core types, store traits, and utilities for the Couchbase sink pipeline.
//!
//! This crate defines the shared abstractions consumed by the writer:
//! - Change records and sink documents (the in-memory data model)
//! - Configuration (connection, write mode, durability)
//! - The `DocumentStore` seam behind which the actual store client lives
//! - Error taxonomy and metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌───────────┐    ┌────────────┐    ┌───────────────┐
//! │ ChangeRecord │───►│ Converter │───►│ Dedup      │───►│ DocumentStore │
//! │   batch      │    │ (doc id)  │    │ (last-win) │    │  (concurrent) │
//! └──────────────┘    └───────────┘    └────────────┘    └───────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod record;
pub mod strategy;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use record::*;
pub use strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{Durability, PersistTo, ReplicateTo, SinkConfig, WriteMode};
    pub use crate::error::{Result, SinkError};
    pub use crate::record::{ChangeRecord, RecordKey, SinkDocument};
    pub use crate::strategy::{
        DocumentStore, HealthCheck, Lifecycle, PatchSpec, SubDocOperation,
    };
}
