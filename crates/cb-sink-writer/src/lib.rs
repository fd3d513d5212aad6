//! # CB Sink Writer
//!
//! Batch write pipeline from change records to Couchbase.
//!
//! Each invocation takes one arrival-ordered batch of change records,
//! resolves a document identity per record, collapses duplicate identities
//! (last write wins), dispatches each surviving operation to the
//! configured write strategy, and executes them concurrently with
//! fail-fast semantics. The caller acknowledges the batch only on success.
//!
//! ## Write strategies
//!
//! - Full-document replace (raw content, optional expiry)
//! - Sub-document patch at a configured path
//! - Conditional write keyed on content field values (N1QL)
//! - Delete, inferred per record from value absence

pub mod convert;
pub mod couchbase;
pub mod id_extract;
pub mod memory;

pub use convert::*;
pub use couchbase::*;
pub use id_extract::*;
pub use memory::*;

use bytes::Bytes;
use cb_sink_core::prelude::*;
use cb_sink_core::{SinkConfig, SinkMetrics};
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// The batch write pipeline
///
/// One instance serves one store; mode and durability are fixed for its
/// lifetime. `put` processes one batch at a time; operations within a
/// batch run concurrently.
pub struct SinkPipeline<S: DocumentStore> {
    store: Arc<S>,
    converter: DocumentConverter,
    mode: WriteMode,
    durability: Durability,
    concurrency: usize,
    metrics: SinkMetrics,
}

impl<S: DocumentStore> SinkPipeline<S> {
    /// Create a pipeline with explicit parts
    pub fn new(
        store: Arc<S>,
        converter: DocumentConverter,
        mode: WriteMode,
        durability: Durability,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            converter,
            mode,
            durability,
            concurrency: concurrency.max(1),
            metrics: SinkMetrics::new("sink_pipeline"),
        }
    }

    /// Build a pipeline from configuration
    pub fn from_config(config: &SinkConfig, store: Arc<S>) -> Result<Self> {
        let mode = config.document.write_mode()?;

        let mut extractor = config
            .document
            .id_path
            .as_deref()
            .map(|path| DocumentIdExtractor::new(path, config.document.remove_id))
            .transpose()?;

        // Stripping the id field would starve the predicate of its values,
        // so conditional writes keep the content intact.
        if matches!(mode, WriteMode::N1ql { .. }) {
            extractor = extractor.map(|e| {
                if e.removes_id() {
                    warn!("document.remove_id is ignored in n1ql mode; predicate fields stay in the content");
                }
                e.without_removal()
            });
        }

        Ok(Self::new(
            store,
            DocumentConverter::new(extractor),
            mode,
            config.durability,
            config.executor.concurrency,
        ))
    }

    /// Process one batch of change records
    ///
    /// Returns `Ok(())` only when every operation was durably applied; on
    /// the first failure the batch is reported failed and the caller is
    /// expected to redeliver it in full. Writes that already completed are
    /// not rolled back. An empty batch is a no-op.
    pub async fn put(&self, records: Vec<ChangeRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let count = records.len();
        let first = &records[0];
        trace!(
            count,
            topic = %first.topic,
            partition = first.partition,
            offset = first.offset,
            "Received batch; writing to the store"
        );
        self.metrics.record_received(count as u64);
        let start = Instant::now();

        let docs = records
            .iter()
            .map(|record| self.converter.convert(record))
            .collect::<Result<Vec<_>>>()?;

        let (by_id, discarded) = collapse_by_id(docs);
        if discarded != 0 {
            debug!(discarded, "Batch contained redundant records");
            self.metrics.record_duplicates_discarded(discarded as u64);
        }

        let mut operations = stream::iter(
            by_id
                .into_iter()
                .map(|(id, content)| self.apply(id, content)),
        )
        .buffer_unordered(self.concurrency);

        // First failure fails the batch; dropping the stream abandons the
        // remaining operations (the store finishes or fails them on its own).
        while let Some(result) = operations.next().await {
            result?;
        }

        self.metrics.record_batch_latency(start.elapsed());
        Ok(())
    }

    /// Execute one deduplicated operation
    async fn apply(&self, id: String, content: Option<Bytes>) -> Result<()> {
        let is_delete = content.is_none();
        let result = match content {
            None => self.remove_if_exists(&id).await,
            Some(content) => match &self.mode {
                WriteMode::Document { expiry } => {
                    self.store
                        .replace(&id, content, self.durability, *expiry)
                        .await
                }
                WriteMode::SubDocument(patch) => {
                    self.store
                        .mutate_in(&id, patch, content, self.durability)
                        .await
                }
                WriteMode::N1ql {
                    where_fields,
                    create_document,
                } => {
                    self.store
                        .conditional_write(
                            &id,
                            where_fields,
                            content,
                            *create_document,
                            self.durability,
                        )
                        .await
                }
            },
        };

        match &result {
            Ok(()) if !is_delete => self.metrics.record_docs_written(1),
            Ok(()) => {}
            Err(e) => {
                error!(doc_id = %id, error = %e, "Write operation failed");
                self.metrics.record_write_failure(e.kind());
            }
        }
        result
    }

    /// Delete the document, treating an already-absent document as success
    async fn remove_if_exists(&self, id: &str) -> Result<()> {
        match self.store.remove(id, self.durability).await {
            Ok(()) => {
                self.metrics.record_docs_deleted(1);
                Ok(())
            }
            Err(SinkError::NotFound { .. }) => {
                debug!(doc_id = %id, "Document already absent; delete is a no-op");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
