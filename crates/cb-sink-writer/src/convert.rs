//! Record conversion and batch deduplication
//!
//! Turns change records into sink documents with a resolved identity, and
//! collapses a batch down to one operation per distinct identity.

use crate::id_extract::{DocumentIdExtractor, IdExtractError};
use bytes::Bytes;
use cb_sink_core::prelude::*;
use cb_sink_core::SinkMetrics;
use std::collections::HashMap;
use tracing::warn;

/// Resolve the document id for a tombstone record
///
/// Rules, in order: textual scalar key becomes its text, byte keys decode
/// as UTF-8 text, absent keys fall back to the coordinate id.
pub fn tombstone_id(record: &ChangeRecord) -> String {
    match &record.key {
        Some(key) => key.as_document_id(),
        None => record.coordinate_id(),
    }
}

/// Converts change records into sink documents
#[derive(Clone)]
pub struct DocumentConverter {
    extractor: Option<DocumentIdExtractor>,
    metrics: SinkMetrics,
}

impl DocumentConverter {
    /// Create a converter with an optional id extractor
    ///
    /// Without an extractor every value-bearing record is written under its
    /// coordinate id.
    pub fn new(extractor: Option<DocumentIdExtractor>) -> Self {
        Self {
            extractor,
            metrics: SinkMetrics::new("converter"),
        }
    }

    /// Convert one record into a sink document
    ///
    /// A missing id path falls back to the coordinate id with a warning.
    /// Unparsable content or a serialization failure aborts the batch.
    pub fn convert(&self, record: &ChangeRecord) -> Result<SinkDocument> {
        let value = match &record.value {
            None => return Ok(SinkDocument::delete(tombstone_id(record))),
            Some(value) => value,
        };

        let content = serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| SinkError::serialization_with_source("Failed to serialize record value", e))?;

        let Some(extractor) = &self.extractor else {
            return Ok(SinkDocument::write(record.coordinate_id(), content));
        };

        match extractor.extract(content.clone()) {
            Ok((id, content)) => Ok(SinkDocument::write(id, content)),
            Err(IdExtractError::PathNotFound { path }) => {
                let fallback = record.coordinate_id();
                warn!(
                    path = %path,
                    fallback_id = %fallback,
                    "Document id path not found; using fallback id"
                );
                self.metrics.record_fallback_id();
                Ok(SinkDocument::write(fallback, content))
            }
            Err(IdExtractError::Malformed(e)) => Err(SinkError::serialization_with_source(
                "Record content is not valid JSON",
                e,
            )),
        }
    }
}

/// Collapse converted documents to one operation per distinct identity
///
/// Last write wins by input order, so a batch holding several revisions of
/// the same logical document keeps only the newest. Returns the id map and
/// the number of discarded duplicates.
pub fn collapse_by_id(
    docs: impl IntoIterator<Item = SinkDocument>,
) -> (HashMap<String, Option<Bytes>>, usize) {
    let mut by_id = HashMap::new();
    let mut total = 0usize;
    for doc in docs {
        total += 1;
        by_id.insert(doc.id, doc.content);
    }
    let discarded = total - by_id.len();
    (by_id, discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tombstone_uses_key_then_coordinates() {
        let keyed = ChangeRecord::tombstone("t", 0, 5, Some(RecordKey::Text("k1".into())));
        assert_eq!(tombstone_id(&keyed), "k1");

        let keyless = ChangeRecord::tombstone("t", 0, 5, None);
        assert_eq!(tombstone_id(&keyless), "t/0/5");
    }

    #[test]
    fn test_convert_tombstone() {
        let converter = DocumentConverter::new(None);
        let record = ChangeRecord::tombstone("t", 1, 9, Some(RecordKey::Text("gone".into())));
        let doc = converter.convert(&record).unwrap();
        assert_eq!(doc.id, "gone");
        assert!(doc.is_delete());
    }

    #[test]
    fn test_convert_without_extractor_uses_coordinates() {
        let converter = DocumentConverter::new(None);
        // The key is ignored for value-bearing records; only tombstones
        // resolve identity from the key.
        let record = ChangeRecord::upsert("t", 2, 7, Some(RecordKey::Text("k1".into())), json!({"a": 1}));
        let doc = converter.convert(&record).unwrap();
        assert_eq!(doc.id, "t/2/7");
        assert_eq!(doc.content.as_deref(), Some(br#"{"a":1}"#.as_slice()));
    }

    #[test]
    fn test_convert_with_extractor() {
        let extractor = DocumentIdExtractor::new("/id", true).unwrap();
        let converter = DocumentConverter::new(Some(extractor));
        let record = ChangeRecord::upsert("t", 0, 1, None, json!({"id": "d7", "a": 1}));
        let doc = converter.convert(&record).unwrap();
        assert_eq!(doc.id, "d7");
        let parsed: serde_json::Value = serde_json::from_slice(doc.content.as_ref().unwrap()).unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn test_convert_falls_back_when_path_missing() {
        let extractor = DocumentIdExtractor::new("/id", false).unwrap();
        let converter = DocumentConverter::new(Some(extractor));
        let record = ChangeRecord::upsert("t", 3, 11, None, json!({"a": 1}));
        let doc = converter.convert(&record).unwrap();
        assert_eq!(doc.id, "t/3/11");
        assert!(!doc.is_delete());
    }

    #[test]
    fn test_collapse_last_write_wins() {
        let r1 = SinkDocument::write("x", Bytes::from_static(b"{\"v\":1}"));
        let r2 = SinkDocument::write("x", Bytes::from_static(b"{\"v\":2}"));
        let (by_id, discarded) = collapse_by_id(vec![r1, r2]);
        assert_eq!(discarded, 1);
        assert_eq!(
            by_id.get("x").unwrap().as_deref(),
            Some(br#"{"v":2}"#.as_slice())
        );
    }

    #[test]
    fn test_collapse_delete_wins_over_earlier_write() {
        let r1 = SinkDocument::write("x", Bytes::from_static(b"{}"));
        let r2 = SinkDocument::delete("x");
        let (by_id, discarded) = collapse_by_id(vec![r1, r2]);
        assert_eq!(discarded, 1);
        assert!(by_id.get("x").unwrap().is_none());
    }

    #[test]
    fn test_collapse_keeps_distinct_ids() {
        let r1 = SinkDocument::write("a", Bytes::from_static(b"{}"));
        let r2 = SinkDocument::delete("b");
        let (by_id, discarded) = collapse_by_id(vec![r1, r2]);
        assert_eq!(discarded, 0);
        assert_eq!(by_id.len(), 2);
    }
}
