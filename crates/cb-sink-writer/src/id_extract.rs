//! Document id extraction
//!
//! Pulls the document id out of the serialized record content at a
//! configured JSON pointer, optionally stripping the id field so it is not
//! duplicated in storage.

use bytes::Bytes;
use cb_sink_core::prelude::*;
use serde_json::Value;
use thiserror::Error;

/// Outcome of a failed extraction attempt
///
/// The two variants deliberately force callers to treat them differently:
/// a missing path is recoverable (fall back to the coordinate id), while
/// malformed content fails the whole batch.
#[derive(Error, Debug)]
pub enum IdExtractError {
    /// The configured pointer does not resolve to a scalar in the content
    #[error("Document id path '{path}' not found in record content")]
    PathNotFound { path: String },

    /// The content is not valid JSON
    #[error("Record content is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Extracts document ids from record content at a JSON pointer
#[derive(Debug, Clone)]
pub struct DocumentIdExtractor {
    pointer: String,
    remove: bool,
}

impl DocumentIdExtractor {
    /// Create an extractor for the given JSON pointer
    ///
    /// `remove` strips the id field from the content after extraction.
    pub fn new(pointer: impl Into<String>, remove: bool) -> Result<Self> {
        let pointer = pointer.into();
        if !pointer.starts_with('/') {
            return Err(SinkError::config(format!(
                "document id path must be a JSON pointer starting with '/', got '{}'",
                pointer
            )));
        }
        Ok(Self { pointer, remove })
    }

    /// Whether extracted id fields are stripped from the content
    pub fn removes_id(&self) -> bool {
        self.remove
    }

    /// Disable id stripping, keeping the pointer
    pub fn without_removal(mut self) -> Self {
        self.remove = false;
        self
    }

    /// Extract the document id from serialized content
    ///
    /// Returns the id and the content to store, re-serialized without the
    /// id field when removal is enabled.
    pub fn extract(&self, content: Bytes) -> std::result::Result<(String, Bytes), IdExtractError> {
        let mut parsed: Value = serde_json::from_slice(&content)?;

        let id = match parsed.pointer(&self.pointer) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            // null, arrays, and objects cannot name a document
            Some(_) | None => {
                return Err(IdExtractError::PathNotFound {
                    path: self.pointer.clone(),
                })
            }
        };

        if !self.remove {
            return Ok((id, content));
        }

        remove_pointer(&mut parsed, &self.pointer);
        let stripped = serde_json::to_vec(&parsed)?;
        Ok((id, Bytes::from(stripped)))
    }
}

/// Remove the value addressed by a JSON pointer, if present
fn remove_pointer(value: &mut Value, pointer: &str) -> Option<Value> {
    let (parent, token) = pointer.rsplit_once('/')?;
    let token = token.replace("~1", "/").replace("~0", "~");

    match value.pointer_mut(parent)? {
        Value::Object(map) => map.remove(&token),
        Value::Array(items) => {
            let index: usize = token.parse().ok()?;
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(value: serde_json::Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_extracts_string_id() {
        let extractor = DocumentIdExtractor::new("/id", false).unwrap();
        let (id, body) = extractor
            .extract(content(json!({"id": "user::1", "name": "a"})))
            .unwrap();
        assert_eq!(id, "user::1");
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["id"], "user::1");
    }

    #[test]
    fn test_extracts_numeric_and_boolean_ids() {
        let extractor = DocumentIdExtractor::new("/id", false).unwrap();
        let (id, _) = extractor.extract(content(json!({"id": 42}))).unwrap();
        assert_eq!(id, "42");

        let (id, _) = extractor.extract(content(json!({"id": true}))).unwrap();
        assert_eq!(id, "true");
    }

    #[test]
    fn test_extracts_nested_id_and_strips_it() {
        let extractor = DocumentIdExtractor::new("/meta/id", true).unwrap();
        let (id, body) = extractor
            .extract(content(json!({"meta": {"id": "d1", "rev": 3}, "payload": 1})))
            .unwrap();
        assert_eq!(id, "d1");
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, json!({"meta": {"rev": 3}, "payload": 1}));
    }

    #[test]
    fn test_missing_path_is_recoverable() {
        let extractor = DocumentIdExtractor::new("/id", false).unwrap();
        let err = extractor.extract(content(json!({"name": "a"}))).unwrap_err();
        assert!(matches!(err, IdExtractError::PathNotFound { .. }));
    }

    #[test]
    fn test_non_scalar_id_is_recoverable() {
        let extractor = DocumentIdExtractor::new("/id", false).unwrap();
        let err = extractor
            .extract(content(json!({"id": {"nested": true}})))
            .unwrap_err();
        assert!(matches!(err, IdExtractError::PathNotFound { .. }));

        let err = extractor.extract(content(json!({"id": null}))).unwrap_err();
        assert!(matches!(err, IdExtractError::PathNotFound { .. }));
    }

    #[test]
    fn test_malformed_content_is_fatal() {
        let extractor = DocumentIdExtractor::new("/id", false).unwrap();
        let err = extractor
            .extract(Bytes::from_static(b"{not json"))
            .unwrap_err();
        assert!(matches!(err, IdExtractError::Malformed(_)));
    }

    #[test]
    fn test_rejects_non_pointer_path() {
        assert!(DocumentIdExtractor::new("id", false).is_err());
    }
}
