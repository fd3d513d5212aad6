//! Record types for the Couchbase sink pipeline
//!
//! Defines the change record handed in by the host delivery framework and
//! the sink document produced by conversion.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Key of a change record
///
/// Keys arrive untyped from the source; only these shapes carry a usable
/// document id. Anything else is unrepresentable by construction and the
/// caller falls back to source coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    /// Textual key
    Text(String),
    /// Numeric key
    Number(serde_json::Number),
    /// Boolean key
    Boolean(bool),
    /// Raw byte key, decoded as UTF-8 text when used as a document id
    Bytes(Bytes),
}

impl RecordKey {
    /// Render the key as document id text
    ///
    /// Byte keys are decoded lossily; invalid sequences become replacement
    /// characters rather than failing the record.
    pub fn as_document_id(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

/// One unit of input: a create/update (value present) or delete (value
/// absent, a tombstone) for some logical entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Source topic name
    pub topic: String,

    /// Source partition number
    pub partition: i32,

    /// Offset within the partition (monotonic per partition)
    pub offset: i64,

    /// Record key, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<RecordKey>,

    /// Structured record value; `None` denotes a tombstone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ChangeRecord {
    /// Create an upsert record
    pub fn upsert(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<RecordKey>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value: Some(value),
        }
    }

    /// Create a tombstone record
    pub fn tombstone(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<RecordKey>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value: None,
        }
    }

    /// Check if this record deletes its document
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Deterministic identity derived from source coordinates
    ///
    /// Format: `{topic}/{partition}/{offset}`
    pub fn coordinate_id(&self) -> String {
        format!("{}/{}/{}", self.topic, self.partition, self.offset)
    }
}

/// A converted document operation: the resolved identity plus the payload
/// to write, or `None` for a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkDocument {
    /// Target document id
    pub id: String,

    /// Serialized content; `None` means delete
    pub content: Option<Bytes>,
}

impl SinkDocument {
    /// Create a write operation
    pub fn write(id: impl Into<String>, content: Bytes) -> Self {
        Self {
            id: id.into(),
            content: Some(content),
        }
    }

    /// Create a delete operation
    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: None,
        }
    }

    /// Check if this operation deletes its document
    pub fn is_delete(&self) -> bool {
        self.content.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_id_format() {
        let record = ChangeRecord::tombstone("t", 2, 7, None);
        assert_eq!(record.coordinate_id(), "t/2/7");
    }

    #[test]
    fn test_key_as_document_id() {
        assert_eq!(RecordKey::Text("user::42".into()).as_document_id(), "user::42");
        assert_eq!(
            RecordKey::Number(serde_json::Number::from(42)).as_document_id(),
            "42"
        );
        assert_eq!(RecordKey::Boolean(true).as_document_id(), "true");
        assert_eq!(
            RecordKey::Bytes(Bytes::from_static(b"abc")).as_document_id(),
            "abc"
        );
    }

    #[test]
    fn test_byte_key_decodes_lossily() {
        let key = RecordKey::Bytes(Bytes::from_static(&[0x61, 0xff, 0x62]));
        assert_eq!(key.as_document_id(), "a\u{fffd}b");
    }

    #[test]
    fn test_record_deserialization() {
        let record: ChangeRecord = serde_json::from_str(
            r#"{"topic":"orders","partition":0,"offset":12,"key":"o-12","value":{"total":9}}"#,
        )
        .unwrap();
        assert_eq!(record.key, Some(RecordKey::Text("o-12".into())));
        assert!(!record.is_tombstone());

        let tombstone: ChangeRecord =
            serde_json::from_str(r#"{"topic":"orders","partition":0,"offset":13,"key":"o-12"}"#)
                .unwrap();
        assert!(tombstone.is_tombstone());
    }
}
