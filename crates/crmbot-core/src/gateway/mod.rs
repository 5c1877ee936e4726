//! External system capabilities the core consumes.
//!
//! Vendor SDK behavior lives outside the core; tools only see the
//! [`SystemGateway`] trait and these transport-neutral result types.

pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::Credentials;
use crate::error::GatewayError;

/// Kind of bulk mutation submitted to an external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkKind {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl BulkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkKind::Insert => "insert",
            BulkKind::Update => "update",
            BulkKind::Upsert => "upsert",
            BulkKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for BulkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BulkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(BulkKind::Insert),
            "update" => Ok(BulkKind::Update),
            "upsert" => Ok(BulkKind::Upsert),
            "delete" => Ok(BulkKind::Delete),
            other => Err(format!("unknown bulk operation: {other}")),
        }
    }
}

/// Records returned from a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSet {
    pub records: Vec<serde_json::Value>,
    /// Whether the result set is complete (no further pages).
    pub done: bool,
}

/// Per-record outcome of a bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Job-level result of a bulk operation, with per-record outcomes when
/// the provider reports them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub job_id: String,
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchResult {
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

/// One field of an external object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    pub field_type: String,
    pub updateable: bool,
}

/// Structural metadata for one external object type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub name: String,
    pub fields: Vec<FieldMetadata>,
}

impl ObjectSchema {
    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Schema metadata for one object, or the full catalog when no object
/// was named.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub objects: Vec<ObjectSchema>,
}

impl SchemaDescription {
    pub fn object(&self, name: &str) -> Option<&ObjectSchema> {
        self.objects.iter().find(|o| o.name.eq_ignore_ascii_case(name))
    }
}

/// Text and metadata extracted from a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Opaque capability interface over one external system.
#[async_trait]
pub trait SystemGateway: Send + Sync {
    /// Run a query-language string and return matching records.
    async fn run_query(
        &self,
        creds: &Credentials,
        query: &str,
    ) -> Result<RecordSet, GatewayError>;

    /// Submit a batch mutation. Mutates external state; never retried here.
    async fn run_bulk_operation(
        &self,
        creds: &Credentials,
        kind: BulkKind,
        object_type: &str,
        records: &[serde_json::Value],
    ) -> Result<BatchResult, GatewayError>;

    /// Describe one object, or everything available when `object_type`
    /// is `None`. Read-only and safely retryable.
    async fn describe_schema(
        &self,
        creds: &Credentials,
        object_type: Option<&str>,
    ) -> Result<SchemaDescription, GatewayError>;

    /// Extract text from a base64-encoded document.
    async fn extract_document(
        &self,
        creds: &Credentials,
        content_base64: &str,
        file_name: &str,
        file_type: &str,
    ) -> Result<ExtractedDocument, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_kind_from_str() {
        assert_eq!("Upsert".parse::<BulkKind>().unwrap(), BulkKind::Upsert);
        assert!("merge".parse::<BulkKind>().is_err());
    }

    #[test]
    fn test_batch_result_counts() {
        let result = BatchResult {
            job_id: "job-1".into(),
            outcomes: vec![
                RecordOutcome {
                    success: true,
                    record_id: Some("001".into()),
                    message: None,
                    error_code: None,
                },
                RecordOutcome {
                    success: false,
                    record_id: None,
                    message: Some("required field missing".into()),
                    error_code: Some("REQUIRED_FIELD_MISSING".into()),
                },
            ],
        };
        assert_eq!(result.failed_count(), 1);
        assert!(!result.all_succeeded());
    }

    #[test]
    fn test_object_schema_lookup_case_insensitive() {
        let schema = ObjectSchema {
            name: "Contact".into(),
            fields: vec![FieldMetadata {
                name: "Email".into(),
                field_type: "string".into(),
                updateable: true,
            }],
        };
        assert!(schema.field("email").is_some());
        assert!(schema.field("Phone").is_none());
    }
}
