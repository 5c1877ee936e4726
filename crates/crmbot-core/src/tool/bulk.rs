use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::credential::{CredentialResolver, System};
use crate::error::ToolError;
use crate::gateway::{BulkKind, SystemGateway};

use super::{require_identity, require_str, Tool};

/// Bulk mutation against the external system. Mutates external state;
/// never retried automatically. Partial batch failures stay visible in
/// the per-record outcomes.
pub struct BulkTool {
    sub_id: String,
    system: System,
    resolver: Arc<CredentialResolver>,
    gateway: Arc<dyn SystemGateway>,
}

impl BulkTool {
    pub fn new(
        sub_id: impl Into<String>,
        system: System,
        resolver: Arc<CredentialResolver>,
        gateway: Arc<dyn SystemGateway>,
    ) -> Self {
        Self {
            sub_id: sub_id.into(),
            system,
            resolver,
            gateway,
        }
    }
}

#[async_trait]
impl Tool for BulkTool {
    fn name(&self) -> &str {
        "crm_bulk"
    }

    fn description(&self) -> &str {
        "Submit a bulk insert/update/upsert/delete of records. This \
         mutates external data and is not retried; prefer proposing \
         changes for review unless the user asked for a direct write."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["insert", "update", "upsert", "delete"]
                },
                "object": {"type": "string", "description": "Target object type"},
                "records": {
                    "type": "array",
                    "items": {"type": "object"},
                    "description": "Record payloads; update/delete records carry an Id"
                }
            },
            "required": ["operation", "object", "records"]
        })
    }

    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        require_identity(&self.sub_id)?;

        let operation: BulkKind = require_str(&params, "operation")?
            .parse()
            .map_err(ToolError::InvalidInput)?;
        let object = require_str(&params, "object")?;

        let records = params
            .get("records")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::InvalidInput("'records' parameter is required".into()))?;
        if records.is_empty() {
            return Err(ToolError::InvalidInput(
                "'records' must not be empty".into(),
            ));
        }

        let creds = self.resolver.resolve(&self.sub_id, self.system).await?;
        let batch = self
            .gateway
            .run_bulk_operation(&creds, operation, object, records)
            .await?;

        let failed = batch.failed_count();
        Ok(json!({
            "jobId": batch.job_id,
            "total": batch.outcomes.len(),
            "failed": failed,
            "partialFailure": failed > 0 && failed < batch.outcomes.len(),
            "outcomes": batch.outcomes,
        }))
    }
}
