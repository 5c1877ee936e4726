use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::credential::System;
use crate::error::ToolError;
use crate::proposal::{ChangeOperation, FieldChange, ProposalEngine, RecordChange};
use crate::util::prefixed_id;

use super::{require_identity, require_str, Tool};

/// Wire shape of one proposed change as the model supplies it.
#[derive(Debug, Deserialize)]
struct ChangeInput {
    operation: ChangeOperation,
    object: String,
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    fields: Vec<FieldInput>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FieldInput {
    field: String,
    #[serde(default)]
    before: Option<serde_json::Value>,
    after: serde_json::Value,
}

/// Turns intended record changes into a reviewable proposal instead of
/// writing them directly. The proposal stops at `proposed`; approval
/// and execution go through the lifecycle API with a human in the loop.
pub struct ProposeTool {
    sub_id: String,
    system: System,
    engine: Arc<ProposalEngine>,
}

impl ProposeTool {
    pub fn new(sub_id: impl Into<String>, system: System, engine: Arc<ProposalEngine>) -> Self {
        Self {
            sub_id: sub_id.into(),
            system,
            engine,
        }
    }
}

#[async_trait]
impl Tool for ProposeTool {
    fn name(&self) -> &str {
        "crm_propose_changes"
    }

    fn description(&self) -> &str {
        "Propose a batch of record changes (create/update/delete) for \
         user review. Use this instead of crm_bulk whenever the user \
         has not explicitly asked for an immediate write."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "Human-readable summary of the batch"},
                "changes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "operation": {"type": "string", "enum": ["create", "update", "delete"]},
                            "object": {"type": "string"},
                            "record_id": {"type": "string", "description": "Required for update/delete"},
                            "fields": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "field": {"type": "string"},
                                        "before": {},
                                        "after": {}
                                    },
                                    "required": ["field", "after"]
                                }
                            },
                            "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                        },
                        "required": ["operation", "object"]
                    }
                }
            },
            "required": ["summary", "changes"]
        })
    }

    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        require_identity(&self.sub_id)?;

        let summary = require_str(&params, "summary")?;
        let raw_changes = params
            .get("changes")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::InvalidInput("'changes' parameter is required".into()))?;
        if raw_changes.is_empty() {
            return Err(ToolError::InvalidInput("'changes' must not be empty".into()));
        }

        let mut changes = Vec::with_capacity(raw_changes.len());
        for raw in raw_changes {
            let input: ChangeInput = serde_json::from_value(raw.clone())
                .map_err(|e| ToolError::InvalidInput(format!("malformed change: {e}")))?;
            changes.push(RecordChange {
                operation_id: prefixed_id("op"),
                operation: input.operation,
                object_type: input.object,
                record_id: input.record_id,
                field_changes: input
                    .fields
                    .into_iter()
                    .map(|f| FieldChange {
                        field_name: f.field,
                        before: f.before,
                        after: f.after,
                    })
                    .collect(),
                confidence: input.confidence,
            });
        }

        let proposal = self.engine.create(&self.sub_id, self.system, summary)?;
        for change in changes {
            self.engine.add_change(&proposal.id, change)?;
        }
        let submitted = self.engine.submit(&proposal.id)?;
        info!(
            "Proposed {} change(s) as {}",
            submitted.changes.len(),
            submitted.id
        );

        Ok(json!({
            "proposalId": submitted.id,
            "status": submitted.status,
            "changeCount": submitted.changes.len(),
            "summary": submitted.summary,
        }))
    }
}
