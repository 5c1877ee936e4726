use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::credential::{CredentialResolver, System};
use crate::error::ToolError;
use crate::gateway::SystemGateway;

use super::{opt_str, require_identity, Tool};

/// Schema introspection. Read-only and safely retryable.
pub struct DescribeTool {
    sub_id: String,
    system: System,
    resolver: Arc<CredentialResolver>,
    gateway: Arc<dyn SystemGateway>,
}

impl DescribeTool {
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
impl Tool for DescribeTool {
    fn name(&self) -> &str {
        "crm_describe"
    }

    fn description(&self) -> &str {
        "Describe the structure of a CRM object (fields and types). \
         Omit 'object' to list every available object."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "object": {
                    "type": "string",
                    "description": "Object/table name, e.g. Contact. Omit for the full catalog."
                }
            }
        })
    }

    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        require_identity(&self.sub_id)?;
        let object = opt_str(&params, "object").filter(|s| !s.is_empty());

        let creds = self.resolver.resolve(&self.sub_id, self.system).await?;
        let schema = self.gateway.describe_schema(&creds, object).await?;

        Ok(serde_json::to_value(&schema)
            .map_err(|e| ToolError::InvalidInput(e.to_string()))?)
    }
}
