use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::QueryConfig;
use crate::credential::{CredentialResolver, System};
use crate::error::ToolError;
use crate::gateway::SystemGateway;

use super::{opt_str, opt_u64, require_identity, require_str, Tool};

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());
static FIELD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.]*$").unwrap());

/// Parameterized data query. Read-only.
pub struct QueryTool {
    sub_id: String,
    system: System,
    resolver: Arc<CredentialResolver>,
    gateway: Arc<dyn SystemGateway>,
    config: QueryConfig,
}

impl QueryTool {
    pub fn new(
        sub_id: impl Into<String>,
        system: System,
        resolver: Arc<CredentialResolver>,
        gateway: Arc<dyn SystemGateway>,
        config: QueryConfig,
    ) -> Self {
        Self {
            sub_id: sub_id.into(),
            system,
            resolver,
            gateway,
            config,
        }
    }

    fn build_query(
        &self,
        object: &str,
        fields: &[String],
        filter: Option<&str>,
        order_by: Option<&str>,
        limit: u32,
    ) -> String {
        let mut query = format!("SELECT {} FROM {}", fields.join(", "), object);
        if let Some(filter) = filter {
            query.push_str(" WHERE ");
            query.push_str(filter);
        }
        if let Some(order_by) = order_by {
            query.push_str(" ORDER BY ");
            query.push_str(order_by);
        }
        query.push_str(&format!(" LIMIT {limit}"));
        query
    }
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        "crm_query"
    }

    fn description(&self) -> &str {
        "Query records from a CRM object with an optional filter and \
         ordering. An empty filter string means no filter; omit the \
         parameter entirely unless you intend to filter."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "object": {"type": "string", "description": "Object to query, e.g. Contact"},
                "fields": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Fields to select (default: Id, Name)"
                },
                "filter": {"type": "string", "description": "Filter expression (WHERE clause body)"},
                "orderBy": {"type": "string", "description": "Ordering expression"},
                "limit": {"type": "integer", "description": "Max rows (default 100, cap 200)", "minimum": 1}
            },
            "required": ["object"]
        })
    }

    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        require_identity(&self.sub_id)?;

        let object = require_str(&params, "object")?;
        if !IDENT_RE.is_match(object) {
            return Err(ToolError::InvalidInput(format!(
                "invalid object name: {object}"
            )));
        }

        let fields: Vec<String> = match params.get("fields").and_then(|v| v.as_array()) {
            Some(list) if !list.is_empty() => {
                let mut fields = Vec::with_capacity(list.len());
                for item in list {
                    let name = item.as_str().ok_or_else(|| {
                        ToolError::InvalidInput("'fields' must be strings".to_string())
                    })?;
                    if !FIELD_RE.is_match(name) {
                        return Err(ToolError::InvalidInput(format!(
                            "invalid field name: {name}"
                        )));
                    }
                    fields.push(name.to_string());
                }
                fields
            }
            _ => vec!["Id".to_string(), "Name".to_string()],
        };

        // An empty-but-present filter string is treated as no filter.
        let filter = opt_str(&params, "filter").filter(|s| !s.trim().is_empty());
        let order_by = opt_str(&params, "orderBy").filter(|s| !s.trim().is_empty());

        // Clamp in u64 before narrowing so an oversized value caps
        // instead of wrapping.
        let limit = opt_u64(&params, "limit")
            .map(|l| l.min(self.config.max_limit as u64) as u32)
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit)
            .max(1);

        let query = self.build_query(object, &fields, filter, order_by, limit);

        let creds = self.resolver.resolve(&self.sub_id, self.system).await?;
        let result = self.gateway.run_query(&creds, &query).await?;

        Ok(json!({
            "count": result.records.len(),
            "done": result.done,
            "records": result.records,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::credential::{CredentialStore, Credentials, MemoryCredentialStore, NullRefresher};
    use crate::error::GatewayError;
    use crate::gateway::{
        BatchResult, BulkKind, ExtractedDocument, RecordSet, SchemaDescription,
    };

    /// Gateway that records the query string and returns `n` rows.
    struct RecordingGateway {
        last_query: Mutex<Option<String>>,
        rows: usize,
    }

    #[async_trait]
    impl SystemGateway for RecordingGateway {
        async fn run_query(
            &self,
            _creds: &Credentials,
            query: &str,
        ) -> Result<RecordSet, GatewayError> {
            *self.last_query.lock().unwrap() = Some(query.to_string());
            Ok(RecordSet {
                records: (0..self.rows).map(|i| json!({"Id": format!("{i}")})).collect(),
                done: true,
            })
        }

        async fn run_bulk_operation(
            &self,
            _creds: &Credentials,
            _kind: BulkKind,
            _object_type: &str,
            _records: &[serde_json::Value],
        ) -> Result<BatchResult, GatewayError> {
            unimplemented!()
        }

        async fn describe_schema(
            &self,
            _creds: &Credentials,
            _object_type: Option<&str>,
        ) -> Result<SchemaDescription, GatewayError> {
            unimplemented!()
        }

        async fn extract_document(
            &self,
            _creds: &Credentials,
            _content_base64: &str,
            _file_name: &str,
            _file_type: &str,
        ) -> Result<ExtractedDocument, GatewayError> {
            unimplemented!()
        }
    }

    fn tool_with(gateway: Arc<RecordingGateway>) -> QueryTool {
        let store = Arc::new(MemoryCredentialStore::new());
        store.put("user-1", System::Salesforce, Credentials::new("tok"));
        let resolver = Arc::new(CredentialResolver::new(store, Arc::new(NullRefresher)));
        QueryTool::new(
            "user-1",
            System::Salesforce,
            resolver,
            gateway,
            QueryConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_query_without_filter() {
        let gateway = Arc::new(RecordingGateway {
            last_query: Mutex::new(None),
            rows: 5,
        });
        let tool = tool_with(gateway.clone());

        let mut params = HashMap::new();
        params.insert("object".to_string(), json!("Contact"));
        params.insert("limit".to_string(), json!(10));

        let out = tool.execute(params).await.unwrap();
        assert_eq!(out["count"], 5);

        let query = gateway.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query, "SELECT Id, Name FROM Contact LIMIT 10");
        assert!(!query.contains("WHERE"));
    }

    #[tokio::test]
    async fn test_empty_filter_means_no_filter() {
        let gateway = Arc::new(RecordingGateway {
            last_query: Mutex::new(None),
            rows: 0,
        });
        let tool = tool_with(gateway.clone());

        let mut params = HashMap::new();
        params.insert("object".to_string(), json!("Contact"));
        params.insert("filter".to_string(), json!(""));

        tool.execute(params).await.unwrap();
        let query = gateway.last_query.lock().unwrap().clone().unwrap();
        assert!(!query.contains("WHERE"));
    }

    #[tokio::test]
    async fn test_limit_capped() {
        let gateway = Arc::new(RecordingGateway {
            last_query: Mutex::new(None),
            rows: 0,
        });
        let tool = tool_with(gateway.clone());

        let mut params = HashMap::new();
        params.insert("object".to_string(), json!("Account"));
        params.insert("limit".to_string(), json!(5000));

        tool.execute(params).await.unwrap();
        let query = gateway.last_query.lock().unwrap().clone().unwrap();
        assert!(query.ends_with("LIMIT 200"));
    }

    #[tokio::test]
    async fn test_limit_beyond_u32_caps_instead_of_wrapping() {
        let gateway = Arc::new(RecordingGateway {
            last_query: Mutex::new(None),
            rows: 0,
        });
        let tool = tool_with(gateway.clone());

        let mut params = HashMap::new();
        params.insert("object".to_string(), json!("Account"));
        params.insert("limit".to_string(), json!(4_294_967_296u64));

        tool.execute(params).await.unwrap();
        let query = gateway.last_query.lock().unwrap().clone().unwrap();
        assert!(query.ends_with("LIMIT 200"));
    }

    #[tokio::test]
    async fn test_filter_and_ordering_applied() {
        let gateway = Arc::new(RecordingGateway {
            last_query: Mutex::new(None),
            rows: 1,
        });
        let tool = tool_with(gateway.clone());

        let mut params = HashMap::new();
        params.insert("object".to_string(), json!("Contact"));
        params.insert("filter".to_string(), json!("Email != null"));
        params.insert("orderBy".to_string(), json!("Name ASC"));

        tool.execute(params).await.unwrap();
        let query = gateway.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(
            query,
            "SELECT Id, Name FROM Contact WHERE Email != null ORDER BY Name ASC LIMIT 100"
        );
    }

    #[tokio::test]
    async fn test_invalid_object_rejected() {
        let gateway = Arc::new(RecordingGateway {
            last_query: Mutex::new(None),
            rows: 0,
        });
        let tool = tool_with(gateway.clone());

        let mut params = HashMap::new();
        params.insert("object".to_string(), json!("Contact; DROP TABLE"));
        let err = tool.execute(params).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
        // Nothing reached the gateway
        assert!(gateway.last_query.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_object_rejected() {
        let gateway = Arc::new(RecordingGateway {
            last_query: Mutex::new(None),
            rows: 0,
        });
        let tool = tool_with(gateway);
        let err = tool.execute(HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
