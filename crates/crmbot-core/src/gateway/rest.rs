use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::credential::Credentials;
use crate::error::GatewayError;
use crate::util::http;

use super::{
    BatchResult, BulkKind, ExtractedDocument, FieldMetadata, ObjectSchema, RecordOutcome,
    RecordSet, SchemaDescription, SystemGateway,
};

/// Generic REST gateway. Maps the capability interface onto the
/// tenant-specific API base carried in the credentials. Vendor quirks
/// beyond this thin mapping belong to the integration layer, not here.
pub struct RestGateway {
    api_version: String,
}

impl RestGateway {
    pub fn new(api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
        }
    }

    fn base_url(&self, creds: &Credentials) -> Result<String, GatewayError> {
        let instance = creds
            .instance_url
            .as_deref()
            .ok_or_else(|| GatewayError::Other("credentials carry no instance URL".into()))?;
        Ok(format!(
            "{}/services/data/{}",
            instance.trim_end_matches('/'),
            self.api_version
        ))
    }

    async fn check_status(
        response: reqwest::Response,
    ) -> Result<serde_json::Value, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(response.json().await?)
    }
}

impl Default for RestGateway {
    fn default() -> Self {
        Self::new("v1")
    }
}

#[async_trait]
impl SystemGateway for RestGateway {
    async fn run_query(
        &self,
        creds: &Credentials,
        query: &str,
    ) -> Result<RecordSet, GatewayError> {
        let url = format!("{}/query", self.base_url(creds)?);
        debug!("REST query: {}", query);

        let response = http::client()
            .get(&url)
            .bearer_auth(&creds.access_token)
            .query(&[("q", query)])
            .send()
            .await?;

        let data = Self::check_status(response).await?;
        let records = data
            .get("records")
            .and_then(|r| r.as_array())
            .cloned()
            .ok_or_else(|| GatewayError::Parse("no records array in response".into()))?;
        let done = data.get("done").and_then(|v| v.as_bool()).unwrap_or(true);

        Ok(RecordSet { records, done })
    }

    async fn run_bulk_operation(
        &self,
        creds: &Credentials,
        kind: BulkKind,
        object_type: &str,
        records: &[serde_json::Value],
    ) -> Result<BatchResult, GatewayError> {
        let url = format!("{}/composite/batch", self.base_url(creds)?);
        debug!(
            "REST bulk {} on {} ({} records)",
            kind,
            object_type,
            records.len()
        );

        let body = json!({
            "operation": kind.as_str(),
            "object": object_type,
            "records": records,
        });

        let response = http::client()
            .post(&url)
            .bearer_auth(&creds.access_token)
            .json(&body)
            .send()
            .await?;

        let data = Self::check_status(response).await?;
        let job_id = data
            .get("jobId")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let outcomes = data
            .get("results")
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| RecordOutcome {
                        success: item.get("success").and_then(|v| v.as_bool()).unwrap_or(false),
                        record_id: item
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                        message: item
                            .get("message")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                        error_code: item
                            .get("errorCode")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(BatchResult { job_id, outcomes })
    }

    async fn describe_schema(
        &self,
        creds: &Credentials,
        object_type: Option<&str>,
    ) -> Result<SchemaDescription, GatewayError> {
        let url = match object_type {
            Some(obj) => format!("{}/sobjects/{}/describe", self.base_url(creds)?, obj),
            None => format!("{}/sobjects", self.base_url(creds)?),
        };

        let response = http::client()
            .get(&url)
            .bearer_auth(&creds.access_token)
            .send()
            .await?;

        let data = Self::check_status(response).await?;
        let raw_objects: Vec<serde_json::Value> = match data.get("sobjects") {
            Some(list) => list.as_array().cloned().unwrap_or_default(),
            None => vec![data],
        };

        let objects = raw_objects
            .iter()
            .map(|obj| ObjectSchema {
                name: obj
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                fields: obj
                    .get("fields")
                    .and_then(|f| f.as_array())
                    .map(|fields| {
                        fields
                            .iter()
                            .map(|f| FieldMetadata {
                                name: f
                                    .get("name")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                field_type: f
                                    .get("type")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("string")
                                    .to_string(),
                                updateable: f
                                    .get("updateable")
                                    .and_then(|v| v.as_bool())
                                    .unwrap_or(false),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();

        Ok(SchemaDescription { objects })
    }

    async fn extract_document(
        &self,
        creds: &Credentials,
        content_base64: &str,
        file_name: &str,
        file_type: &str,
    ) -> Result<ExtractedDocument, GatewayError> {
        let url = format!("{}/documents/extract", self.base_url(creds)?);
        debug!("REST extract: {} ({})", file_name, file_type);

        let body = json!({
            "content": content_base64,
            "fileName": file_name,
            "fileType": file_type,
        });

        let response = http::client()
            .post(&url)
            .bearer_auth(&creds.access_token)
            .json(&body)
            .send()
            .await?;

        let data = Self::check_status(response).await?;
        let text = data
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Parse("no text in extraction response".into()))?
            .to_string();

        Ok(ExtractedDocument {
            text,
            file_name: Some(file_name.to_string()),
        })
    }
}
