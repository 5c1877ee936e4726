use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::UploadConfig;
use crate::credential::{CredentialResolver, System};
use crate::error::{ToolError, UploadError};
use crate::gateway::SystemGateway;
use crate::upload::UploadPipeline;

use super::{opt_str, require_identity, Tool};

/// Document text extraction. Small payloads go straight to the
/// extractor; anything over the chunking threshold is routed through
/// the upload pipeline.
pub struct DocumentTool {
    sub_id: String,
    system: System,
    resolver: Arc<CredentialResolver>,
    gateway: Arc<dyn SystemGateway>,
    pipeline: Arc<UploadPipeline>,
    config: UploadConfig,
}

impl DocumentTool {
    pub fn new(
        sub_id: impl Into<String>,
        system: System,
        resolver: Arc<CredentialResolver>,
        gateway: Arc<dyn SystemGateway>,
        pipeline: Arc<UploadPipeline>,
        config: UploadConfig,
    ) -> Self {
        Self {
            sub_id: sub_id.into(),
            system,
            resolver,
            gateway,
            pipeline,
            config,
        }
    }
}

#[async_trait]
impl Tool for DocumentTool {
    fn name(&self) -> &str {
        "crm_extract_document"
    }

    fn description(&self) -> &str {
        "Extract readable text from a document (PDF, DOCX, image, \
         plain text). Supply either base64-encoded content inline or \
         a path to a local file."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "Base64-encoded file content"},
                "filePath": {"type": "string", "description": "Path to a local file, used when content is not supplied inline"},
                "fileName": {"type": "string"},
                "fileType": {"type": "string", "description": "MIME type, e.g. application/pdf"}
            }
        })
    }

    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        require_identity(&self.sub_id)?;

        let inline = opt_str(&params, "content").filter(|s| !s.is_empty());
        let file_path = opt_str(&params, "filePath").filter(|s| !s.is_empty());

        // Inline content wins when both forms are present.
        let (content, path_name) = match (inline, file_path) {
            (Some(content), _) => {
                // Validate the encoding up front so a malformed payload
                // never reaches the external system.
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| ToolError::Upload(UploadError::DecodeError(e.to_string())))?;
                (content.to_string(), None)
            }
            (None, Some(path)) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    ToolError::Upload(UploadError::InvalidPayload(format!(
                        "cannot read {path}: {e}"
                    )))
                })?;
                let name = std::path::Path::new(path)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_string());
                (
                    base64::engine::general_purpose::STANDARD.encode(bytes),
                    name,
                )
            }
            (None, None) => {
                return Err(ToolError::Upload(UploadError::InvalidPayload(
                    "no document supplied: pass content or filePath".to_string(),
                )))
            }
        };
        let content = content.as_str();

        let file_name = opt_str(&params, "fileName")
            .or(path_name.as_deref())
            .unwrap_or("document");
        let file_type = opt_str(&params, "fileType").unwrap_or("application/octet-stream");

        let creds = self.resolver.resolve(&self.sub_id, self.system).await?;

        let doc = if content.len() > self.config.chunk_threshold {
            debug!(
                "Payload {} bytes exceeds threshold {}, using chunked path",
                content.len(),
                self.config.chunk_threshold
            );
            let bytes = content.as_bytes();
            let chunk_size = self.config.max_chunk_size;
            let total = bytes.len().div_ceil(chunk_size) as u32;
            let session_id = self.pipeline.create_session(total, file_name, file_type)?;
            for (index, chunk) in bytes.chunks(chunk_size).enumerate() {
                self.pipeline
                    .upload_chunk(&session_id, index as u32, chunk.to_vec())
                    .await?;
            }
            self.pipeline
                .process(&session_id, self.gateway.as_ref(), &creds)
                .await?
        } else {
            self.gateway
                .extract_document(&creds, content, file_name, file_type)
                .await?
        };

        Ok(json!({
            "fileName": doc.file_name,
            "text": doc.text,
        }))
    }
}
