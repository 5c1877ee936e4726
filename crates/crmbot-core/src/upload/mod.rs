//! Chunked upload pipeline for large document payloads.
//!
//! Chunks for one session may arrive out of order and concurrently;
//! each session's state lives behind an async mutex so the completion
//! check cannot race. Duplicate chunk indices are rejected, not
//! overwritten. Sessions left collecting past their TTL are swept and
//! never reassembled.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::credential::Credentials;
use crate::error::UploadError;
use crate::gateway::{ExtractedDocument, SystemGateway};
use crate::util::prefixed_id;

/// Lifecycle of one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Collecting,
    Ready,
    Reassembling,
    Done,
    Failed,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            SessionState::Collecting => "collecting",
            SessionState::Ready => "ready",
            SessionState::Reassembling => "reassembling",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        }
    }
}

struct SessionInner {
    state: SessionState,
    total_chunks: u32,
    received: u32,
    chunks: Vec<Option<Vec<u8>>>,
    file_name: String,
    file_type: String,
}

/// One upload session. The byte buffer is owned exclusively by the
/// session until reassembly.
pub struct UploadSession {
    pub id: String,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

/// Acknowledgement returned for each accepted chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkAck {
    pub session_id: String,
    pub received: u32,
    pub total: u32,
    /// All chunks have arrived; the session is ready for reassembly.
    pub complete: bool,
}

/// Accumulates chunks per session and reassembles + extracts once the
/// final distinct chunk index arrives.
pub struct UploadPipeline {
    sessions: DashMap<String, Arc<UploadSession>>,
    config: UploadConfig,
}

impl UploadPipeline {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    /// Create a session expecting `total_chunks` uploads.
    pub fn create_session(
        &self,
        total_chunks: u32,
        file_name: &str,
        file_type: &str,
    ) -> Result<String, UploadError> {
        if total_chunks < 1 {
            return Err(UploadError::InvalidPayload(
                "totalChunks must be at least 1".to_string(),
            ));
        }

        self.sweep_expired();

        let id = prefixed_id("upld");
        let session = UploadSession {
            id: id.clone(),
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Collecting,
                total_chunks,
                received: 0,
                chunks: vec![None; total_chunks as usize],
                file_name: file_name.to_string(),
                file_type: file_type.to_string(),
            }),
        };
        self.sessions.insert(id.clone(), Arc::new(session));
        debug!("Created upload session {} ({} chunks)", id, total_chunks);
        Ok(id)
    }

    /// Accept one chunk. Returns `complete = true` on the ack for the
    /// final distinct index.
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        index: u32,
        data: Vec<u8>,
    ) -> Result<ChunkAck, UploadError> {
        if data.len() > self.config.max_chunk_size {
            return Err(UploadError::ChunkTooLarge {
                max: self.config.max_chunk_size,
            });
        }

        let session = self
            .sessions
            .get(session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

        if self.is_expired(&session) {
            self.sessions.remove(session_id);
            return Err(UploadError::SessionExpired);
        }

        let mut inner = session.inner.lock().await;

        if inner.state != SessionState::Collecting {
            return Err(UploadError::InvalidState {
                id: session_id.to_string(),
                state: inner.state.as_str(),
                expected: "collecting",
            });
        }
        if index >= inner.total_chunks {
            return Err(UploadError::ChunkOutOfRange {
                index,
                total: inner.total_chunks,
            });
        }
        if inner.chunks[index as usize].is_some() {
            return Err(UploadError::DuplicateChunk(index));
        }

        inner.chunks[index as usize] = Some(data);
        inner.received += 1;

        let complete = inner.received == inner.total_chunks;
        if complete {
            inner.state = SessionState::Ready;
            debug!("Upload session {} complete", session_id);
        }

        Ok(ChunkAck {
            session_id: session_id.to_string(),
            received: inner.received,
            total: inner.total_chunks,
            complete,
        })
    }

    /// Reassemble a ready session and run extraction. The session is
    /// discarded afterwards either way; a failed extraction exposes no
    /// partial result.
    pub async fn process(
        &self,
        session_id: &str,
        gateway: &dyn SystemGateway,
        creds: &Credentials,
    ) -> Result<ExtractedDocument, UploadError> {
        let session = self
            .sessions
            .get(session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

        let (payload, file_name, file_type) = {
            let mut inner = session.inner.lock().await;
            if inner.state != SessionState::Ready {
                return Err(UploadError::InvalidState {
                    id: session_id.to_string(),
                    state: inner.state.as_str(),
                    expected: "ready",
                });
            }
            inner.state = SessionState::Reassembling;

            let mut buffer = Vec::new();
            for chunk in inner.chunks.iter_mut() {
                // Every slot is Some once the state reached Ready.
                buffer.extend_from_slice(chunk.as_deref().unwrap_or_default());
                *chunk = None;
            }
            (buffer, inner.file_name.clone(), inner.file_type.clone())
        };

        let result = self
            .extract(&payload, &file_name, &file_type, gateway, creds)
            .await;

        self.sessions.remove(session_id);
        match &result {
            Ok(_) => info!("Upload session {} reassembled and extracted", session_id),
            Err(e) => warn!("Upload session {} failed: {}", session_id, e),
        }
        result
    }

    async fn extract(
        &self,
        payload: &[u8],
        file_name: &str,
        file_type: &str,
        gateway: &dyn SystemGateway,
        creds: &Credentials,
    ) -> Result<ExtractedDocument, UploadError> {
        let content = std::str::from_utf8(payload)
            .map_err(|e| UploadError::DecodeError(e.to_string()))?;
        // Chunks carry slices of the base64 payload; validate before
        // handing it to the extractor.
        base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| UploadError::DecodeError(e.to_string()))?;

        gateway
            .extract_document(creds, content, file_name, file_type)
            .await
            .map_err(|e| UploadError::ExtractionFailed(e.to_string()))
    }

    fn is_expired(&self, session: &UploadSession) -> bool {
        session.created_at + Duration::seconds(self.config.session_ttl_secs as i64) < Utc::now()
    }

    /// Drop sessions that sat collecting past their TTL. Returns how
    /// many were removed.
    pub fn sweep_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            if self.is_expired(session) {
                // A locked session is in active use; leave it alone.
                match session.inner.try_lock() {
                    Ok(inner) => inner.state != SessionState::Collecting,
                    Err(_) => true,
                }
            } else {
                true
            }
        });
        let removed = before - self.sessions.len();
        if removed > 0 {
            info!("Swept {} expired upload session(s)", removed);
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
