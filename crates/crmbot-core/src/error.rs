use std::path::PathBuf;

/// Core error types for crmbot.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Proposal error: {0}")]
    Proposal(#[from] ProposalError),

    #[error("External system error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No API key configured")]
    NoApiKey,
}

/// Errors from the reasoning backend.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("No API key configured for provider")]
    NoApiKey,

    #[error("{0}")]
    Other(String),
}

/// Errors raised at the tool boundary. Input validation failures are
/// rejected here, before anything reaches the external system.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing identity: tool calls require a non-empty subject id")]
    MissingIdentity,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("External system error: {0}")]
    External(#[from] GatewayError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Proposal error: {0}")]
    Proposal(#[from] ProposalError),
}

impl ToolError {
    /// Whether the orchestrator should abort the turn rather than fold
    /// the error back into the conversation. Identity does not change
    /// mid-turn, so retrying is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ToolError::MissingIdentity
                | ToolError::Credential(CredentialError::MissingIdentity)
                | ToolError::Proposal(ProposalError::MissingIdentity)
        )
    }
}

/// Errors from the credential resolver.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Missing identity: credential lookup requires a non-empty subject id")]
    MissingIdentity,

    #[error("Not connected: no {system} credentials for this account")]
    NotConnected { system: String },

    #[error("Token refresh rejected by {system}: {message}")]
    RefreshFailed { system: String, message: String },

    #[error("Unsupported system: {0}")]
    UnsupportedSystem(String),
}

/// Errors from the chunked upload pipeline and document extraction.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Malformed base64 content: {0}")]
    DecodeError(String),

    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Chunk index {index} out of range for session with {total} chunks")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("Duplicate chunk index {0}")]
    DuplicateChunk(u32),

    #[error("Chunk exceeds maximum size of {max} bytes")]
    ChunkTooLarge { max: usize },

    #[error("Session {id} is {state}, expected {expected}")]
    InvalidState {
        id: String,
        state: &'static str,
        expected: &'static str,
    },

    #[error("Session expired before all chunks arrived")]
    SessionExpired,

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Errors from the proposal engine.
#[derive(Debug, thiserror::Error)]
pub enum ProposalError {
    #[error("Missing identity: proposals require a non-empty subject id")]
    MissingIdentity,

    #[error("Proposal not found: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Proposal has no record changes")]
    Empty,

    #[error("Validation failed with {} issue(s)", .0.len())]
    ValidationFailed(Vec<crate::proposal::ValidationError>),

    #[error("Invalid change: {0}")]
    InvalidChange(String),
}

/// Errors from an external system gateway (wraps provider-side failures).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
