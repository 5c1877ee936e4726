use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message role in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Reason the reasoning backend stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

/// A tool call requested by the reasoning backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: HashMap<String, serde_json::Value>,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(
        content: Option<String>,
        tool_calls: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content,
            name: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            name: Some(name.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Response from the reasoning backend.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

impl CompletionResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A user conversation turn submitted to the orchestrator.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Opaque tenant/user identity. Required; never defaulted.
    pub sub_id: String,
    pub message: String,
    pub system: crate::credential::System,
}

impl TurnRequest {
    pub fn new(
        sub_id: impl Into<String>,
        message: impl Into<String>,
        system: crate::credential::System,
    ) -> Self {
        Self {
            sub_id: sub_id.into(),
            message: message.into(),
            system,
        }
    }
}

/// The recorded outcome of one tool invocation within a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub call_id: String,
    pub tool: String,
    pub ok: bool,
    pub output: serde_json::Value,
}

/// One agent iteration: the tool calls issued, their results, and the
/// finish reason reported by the backend. Append-only within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStep {
    pub index: u32,
    pub tool_calls: Vec<ToolCall>,
    pub results: Vec<ToolResultRecord>,
    pub finish_reason: FinishReason,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Backend produced a final answer.
    Completed,
    /// Step budget exhausted before a final answer. Not an error.
    Incomplete,
    /// Unrecoverable error aborted the loop; partial transcript retained.
    Aborted,
}

/// Full record of one orchestrated turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub steps: Vec<ConversationStep>,
    pub reply: Option<String>,
    pub status: TurnStatus,
}

/// Incremental event streamed to the caller while a turn executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StepStarted {
        step: u32,
    },
    ToolCallStarted {
        step: u32,
        call_id: String,
        tool: String,
    },
    ToolCallFinished {
        step: u32,
        call_id: String,
        tool: String,
        ok: bool,
    },
    Reply {
        content: String,
    },
    Incomplete {
        steps_used: u32,
    },
    Aborted {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn test_finish_reason_serde() {
        let json = serde_json::to_string(&FinishReason::ToolCalls).unwrap();
        assert_eq!(json, "\"tool_calls\"");
        let fr: FinishReason = serde_json::from_str("\"stop\"").unwrap();
        assert_eq!(fr, FinishReason::Stop);
    }

    #[test]
    fn test_message_constructors() {
        let sys = Message::system("You are a CRM assistant");
        assert_eq!(sys.role, Role::System);

        let tool = Message::tool_result("call_1", "crm_query", "{\"records\":[]}");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool.name.as_deref(), Some("crm_query"));
    }

    #[test]
    fn test_completion_response_has_tool_calls() {
        let resp = CompletionResponse {
            content: Some("done".into()),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        };
        assert!(!resp.has_tool_calls());
    }

    #[test]
    fn test_turn_status_serde() {
        let json = serde_json::to_string(&TurnStatus::Incomplete).unwrap();
        assert_eq!(json, "\"incomplete\"");
    }

    #[test]
    fn test_agent_event_tagged_serde() {
        let ev = AgentEvent::ToolCallFinished {
            step: 2,
            call_id: "c1".into(),
            tool: "crm_query".into(),
            ok: true,
        };
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_call_finished");
        assert_eq!(v["step"], 2);
    }
}
