//! The agent loop: turns a user message into a bounded sequence of
//! tool invocations against one external system, streaming events as
//! it goes.
//!
//! Steps execute strictly sequentially; tool calls within a step are
//! serialized because the backend cannot assume concurrent tool
//! execution. Termination: final answer, step budget exhaustion
//! (surfaced as incomplete, not an error), or an unrecoverable tool
//! error with the partial transcript preserved.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::TurnBus;
use crate::config::Config;
use crate::credential::{CredentialResolver, System};
use crate::gateway::SystemGateway;
use crate::proposal::ProposalEngine;
use crate::provider::ReasoningProvider;
use crate::tool::bulk::BulkTool;
use crate::tool::describe::DescribeTool;
use crate::tool::document::DocumentTool;
use crate::tool::propose::ProposeTool;
use crate::tool::query::QueryTool;
use crate::tool::ToolRegistry;
use crate::types::{
    AgentEvent, ConversationStep, FinishReason, Message, ToolResultRecord, Transcript,
    TurnRequest, TurnStatus,
};
use crate::upload::UploadPipeline;
use crate::util::truncate_string;

/// The orchestration engine. One instance serves many concurrent
/// turns; each turn gets its own tool registry bound to the caller's
/// identity.
pub struct Orchestrator {
    provider: Arc<dyn ReasoningProvider>,
    resolver: Arc<CredentialResolver>,
    gateway: Arc<dyn SystemGateway>,
    proposals: Arc<ProposalEngine>,
    uploads: Arc<UploadPipeline>,
    config: Config,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        resolver: Arc<CredentialResolver>,
        gateway: Arc<dyn SystemGateway>,
        proposals: Arc<ProposalEngine>,
        uploads: Arc<UploadPipeline>,
        config: Config,
    ) -> Self {
        Self {
            provider,
            resolver,
            gateway,
            proposals,
            uploads,
            config,
        }
    }

    /// Build the tool set for one turn, each tool bound to the
    /// caller's identity.
    fn build_registry(&self, sub_id: &str, system: System) -> Arc<ToolRegistry> {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(DescribeTool::new(
            sub_id,
            system,
            self.resolver.clone(),
            self.gateway.clone(),
        )));
        tools.register(Arc::new(QueryTool::new(
            sub_id,
            system,
            self.resolver.clone(),
            self.gateway.clone(),
            self.config.query.clone(),
        )));
        tools.register(Arc::new(BulkTool::new(
            sub_id,
            system,
            self.resolver.clone(),
            self.gateway.clone(),
        )));
        tools.register(Arc::new(DocumentTool::new(
            sub_id,
            system,
            self.resolver.clone(),
            self.gateway.clone(),
            self.uploads.clone(),
            self.config.upload.clone(),
        )));
        tools.register(Arc::new(ProposeTool::new(
            sub_id,
            system,
            self.proposals.clone(),
        )));
        tools
    }

    fn system_prompt(system: System) -> String {
        format!(
            "You are an assistant for a team working in {system}. You can \
             describe object schemas, query records, extract text from \
             documents, and propose or apply record changes. Prefer \
             proposing changes for review over direct bulk writes. Answer \
             with the data you retrieved; do not invent records."
        )
    }

    /// Execute one conversation turn, streaming [`AgentEvent`]s to
    /// `events` as they are produced. The transcript is always
    /// returned, partial or not. A closed event channel means the
    /// caller disconnected; the in-flight step finishes and the loop
    /// stops.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<AgentEvent>,
    ) -> Transcript {
        let tools = self.build_registry(&request.sub_id, request.system);
        info!(
            "Turn started for sub {} against {} ({} tools)",
            request.sub_id,
            request.system,
            tools.len()
        );

        let mut messages = vec![
            Message::system(Self::system_prompt(request.system)),
            Message::user(&request.message),
        ];
        let mut steps: Vec<ConversationStep> = Vec::new();
        let max_steps = self.config.agent.max_steps;

        for index in 0..max_steps {
            if events.send(AgentEvent::StepStarted { step: index }).await.is_err() {
                warn!("Caller disconnected; aborting turn at step {}", index);
                return Transcript {
                    steps,
                    reply: None,
                    status: TurnStatus::Aborted,
                };
            }

            let defs = tools.get_definitions();
            let response = match self
                .provider
                .chat(
                    &messages,
                    Some(&defs),
                    &self.config.agent.model,
                    self.config.agent.max_tokens,
                    self.config.agent.temperature,
                )
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!("Reasoning backend failed at step {}: {}", index, e);
                    steps.push(ConversationStep {
                        index,
                        tool_calls: Vec::new(),
                        results: Vec::new(),
                        finish_reason: FinishReason::Error,
                    });
                    events
                        .send(AgentEvent::Aborted {
                            error: e.to_string(),
                        })
                        .await
                        .ok();
                    return Transcript {
                        steps,
                        reply: None,
                        status: TurnStatus::Aborted,
                    };
                }
            };

            if !response.has_tool_calls() {
                let reply = response
                    .content
                    .unwrap_or_else(|| "I have nothing further to add.".to_string());
                steps.push(ConversationStep {
                    index,
                    tool_calls: Vec::new(),
                    results: Vec::new(),
                    finish_reason: FinishReason::Stop,
                });
                events
                    .send(AgentEvent::Reply {
                        content: reply.clone(),
                    })
                    .await
                    .ok();
                info!("Turn completed after {} step(s)", index + 1);
                return Transcript {
                    steps,
                    reply: Some(reply),
                    status: TurnStatus::Completed,
                };
            }

            // Record the assistant's tool-call message for the next round.
            let tool_call_dicts: Vec<serde_json::Value> = response
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": serde_json::to_string(&tc.arguments)
                                .unwrap_or_else(|_| "{}".to_string()),
                        }
                    })
                })
                .collect();
            messages.push(Message::assistant_with_tool_calls(
                response.content.clone(),
                tool_call_dicts,
            ));

            // Serialized tool execution within the step.
            let mut results: Vec<ToolResultRecord> = Vec::new();
            for tc in &response.tool_calls {
                let args_preview = Self::format_tool_args(&tc.arguments);
                info!("Executing: {}({})", tc.name, args_preview);
                events
                    .send(AgentEvent::ToolCallStarted {
                        step: index,
                        call_id: tc.id.clone(),
                        tool: tc.name.clone(),
                    })
                    .await
                    .ok();

                let start = std::time::Instant::now();
                let outcome = tools.execute(&tc.name, tc.arguments.clone()).await;
                debug!(
                    "{} finished in {:.2}s",
                    tc.name,
                    start.elapsed().as_secs_f64()
                );

                let (ok, output) = match outcome {
                    Ok(value) => (true, value),
                    Err(e) if e.is_fatal() => {
                        error!("Fatal tool error in {}: {}", tc.name, e);
                        results.push(ToolResultRecord {
                            call_id: tc.id.clone(),
                            tool: tc.name.clone(),
                            ok: false,
                            output: json!({"error": e.to_string()}),
                        });
                        steps.push(ConversationStep {
                            index,
                            tool_calls: response.tool_calls.clone(),
                            results,
                            finish_reason: FinishReason::Error,
                        });
                        events
                            .send(AgentEvent::Aborted {
                                error: e.to_string(),
                            })
                            .await
                            .ok();
                        return Transcript {
                            steps,
                            reply: None,
                            status: TurnStatus::Aborted,
                        };
                    }
                    Err(e) => {
                        // Recoverable: fold back so the model can adjust.
                        warn!("Tool {} failed: {}", tc.name, e);
                        (false, json!({"error": e.to_string()}))
                    }
                };

                messages.push(Message::tool_result(&tc.id, &tc.name, output.to_string()));
                events
                    .send(AgentEvent::ToolCallFinished {
                        step: index,
                        call_id: tc.id.clone(),
                        tool: tc.name.clone(),
                        ok,
                    })
                    .await
                    .ok();
                results.push(ToolResultRecord {
                    call_id: tc.id.clone(),
                    tool: tc.name.clone(),
                    ok,
                    output,
                });
            }

            steps.push(ConversationStep {
                index,
                tool_calls: response.tool_calls,
                results,
                finish_reason: FinishReason::ToolCalls,
            });
        }

        // Budget exhausted: bounded incompleteness, not a failure.
        info!("Turn hit step budget of {}", max_steps);
        events
            .send(AgentEvent::Incomplete {
                steps_used: max_steps,
            })
            .await
            .ok();
        Transcript {
            steps,
            reply: None,
            status: TurnStatus::Incomplete,
        }
    }

    /// Spawn a turn as its own task, returning the event receiver and
    /// a handle resolving to the transcript. This is the streaming
    /// endpoint the transport layer consumes.
    pub fn spawn_turn(
        self: &Arc<Self>,
        request: TurnRequest,
    ) -> (
        mpsc::Receiver<AgentEvent>,
        tokio::task::JoinHandle<Transcript>,
    ) {
        let (tx, rx) = TurnBus::new(64).split();
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.run_turn(request, tx).await });
        (rx, handle)
    }

    /// Format tool arguments for logging (abbreviated to avoid clutter).
    fn format_tool_args(args: &HashMap<String, serde_json::Value>) -> String {
        if args.is_empty() {
            return String::new();
        }

        let mut parts = Vec::new();
        for (key, value) in args.iter().take(3) {
            let value_str = match value {
                serde_json::Value::String(s) => format!("\"{}\"", truncate_string(s, 50, "...")),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Array(a) => format!("[{} items]", a.len()),
                serde_json::Value::Object(o) => format!("{{{} fields}}", o.len()),
                serde_json::Value::Null => "null".to_string(),
            };
            parts.push(format!("{key}={value_str}"));
        }

        if args.len() > 3 {
            parts.push(format!("...+{} more", args.len() - 3));
        }

        parts.join(", ")
    }
}
