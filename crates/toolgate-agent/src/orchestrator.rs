//! Conversation Orchestrator: the bounded model ↔ tool loop for one request.
//!
//! ```text
//! Started → AwaitingModel → ToolCallRequested → AwaitingModel → … → Done
//! ```
//!
//! Each request owns its history; nothing is shared between requests except
//! the supervisor (through the dispatcher) and the model backend.

use crate::backends::{ModelBackend, ModelReply};
use crate::config::OrchestratorConfig;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::{GatewayError, GatewayResult, Message, ToolInvocation, ToolResult, ToolSchema};
use toolgate_mcp::Dispatcher;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-call record returned with the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallSummary {
    /// Public name the model used.
    pub name: String,
    /// Server that handled the call, if the name resolved.
    pub server: Option<String>,
    /// True for gateway failures and tool-flagged errors.
    pub is_error: bool,
    /// Time spent dispatching the call.
    pub elapsed_ms: u64,
}

/// The result of a completed conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    /// The final answer text.
    pub answer: String,
    /// Number of model calls made.
    pub turns: u32,
    /// Every tool call made, in order.
    pub tool_calls: Vec<ToolCallSummary>,
}

enum Phase {
    Started,
    AwaitingModel,
    ToolCallRequested {
        text: Option<String>,
        calls: Vec<ToolInvocation>,
    },
    Done(String),
}

/// Tool definitions offered to the model during one conversation.
///
/// A tool whose server went away drops out of the registry, but its
/// definition stays on offer while the history still holds calls to it.
#[derive(Default)]
struct OfferedTools {
    seen: Vec<ToolSchema>,
}

impl OfferedTools {
    fn for_turn(&mut self, mut current: Vec<ToolSchema>, history: &[Message]) -> Vec<ToolSchema> {
        for schema in &current {
            match self.seen.iter_mut().find(|s| s.name == schema.name) {
                Some(known) => *known = schema.clone(),
                None => self.seen.push(schema.clone()),
            }
        }

        let called: HashSet<&str> = history.iter().flat_map(Message::tool_use_names).collect();
        let gone: Vec<ToolSchema> = self
            .seen
            .iter()
            .filter(|s| called.contains(s.name.as_str()))
            .filter(|s| !current.iter().any(|c| c.name == s.name))
            .cloned()
            .collect();
        if !gone.is_empty() {
            debug!(tools = gone.len(), "Keeping definitions of tools that are no longer registered");
        }
        current.extend(gone);
        current
    }
}

/// Tool results must answer the calls one to one, by id and in order.
fn check_pairing(calls: &[ToolInvocation], results: &[ToolResult]) -> GatewayResult<()> {
    if results.len() != calls.len() || calls.iter().zip(results).any(|(c, r)| c.id != r.call_id) {
        return Err(GatewayError::Internal(
            "tool results do not match the requested calls".into(),
        ));
    }
    Ok(())
}

/// Drives conversations against a model backend, routing tool calls through
/// a [`Dispatcher`].
pub struct Orchestrator {
    model: Arc<dyn ModelBackend>,
    dispatcher: Dispatcher,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Validate `config` and build an orchestrator.
    pub fn new(
        model: Arc<dyn ModelBackend>,
        dispatcher: Dispatcher,
        config: OrchestratorConfig,
    ) -> GatewayResult<Self> {
        config.validate()?;
        Ok(Self {
            model,
            dispatcher,
            config,
        })
    }

    /// The dispatcher tool calls go through.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The loop bounds in effect.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer one query. The whole loop, tool calls included, runs under the
    /// request deadline; on expiry every in-flight call is abandoned.
    pub async fn chat(&self, query: &str) -> GatewayResult<ChatOutcome> {
        let request_id = Uuid::new_v4();
        let deadline = Duration::from_secs(self.config.deadline_secs);
        let span = info_span!("chat", request_id = %request_id);

        async {
            match tokio::time::timeout(deadline, self.run(query)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(deadline_secs = self.config.deadline_secs, "Conversation deadline exceeded");
                    Err(GatewayError::DeadlineExceeded {
                        deadline_ms: deadline.as_millis() as u64,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, query: &str) -> GatewayResult<ChatOutcome> {
        let supervisor = self.dispatcher.supervisor();
        if supervisor.server_count() > 0 && supervisor.ready_count() == 0 {
            warn!("No tool server is ready, refusing query");
            return Err(GatewayError::ServerUnavailable {
                server: "*".into(),
                reason: "no tool server is ready".into(),
            });
        }

        let max_turns = self.config.max_turns;
        let system_prompt = self.config.system_prompt.as_deref();
        let mut messages: Vec<Message> = Vec::new();
        let mut summaries: Vec<ToolCallSummary> = Vec::new();
        let mut turns: u32 = 0;
        let mut offered = OfferedTools::default();
        let mut phase = Phase::Started;

        loop {
            phase = match phase {
                Phase::Started => {
                    info!(query_len = query.len(), "Starting conversation");
                    messages.push(Message::user(query));
                    Phase::AwaitingModel
                }

                Phase::AwaitingModel => {
                    // Re-read every turn so tools of demoted servers disappear.
                    let tools = offered.for_turn(supervisor.registry().schemas(), &messages);
                    turns += 1;
                    debug!(turn = turns, tools = tools.len(), "Calling model");

                    match self.model.converse(system_prompt, &messages, &tools).await? {
                        ModelReply::Final(text) => Phase::Done(text),
                        ModelReply::ToolCalls { text, calls } if calls.is_empty() => {
                            Phase::Done(text.unwrap_or_default())
                        }
                        ModelReply::ToolCalls { text, calls } => {
                            if turns >= max_turns {
                                warn!(max_turns, "Conversation reached the turn limit");
                                return Err(GatewayError::TurnLimitExceeded { max_turns });
                            }
                            Phase::ToolCallRequested { text, calls }
                        }
                    }
                }

                Phase::ToolCallRequested { text, calls } => {
                    let mut ids = HashSet::new();
                    if let Some(repeated) = calls.iter().find(|c| !ids.insert(c.id.as_str())) {
                        warn!(call_id = %repeated.id, "Model reused a tool call id");
                        return Err(GatewayError::Internal(format!(
                            "duplicate tool call id '{}'",
                            repeated.id
                        )));
                    }

                    info!(turn = turns, calls = calls.len(), "Dispatching tool calls");
                    messages.push(Message::tool_request(text.as_deref(), &calls));

                    let results = self.dispatcher.dispatch_all(&calls).await;
                    check_pairing(&calls, &results)?;
                    summaries.extend(results.iter().map(|r| ToolCallSummary {
                        name: r.tool.clone(),
                        server: r.server.clone(),
                        is_error: r.is_error(),
                        elapsed_ms: r.elapsed_ms,
                    }));
                    messages.push(Message::tool_results(&results));
                    Phase::AwaitingModel
                }

                Phase::Done(answer) => {
                    info!(turns, tool_calls = summaries.len(), "Conversation completed");
                    return Ok(ChatOutcome {
                        answer,
                        turns,
                        tool_calls: summaries,
                    });
                }
            };
        }
    }
}
