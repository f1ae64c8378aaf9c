pub mod history;
pub mod prompt;
pub mod request;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::builtin::{trimmed_non_empty, ToolName, ToolRegistry};
use crate::config::Config;
use crate::db::{SessionGate, StoreError, WorkspaceStore};
use crate::models::workspace::Workspace;
use crate::pipeline::{suggest_next_step, RequestKind};
use crate::services::llm::{ChatRequest, LlmClient, ToolCall};
use crate::utils::log_helpers::{log_tool_result, log_turn_begin, log_turn_error, truncate_log};

pub use history::{build_messages, validate_messages};
pub use prompt::system_prompt;
pub use request::{describe_request, parse_user_message, UserRequest};

use request::is_present;

pub const HOW_CAN_I_HELP: &str = "How can I help?";

/// Keys a structured request may carry through to its tool.
const STRUCTURED_ARG_KEYS: [&str; 5] = ["keyword", "date_range", "product_type", "persona_data", "service_data"];

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub history_max_messages: usize,
    pub history_max_tokens: i64,
}

impl AgentSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            model: cfg.agent_model.clone(),
            history_max_messages: cfg.history_max_messages,
            history_max_tokens: cfg.history_max_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnResult {
    pub session_id: String,
    pub reply: String,
    pub workspace: Workspace,
    /// Set when the workspace could not be saved. The reply is still valid.
    pub error: Option<String>,
}

pub struct AgentService {
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    store: Arc<dyn WorkspaceStore>,
    gate: SessionGate,
    settings: AgentSettings,
}

static AGENT: OnceCell<Arc<AgentService>> = OnceCell::new();

pub fn init_global(service: AgentService) -> Result<Arc<AgentService>, String> {
    let service = Arc::new(service);
    AGENT
        .set(service.clone())
        .map_err(|_| "agent service already initialized".to_string())?;
    Ok(service)
}

pub fn agent() -> Result<Arc<AgentService>, String> {
    AGENT
        .get()
        .cloned()
        .ok_or_else(|| "agent service not initialized".to_string())
}

impl AgentService {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        store: Arc<dyn WorkspaceStore>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            llm,
            registry,
            store,
            gate: SessionGate::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// One full turn: load, run, save. Turns on the same session never overlap.
    pub async fn run_turn(&self, session_id: &str, message: &str) -> TurnResult {
        let _permit = self.gate.enter(session_id).await;

        let mut workspace = match self.store.load(session_id).await {
            Ok(Some(ws)) => ws,
            Ok(None) => {
                info!("[AGENT] new workspace: session={}", session_id);
                Workspace::new()
            }
            // The stored workspace may still be intact, so the turn must not overwrite it.
            Err(err) => {
                log_turn_error(session_id, &err.to_string());
                return TurnResult {
                    session_id: session_id.to_string(),
                    reply: format!("Sorry, the session could not be opened right now: {err}"),
                    workspace: Workspace::new(),
                    error: Some(format!("Failed to load the workspace: {err}")),
                };
            }
        };

        let request = parse_user_message(message);
        log_turn_begin(session_id, request.is_structured(), workspace.internal_history.len());
        let reply = self.process(session_id, &mut workspace, request).await;
        workspace.trim_history(self.settings.history_max_tokens);

        let error = match self.store.save(session_id, &workspace).await {
            Ok(()) => None,
            Err(err) => {
                log_turn_error(session_id, &err.to_string());
                Some(format!("Failed to save the workspace: {err}"))
            }
        };

        TurnResult {
            session_id: session_id.to_string(),
            reply,
            workspace,
            error,
        }
    }

    /// Removes a session once any turn running on it has finished.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let _permit = self.gate.enter(session_id).await;
        self.store.delete(session_id).await
    }

    async fn process(&self, session_id: &str, ws: &mut Workspace, request: UserRequest) -> String {
        match request {
            UserRequest::Structured { kind, fields } => {
                self.remember(ws, "user", describe_request(&kind, &fields));
                let reply = self.handle_structured_request(&kind, &fields, ws).await;
                self.remember(ws, "assistant", reply.clone());
                reply
            }
            UserRequest::Chat(text) => {
                if !text.trim().is_empty() {
                    self.remember(ws, "user", text);
                }
                self.run_chat_turn(session_id, ws).await
            }
        }
    }

    fn remember(&self, ws: &mut Workspace, role: &str, content: String) {
        ws.append_to_history(
            json!({ "role": role, "content": content }),
            self.settings.history_max_messages,
        );
    }

    pub async fn handle_structured_request(
        &self,
        kind: &str,
        fields: &Map<String, Value>,
        ws: &mut Workspace,
    ) -> String {
        ws.last_request_type = Some(kind.to_string());
        let Some(request_kind) = RequestKind::parse(kind) else {
            return format!("Error: unknown request type: {kind}");
        };
        let (tool, required): (ToolName, &[&str]) = match request_kind {
            RequestKind::DataRetriever => (ToolName::RunDataRetriever, &["keyword"]),
            RequestKind::ManualPersona => (ToolName::CreatePersonaFromManualInput, &["persona_data"]),
            RequestKind::ManualService => (ToolName::CreateServiceIdeasFromManualInput, &["service_data"]),
            RequestKind::ChangeProductType => (ToolName::ChangeProductContext, &["product_type"]),
        };

        let args: Map<String, Value> = STRUCTURED_ARG_KEYS
            .iter()
            .filter_map(|key| {
                fields
                    .get(*key)
                    .filter(|v| is_present(v))
                    .map(|v| (key.to_string(), v.clone()))
            })
            .collect();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| !args.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return format!("Missing required parameters: {}", missing.join(", "));
        }

        let outcome = self.registry.dispatch(tool, &args, ws).await;
        let error = outcome.error.unwrap_or_default();
        log_tool_result(tool.name(), outcome.success, &error);
        if outcome.success {
            format!(
                "{} completed. Shall we continue?\n\nNext step: {}",
                tool.name(),
                suggest_next_step(ws)
            )
        } else {
            format!("{} failed: {}", tool.name(), error)
        }
    }

    pub async fn run_chat_turn(&self, session_id: &str, ws: &mut Workspace) -> String {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: build_messages(ws, system_prompt(ws)),
            tools: self.registry.llm_tools(),
            tool_choice: Some("auto".to_string()),
            ..Default::default()
        };
        let reply = match self.llm.chat(request).await {
            Ok(reply) => reply,
            Err(err) => return self.agent_error(session_id, ws, &err),
        };
        ws.append_to_history(reply.history_message(), self.settings.history_max_messages);

        if reply.tool_calls.is_empty() {
            return match reply.content.as_deref().and_then(trimmed_non_empty) {
                Some(content) => format!("{content}\n\nNext step: {}", suggest_next_step(ws)),
                None => {
                    self.remember(ws, "assistant", HOW_CAN_I_HELP.to_string());
                    HOW_CAN_I_HELP.to_string()
                }
            };
        }

        let mut errors = Vec::new();
        for call in &reply.tool_calls {
            let content = match self.execute_tool_call(call, ws).await {
                Ok(tool) => json!({
                    "tool_name": tool.name(),
                    "success": true,
                    "details": ws.artifacts.summary(),
                }),
                Err(err) => {
                    errors.push(format!("Tool '{}' failed: {}", call.name, err));
                    json!({ "error": err })
                }
            };
            ws.append_to_history(
                json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "name": call.name,
                    "content": content.to_string(),
                }),
                self.settings.history_max_messages,
            );
        }
        ws.trim_history(self.settings.history_max_tokens);
        if let Err(err) = self.store.save(session_id, ws).await {
            warn!("[AGENT] intermediate save failed: session={}, error={}", session_id, err);
        }

        if !errors.is_empty() {
            let message = format!(
                "The request could not be completed because of the following problems:\n{}",
                errors.join("\n")
            );
            self.remember(ws, "assistant", message.clone());
            return message;
        }

        // The follow-up call only narrates what the tools did, so it gets no tools.
        let follow_up = ChatRequest {
            model: self.settings.model.clone(),
            messages: build_messages(ws, system_prompt(ws)),
            ..Default::default()
        };
        match self.llm.chat(follow_up).await {
            Ok(final_reply) => {
                ws.append_to_history(final_reply.history_message(), self.settings.history_max_messages);
                match final_reply.content.as_deref().and_then(trimmed_non_empty) {
                    Some(content) => content.to_string(),
                    None => format!("The requested work is done.\n\nNext step: {}", suggest_next_step(ws)),
                }
            }
            Err(err) => self.agent_error(session_id, ws, &err),
        }
    }

    async fn execute_tool_call(&self, call: &ToolCall, ws: &mut Workspace) -> Result<ToolName, String> {
        let tool = ToolName::from_name(&call.name)
            .filter(|tool| tool.exposed_to_llm())
            .ok_or_else(|| format!("unknown tool: {}", call.name))?;
        let args = parse_arguments(&call.arguments)
            .map_err(|e| format!("invalid arguments for {}: {}", call.name, e))?;

        let outcome = self.registry.dispatch(tool, &args, ws).await;
        let detail = match &outcome.error {
            Some(err) => err.clone(),
            None => truncate_log(&outcome.payload.to_string(), 200),
        };
        log_tool_result(tool.name(), outcome.success, &detail);
        if outcome.success {
            Ok(tool)
        } else {
            Err(outcome.error.unwrap_or_else(|| format!("{} failed", tool.name())))
        }
    }

    fn agent_error(&self, session_id: &str, ws: &mut Workspace, err: &str) -> String {
        log_turn_error(session_id, err);
        let message = format!("Sorry, an agent error occurred: {err}");
        self.remember(ws, "assistant", message.clone());
        message
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}
