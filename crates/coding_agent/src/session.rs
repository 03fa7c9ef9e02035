//! Agent loop: one submitted message drives model requests and tool calls
//! until the model finishes, the user interrupts, or the turn fails.

use std::collections::HashSet;
use std::sync::Arc;

use agent_provider::{
    is_cancelled, new_cancel_signal, CancelSignal, FinishReason, Message, ModelClient,
    ModelRequest, StreamEvent, ToolCall, ToolDefinition, ToolResult, TransportError,
    TransportErrorKind,
};
use serde_json::{Map, Value};

use crate::config::Settings;
use crate::console::TerminalIo;
use crate::conversation::{Compaction, Conversation, TokenEstimator};
use crate::error::{AgentError, BudgetError, ToolError};
use crate::tools::ToolExecutor;
use crate::transcript::Transcript;

pub const NOT_EXECUTED_CANCELLED: &str = "not executed: cancelled";
pub const EDIT_REJECTED: &str = "edit rejected by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    AwaitingUserInput,
    Streaming,
    ExecutingTools,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { finish: FinishReason },
    Cancelled,
    Failed { error: AgentError },
}

impl TurnOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }

    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Completed { finish } => Some(finish.as_str().to_string()),
            Self::Cancelled => None,
            Self::Failed { error } => Some(format!("{}: {}", error.kind_label(), error.detail())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub model: String,
    pub system_instructions: String,
    /// Model requests allowed per submitted message.
    pub max_turns: u32,
    pub context_budget: usize,
    pub chars_per_token: usize,
    /// Apply file changes without asking.
    pub auto_approve_edits: bool,
}

impl SessionOptions {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.model.clone(),
            system_instructions: settings.system_instructions.clone(),
            max_turns: settings.max_turns,
            context_budget: settings.context_budget,
            chars_per_token: settings.chars_per_token,
            auto_approve_edits: settings.auto_approve,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        let settings = Settings::defaults(".");
        Self::from_settings(&settings)
    }
}

/// Snapshot for `/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub provider: String,
    pub model: String,
    pub submissions: u64,
    pub messages: usize,
    pub estimated_tokens: usize,
    pub context_budget: usize,
    pub auto_approve_edits: bool,
    pub transcript: Option<String>,
}

enum StreamOutcome {
    Finished {
        text: String,
        calls: Vec<PreparedCall>,
        finish: FinishReason,
    },
    Cancelled,
}

/// A call assembled from stream fragments. Argument decoding failures are
/// kept so they can be reported as the call's result.
struct PreparedCall {
    call: ToolCall,
    argument_error: Option<String>,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: Option<String>,
    arguments: String,
}

pub struct Session {
    options: SessionOptions,
    conversation: Conversation,
    client: Arc<dyn ModelClient>,
    tools: Box<dyn ToolExecutor>,
    transcript: Option<Transcript>,
    state: AgentState,
    submissions: u64,
}

impl Session {
    pub fn new(
        options: SessionOptions,
        client: Arc<dyn ModelClient>,
        tools: Box<dyn ToolExecutor>,
    ) -> Self {
        let conversation = Conversation::with_system(
            options.system_instructions.clone(),
            TokenEstimator::new(options.chars_per_token),
        );
        Self {
            options,
            conversation,
            client,
            tools,
            transcript: None,
            state: AgentState::AwaitingUserInput,
            submissions: 0,
        }
    }

    #[must_use]
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        self.transcript.as_ref()
    }

    /// Loads messages from an earlier session into the conversation.
    pub fn restore(&mut self, messages: Vec<Message>) -> Result<usize, AgentError> {
        Ok(self.conversation.restore(messages)?)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            provider: self.client.profile().provider_id,
            model: self.options.model.clone(),
            submissions: self.submissions,
            messages: self.conversation.len(),
            estimated_tokens: self.conversation.estimate_tokens(),
            context_budget: self.options.context_budget,
            auto_approve_edits: self.options.auto_approve_edits,
            transcript: self
                .transcript
                .as_ref()
                .map(|transcript| transcript.path().display().to_string()),
        }
    }

    /// Uses `model` for every later request. The conversation is kept.
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        tracing::info!(from = %self.options.model, to = %model, "model switched");
        self.options.model = model;
    }

    pub fn set_auto_approve_edits(&mut self, enabled: bool) {
        self.options.auto_approve_edits = enabled;
    }

    /// Drops history except the system message.
    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    /// Compacts toward `target` tokens outside of a turn.
    pub fn compact_to(&mut self, target: usize) -> Result<Option<Compaction>, BudgetError> {
        let compaction = self.conversation.compact(target)?;
        if let (Some(compaction), Some(transcript)) = (compaction.as_ref(), self.transcript.as_mut()) {
            transcript.record_compaction(compaction);
        }
        Ok(compaction)
    }

    /// Runs one user submission to completion.
    ///
    /// Transport and budget failures end the turn as [`TurnOutcome::Failed`]
    /// and leave the session ready for more input. Only contract violations
    /// are returned as `Err(AgentError::Internal)`.
    pub fn submit(
        &mut self,
        input: &str,
        io: &mut dyn TerminalIo,
    ) -> Result<TurnOutcome, AgentError> {
        let span = tracing::info_span!("submit", submission = self.submissions + 1);
        let _entered = span.enter();

        let cancel = new_cancel_signal();
        io.turn_started(&cancel);
        self.conversation.begin_turn();

        let result = self
            .push(Message::user(input))
            .and_then(|()| self.run_turn(&cancel, io));

        self.conversation.end_turn();
        io.turn_finished();
        self.submissions += 1;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) if error.is_internal() => {
                self.state = AgentState::Failed;
                tracing::error!(%error, "turn aborted by contract violation");
                return Err(error);
            }
            Err(error) => TurnOutcome::Failed { error },
        };

        match &outcome {
            TurnOutcome::Completed { finish } => {
                self.state = AgentState::Done;
                tracing::info!(finish = finish.as_str(), "turn completed");
            }
            TurnOutcome::Cancelled => {
                self.state = AgentState::Cancelled;
                tracing::info!("turn cancelled");
                io.render_notice("cancelled");
            }
            TurnOutcome::Failed { error } => {
                self.state = AgentState::Failed;
                tracing::warn!(kind = error.kind_label(), %error, "turn failed");
                io.render_error(error.kind_label(), &error.detail());
            }
        }
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.record_outcome(&outcome);
        }

        self.state = AgentState::AwaitingUserInput;
        Ok(outcome)
    }

    fn run_turn(
        &mut self,
        cancel: &CancelSignal,
        io: &mut dyn TerminalIo,
    ) -> Result<TurnOutcome, AgentError> {
        let definitions = self.tools.definitions();
        let mut executed: HashSet<String> = HashSet::new();
        let mut requests = 0u32;

        loop {
            if is_cancelled(cancel) {
                return Ok(TurnOutcome::Cancelled);
            }
            if requests >= self.options.max_turns {
                return Err(BudgetError::MaxTurns {
                    limit: self.options.max_turns,
                }
                .into());
            }
            requests += 1;

            self.compact_for_request(&definitions, io)?;

            self.state = AgentState::Streaming;
            tracing::info!(request = requests, "model request");
            let (text, calls, finish) = match self.stream_response(&definitions, cancel, &executed, io)? {
                StreamOutcome::Cancelled => return Ok(TurnOutcome::Cancelled),
                StreamOutcome::Finished {
                    text,
                    calls,
                    finish,
                } => (text, calls, finish),
            };

            if calls.is_empty() {
                self.push(Message::assistant(text, Vec::new()))?;
                io.end_response();
                match finish {
                    FinishReason::Length => {
                        io.render_notice("response truncated: the model hit its output length limit")
                    }
                    FinishReason::ContentFilter => {
                        io.render_notice("response stopped by the provider's content filter")
                    }
                    _ => {}
                }
                return Ok(TurnOutcome::Completed { finish });
            }

            let tool_calls = calls.iter().map(|prepared| prepared.call.clone()).collect();
            self.push(Message::assistant(text, tool_calls))?;
            io.end_response();

            self.state = AgentState::ExecutingTools;
            for prepared in calls {
                executed.insert(prepared.call.id.clone());
                let result = if is_cancelled(cancel) {
                    ToolResult::error(&prepared.call.id, NOT_EXECUTED_CANCELLED)
                } else {
                    io.render_tool_call(&prepared.call);
                    let result = match prepared.argument_error {
                        Some(message) => ToolResult::error(
                            &prepared.call.id,
                            ToolError::InvalidArguments(message).to_string(),
                        ),
                        None if self.edit_approved(&prepared.call, io) => {
                            self.tools.execute(&prepared.call, cancel)
                        }
                        None => ToolResult::error(&prepared.call.id, EDIT_REJECTED),
                    };
                    io.render_tool_result(&prepared.call, &result);
                    result
                };
                self.push(Message::tool(&result))?;
            }

            if is_cancelled(cancel) {
                return Ok(TurnOutcome::Cancelled);
            }
        }
    }

    /// Asks the user about calls that change files unless edits are
    /// auto-approved. Calls without a preview run unasked.
    fn edit_approved(&self, call: &ToolCall, io: &mut dyn TerminalIo) -> bool {
        if self.options.auto_approve_edits {
            return true;
        }
        let Some(preview) = self.tools.preview(call) else {
            return true;
        };
        if preview.is_noop() {
            return true;
        }
        let approved = io.confirm_edit(&preview);
        tracing::info!(path = %preview.path, approved, "edit confirmation");
        approved
    }

    fn stream_response(
        &mut self,
        definitions: &[ToolDefinition],
        cancel: &CancelSignal,
        executed: &HashSet<String>,
        io: &mut dyn TerminalIo,
    ) -> Result<StreamOutcome, AgentError> {
        let request = ModelRequest {
            model: self.options.model.clone(),
            messages: self.conversation.snapshot(),
            tools: definitions.to_vec(),
        };
        let stream = self.client.send(request, Arc::clone(cancel));

        let mut text = String::new();
        let mut pending: Vec<PendingCall> = Vec::new();
        let mut finish = None;

        for event in stream {
            if is_cancelled(cancel) {
                break;
            }
            match event {
                StreamEvent::TextDelta(delta) => {
                    io.render_text_delta(&delta);
                    text.push_str(&delta);
                }
                StreamEvent::ToolCallDelta {
                    id,
                    name,
                    arguments,
                } => {
                    if executed.contains(&id) {
                        return Err(malformed(format!(
                            "model reused tool call id '{id}' within one turn"
                        )));
                    }
                    let index = match pending.iter().position(|call| call.id == id) {
                        Some(index) => index,
                        None => {
                            pending.push(PendingCall {
                                id,
                                ..PendingCall::default()
                            });
                            pending.len() - 1
                        }
                    };
                    let call = &mut pending[index];
                    if let Some(name) = name.filter(|name| !name.is_empty()) {
                        if call.name.is_some() {
                            return Err(malformed(format!(
                                "model repeated tool call id '{}' in one response",
                                call.id
                            )));
                        }
                        call.name = Some(name);
                    }
                    if let Some(arguments) = arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
                StreamEvent::Done(reason) => {
                    finish = Some(reason);
                    break;
                }
                StreamEvent::Error { kind, message } => {
                    return Err(TransportError::new(kind, message).into());
                }
            }
        }

        if is_cancelled(cancel) {
            return Ok(StreamOutcome::Cancelled);
        }
        let Some(finish) = finish else {
            return Err(malformed("stream ended without a finish reason"));
        };

        let calls = pending
            .into_iter()
            .map(prepare_call)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StreamOutcome::Finished {
            text,
            calls,
            finish,
        })
    }

    fn compact_for_request(
        &mut self,
        definitions: &[ToolDefinition],
        io: &mut dyn TerminalIo,
    ) -> Result<(), AgentError> {
        let estimator = self.conversation.estimator();
        let schema_cost: usize = definitions
            .iter()
            .map(|definition| {
                estimator.text(&definition.name)
                    + estimator.text(&definition.description)
                    + estimator.text(&definition.input_schema.to_string())
            })
            .sum();
        let budget = self.options.context_budget.saturating_sub(schema_cost);

        let compaction = self.conversation.compact(budget)?;
        if let Some(compaction) = compaction {
            tracing::info!(
                removed = compaction.removed_messages,
                before = compaction.tokens_before,
                after = compaction.tokens_after,
                "conversation compacted"
            );
            io.render_notice(&format!(
                "history compacted: removed {} messages ({} -> {} estimated tokens)",
                compaction.removed_messages, compaction.tokens_before, compaction.tokens_after
            ));
            if let Some(transcript) = self.transcript.as_mut() {
                transcript.record_compaction(&compaction);
            }
        }
        Ok(())
    }

    fn push(&mut self, message: Message) -> Result<(), AgentError> {
        self.conversation.append(message.clone())?;
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.record_message(&message);
        }
        Ok(())
    }
}

fn malformed(message: impl Into<String>) -> AgentError {
    TransportError::new(TransportErrorKind::Malformed, message).into()
}

fn prepare_call(pending: PendingCall) -> Result<PreparedCall, AgentError> {
    let Some(name) = pending.name else {
        return Err(malformed(format!(
            "tool call '{}' arrived without a name",
            pending.id
        )));
    };

    let (arguments, argument_error) = match decode_arguments(&pending.arguments) {
        Ok(arguments) => (arguments, None),
        Err(message) => (Map::new(), Some(message)),
    };
    Ok(PreparedCall {
        call: ToolCall::new(pending.id, name, arguments),
        argument_error,
    })
}

fn decode_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("tool arguments must be a JSON object".to_string()),
        Err(error) => Err(format!("tool arguments are not valid JSON: {error}")),
    }
}
