//! Minimal provider-agnostic contract for streaming one model request.
//!
//! This crate defines only the conversation data model shared by the agent
//! loop and providers, plus the lazy `StreamEvent` sequence every provider
//! adapts its wire format into. It excludes transport details, protocol
//! payloads, and orchestration concerns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shared cancellation flag for a request and the tools it triggers.
pub type CancelSignal = Arc<AtomicBool>;

/// Creates a fresh, unset cancellation flag.
#[must_use]
pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

/// Returns true once the flag has been raised.
#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

/// Error returned while constructing/configuring a provider before any request starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    /// Creates a new provider initialization error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderInitError {}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Author of one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A structured request from the model to invoke a registered tool.
///
/// Only built once the complete argument payload has been received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome classification for a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// Host tool result, paired 1:1 with a prior [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub status: ToolStatus,
    pub output: String,
    pub truncated: bool,
}

impl ToolResult {
    /// Constructs a successful tool result.
    #[must_use]
    pub fn ok(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: ToolStatus::Ok,
            output: output.into(),
            truncated: false,
        }
    }

    /// Constructs a tool error result.
    #[must_use]
    pub fn error(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: ToolStatus::Error,
            output: output.into(),
            truncated: false,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// One ordered conversation entry, replayed to the model verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Builds the `tool` message that feeds `result` back to the model.
    #[must_use]
    pub fn tool(result: &ToolResult) -> Self {
        let content = match result.status {
            ToolStatus::Ok => result.output.clone(),
            ToolStatus::Error => format!("error: {}", result.output),
        };

        Self {
            role: Role::Tool,
            content,
            tool_calls: Vec::new(),
            tool_call_id: Some(result.tool_call_id.clone()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Generic tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Input required to start one streamed model request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Provider-supplied marker indicating why a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Maps a chat-completions `finish_reason` string.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "stop" | "end_turn" => Self::Stop,
            "tool_calls" | "function_call" | "tool_use" => Self::ToolCalls,
            "length" | "max_tokens" => Self::Length,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::Other(value) => value,
        }
    }

    /// Returns true for reasons that mean the model finished on its own.
    #[must_use]
    pub fn is_natural(&self) -> bool {
        matches!(self, Self::Stop | Self::ToolCalls)
    }
}

/// Transport-level failure classes surfaced by model clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Network hiccup or provider overload. Retryable before streaming starts.
    Transient,
    /// Provider throttling. Retryable with backoff honoring any delay hint.
    RateLimited,
    /// Credentials rejected. Never retried.
    AuthFailed,
    /// Unparseable or truncated stream. Fatal for the turn.
    Malformed,
}

impl TransportErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::AuthFailed => "auth_failed",
            Self::Malformed => "malformed",
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport failure carried out of a model client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} transport error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Incremental event produced while a model response streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    /// Tool-call fragment keyed by call id. Fragments for one id concatenate.
    ToolCallDelta {
        id: String,
        name: Option<String>,
        arguments: Option<String>,
    },
    Done(FinishReason),
    Error {
        kind: TransportErrorKind,
        message: String,
    },
}

impl StreamEvent {
    /// Returns true when this event ends the sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error { .. })
    }
}

/// Lazy, finite, non-restartable event sequence for one request.
pub type EventStream = Box<dyn Iterator<Item = StreamEvent> + Send>;

/// Immutable metadata describing a model client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Uniform interface to a chat-completions style model backend.
pub trait ModelClient: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Issues one request and returns its event stream.
    ///
    /// The stream ends after a terminal event, or early (returning `None`)
    /// once `cancel` is raised. Retrying requires a fresh call.
    fn send(&self, request: ModelRequest, cancel: CancelSignal) -> EventStream;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    struct CannedClient;

    impl ModelClient for CannedClient {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "canned".to_string(),
                model_id: "canned-model".to_string(),
            }
        }

        fn send(&self, request: ModelRequest, _cancel: CancelSignal) -> EventStream {
            let echoed = request
                .messages
                .last()
                .map(|message| message.content.clone())
                .unwrap_or_default();
            Box::new(
                vec![
                    StreamEvent::TextDelta(echoed),
                    StreamEvent::Done(FinishReason::Stop),
                ]
                .into_iter(),
            )
        }
    }

    #[test]
    fn terminal_detection_matches_lifecycle() {
        assert!(!StreamEvent::TextDelta("hi".to_string()).is_terminal());
        assert!(!StreamEvent::ToolCallDelta {
            id: "call-1".to_string(),
            name: Some("read_file".to_string()),
            arguments: None,
        }
        .is_terminal());
        assert!(StreamEvent::Done(FinishReason::Stop).is_terminal());
        assert!(StreamEvent::Error {
            kind: TransportErrorKind::Malformed,
            message: "bad frame".to_string(),
        }
        .is_terminal());
    }

    #[test]
    fn finish_reason_parse_normalizes_known_values() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("function_call"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::parse("content_filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(
            FinishReason::parse("weird"),
            FinishReason::Other("weird".to_string())
        );
        assert!(FinishReason::Stop.is_natural());
        assert!(!FinishReason::Length.is_natural());
    }

    #[test]
    fn only_transient_and_rate_limited_are_retryable() {
        assert!(TransportErrorKind::Transient.is_retryable());
        assert!(TransportErrorKind::RateLimited.is_retryable());
        assert!(!TransportErrorKind::AuthFailed.is_retryable());
        assert!(!TransportErrorKind::Malformed.is_retryable());
    }

    #[test]
    fn tool_message_prefixes_error_results() {
        let ok = Message::tool(&ToolResult::ok("call-1", "contents"));
        assert_eq!(ok.role, Role::Tool);
        assert_eq!(ok.content, "contents");
        assert_eq!(ok.tool_call_id.as_deref(), Some("call-1"));

        let failed = Message::tool(&ToolResult::error("call-2", "missing file"));
        assert_eq!(failed.content, "error: missing file");
        assert_eq!(failed.tool_call_id.as_deref(), Some("call-2"));
    }

    #[test]
    fn message_serializes_without_empty_tool_fields() {
        let value = serde_json::to_value(Message::user("hello")).expect("serialize message");
        assert_eq!(value, json!({"role": "user", "content": "hello"}));

        let mut arguments = Map::new();
        arguments.insert("path".to_string(), json!("README.md"));
        let assistant = Message::assistant("", vec![ToolCall::new("call-1", "read_file", arguments)]);
        let value = serde_json::to_value(&assistant).expect("serialize assistant");
        assert_eq!(value["tool_calls"][0]["arguments"]["path"], "README.md");

        let restored: Message = serde_json::from_value(value).expect("deserialize assistant");
        assert_eq!(restored, assistant);
    }

    #[test]
    fn model_client_streams_are_plain_iterators() {
        let client = CannedClient;
        let events: Vec<StreamEvent> = client
            .send(
                ModelRequest {
                    model: "canned-model".to_string(),
                    messages: vec![Message::user("ping")],
                    tools: Vec::new(),
                },
                new_cancel_signal(),
            )
            .collect();

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("ping".to_string()),
                StreamEvent::Done(FinishReason::Stop),
            ]
        );
        assert_eq!(client.profile().provider_id, "canned");
    }

    #[test]
    fn provider_init_error_preserves_message() {
        let error = ProviderInitError::new("missing api key");
        assert_eq!(error.message(), "missing api key");
        assert_eq!(error.to_string(), "missing api key");
    }

    #[test]
    fn cancel_signal_starts_unset() {
        let cancel = new_cancel_signal();
        assert!(!is_cancelled(&cancel));
        cancel.store(true, Ordering::Release);
        assert!(is_cancelled(&cancel));
    }
}
