//! Chat-completions implementation of the shared `agent_provider` contract.
//!
//! This adapter translates conversation messages into `chat_api` payloads and
//! `chat_api` stream events back into the provider-neutral `StreamEvent`
//! sequence. Tool-call fragments are assembled here, so the agent loop only
//! ever sees complete calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use agent_provider::{
    is_cancelled, CancelSignal, EventStream, FinishReason, Message, ModelClient, ModelRequest,
    ProviderInitError, ProviderProfile, Role, StreamEvent, ToolDefinition, TransportErrorKind,
};
use chat_api::retry::FailureClass;
use chat_api::{
    ChatApiClient, ChatApiConfig, ChatApiError, ChatMessage, ChatRequest, ChatStreamEvent,
    ChatTool, ChatToolCall,
};

/// Stable provider identifier used by `coding_agent` startup selection.
pub const CHAT_API_PROVIDER_ID: &str = "chat-api";

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runtime configuration for the chat-completions provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatApiProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl ChatApiProviderConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            connect_timeout: None,
            idle_timeout: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    fn into_chat_api_config(self) -> ChatApiConfig {
        let mut config = ChatApiConfig::new(self.api_key);

        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }

        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }

        if let Some(timeout) = self.idle_timeout {
            config = config.with_idle_timeout(timeout);
        }

        config
    }
}

trait StreamClient: Send + Sync {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(ChatStreamEvent),
    ) -> Result<Option<String>, ChatApiError>;
}

#[derive(Debug)]
struct DefaultStreamClient {
    client: ChatApiClient,
}

impl StreamClient for DefaultStreamClient {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(ChatStreamEvent),
    ) -> Result<Option<String>, ChatApiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                ChatApiError::Unknown(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(
            self.client
                .stream_with_handler(request, Some(cancel), |event| on_event(event)),
        )
    }
}

/// `ModelClient` adapter backed by `chat_api` transport primitives.
pub struct ChatApiModelClient {
    model: String,
    stream_client: Arc<dyn StreamClient>,
    worker_seq: AtomicU64,
}

impl ChatApiModelClient {
    /// Creates a client using real HTTP transport.
    pub fn new(config: ChatApiProviderConfig) -> Result<Self, ProviderInitError> {
        let model = sanitize_model(&config.model);
        let client = ChatApiClient::new(config.into_chat_api_config()).map_err(map_init_error)?;

        Ok(Self {
            model,
            stream_client: Arc::new(DefaultStreamClient { client }),
            worker_seq: AtomicU64::new(0),
        })
    }

    #[cfg(test)]
    fn with_stream_client_for_tests(model: &str, stream_client: Arc<dyn StreamClient>) -> Self {
        Self {
            model: sanitize_model(model),
            stream_client,
            worker_seq: AtomicU64::new(0),
        }
    }
}

impl ModelClient for ChatApiModelClient {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: CHAT_API_PROVIDER_ID.to_string(),
            model_id: self.model.clone(),
        }
    }

    fn send(&self, request: ModelRequest, cancel: CancelSignal) -> EventStream {
        let (sender, receiver) = mpsc::channel();
        let chat_request = to_chat_request(&request, &self.model);
        let stream_client = Arc::clone(&self.stream_client);
        let worker_cancel = Arc::clone(&cancel);
        let seq = self.worker_seq.fetch_add(1, Ordering::Relaxed);

        let spawned = thread::Builder::new()
            .name(format!("chat-api-stream-{seq}"))
            .spawn(move || {
                run_stream_worker(stream_client.as_ref(), &chat_request, seq, &worker_cancel, &sender)
            });

        if let Err(error) = spawned {
            tracing::error!(%error, "failed to spawn stream worker");
            return Box::new(std::iter::once(StreamEvent::Error {
                kind: TransportErrorKind::Transient,
                message: format!("failed to spawn stream worker: {error}"),
            }));
        }

        Box::new(ChannelEventStream {
            receiver,
            cancel,
            finished: false,
        })
    }
}

fn run_stream_worker(
    stream_client: &dyn StreamClient,
    request: &ChatRequest,
    seq: u64,
    cancel: &CancelSignal,
    sender: &Sender<StreamEvent>,
) {
    tracing::debug!(
        model = %request.model,
        messages = request.messages.len(),
        tools = request.tools.len(),
        "chat stream worker started"
    );

    let mut translator = StreamTranslator::new(seq);
    let result = stream_client.stream(request, cancel, &mut |event| {
        for translated in translator.push(event) {
            // A dropped receiver means the consumer stopped listening.
            let _ = sender.send(translated);
        }
    });

    if translator.finished {
        return;
    }

    let closing = match result {
        Ok(_) => translator.close(),
        Err(ChatApiError::Cancelled) => return,
        Err(error) => {
            tracing::warn!(%error, "chat stream failed");
            vec![StreamEvent::Error {
                kind: map_failure_class(error.failure_class()),
                message: error.to_string(),
            }]
        }
    };
    for event in closing {
        let _ = sender.send(event);
    }
}

/// Iterator view over the worker channel. Polls in short slices so a raised
/// cancel flag ends the stream promptly.
struct ChannelEventStream {
    receiver: Receiver<StreamEvent>,
    cancel: CancelSignal,
    finished: bool,
}

impl Iterator for ChannelEventStream {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        loop {
            if is_cancelled(&self.cancel) {
                self.finished = true;
                return None;
            }

            match self.receiver.recv_timeout(RECV_POLL_INTERVAL) {
                Ok(event) => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.finished = true;
                    if is_cancelled(&self.cancel) {
                        return None;
                    }
                    return Some(StreamEvent::Error {
                        kind: TransportErrorKind::Malformed,
                        message: "stream worker exited without a terminal event".to_string(),
                    });
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    index: usize,
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Converts raw chat stream events into provider-neutral events, assembling
/// tool-call fragments per stream `index`.
///
/// Calls without a provider id get `call_{seq}_{index}`, where `seq` numbers
/// the requests of one client, so fallback ids never repeat within a session.
#[derive(Debug, Default)]
struct StreamTranslator {
    seq: u64,
    pending: Option<PendingToolCall>,
    completed_indices: Vec<usize>,
    finished: bool,
}

impl StreamTranslator {
    fn new(seq: u64) -> Self {
        Self {
            seq,
            ..Self::default()
        }
    }

    fn push(&mut self, event: ChatStreamEvent) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut out = Vec::new();
        match event {
            ChatStreamEvent::ContentDelta { delta } => {
                if !delta.is_empty() {
                    out.push(StreamEvent::TextDelta(delta));
                }
            }
            ChatStreamEvent::ToolCallFragment {
                index,
                id,
                name,
                arguments,
            } => {
                if self.pending.as_ref().is_some_and(|call| call.index != index) {
                    self.flush_pending(&mut out);
                    if self.finished {
                        return out;
                    }
                }
                if self.completed_indices.contains(&index) {
                    self.fail(
                        &mut out,
                        format!("tool call fragment for already completed index {index}"),
                    );
                    return out;
                }

                let call = self.pending.get_or_insert_with(|| PendingToolCall {
                    index,
                    ..PendingToolCall::default()
                });
                if call.id.is_none() {
                    call.id = id;
                }
                if call.name.is_none() {
                    call.name = name;
                }
                if let Some(arguments) = arguments {
                    call.arguments.push_str(&arguments);
                }
            }
            ChatStreamEvent::Finished { reason } => {
                self.flush_pending(&mut out);
                if !self.finished {
                    self.finished = true;
                    out.push(StreamEvent::Done(FinishReason::parse(&reason)));
                }
            }
            // `[DONE]` alone is not a finish reason; `close` reports it.
            ChatStreamEvent::Done => {}
            ChatStreamEvent::ProviderError { code, message } => {
                self.finished = true;
                let message = match code {
                    Some(code) => format!("provider error ({code}): {message}"),
                    None => format!("provider error: {message}"),
                };
                out.push(StreamEvent::Error {
                    kind: TransportErrorKind::Transient,
                    message,
                });
            }
            ChatStreamEvent::Malformed { detail } => self.fail(&mut out, detail),
        }
        out
    }

    /// Called once the transport ended cleanly.
    fn close(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if !self.finished {
            self.fail(&mut out, "stream ended without a finish reason".to_string());
        }
        out
    }

    fn flush_pending(&mut self, out: &mut Vec<StreamEvent>) {
        let Some(call) = self.pending.take() else {
            return;
        };
        self.completed_indices.push(call.index);

        let Some(name) = call.name.filter(|name| !name.trim().is_empty()) else {
            self.fail(out, format!("tool call {} has no function name", call.index));
            return;
        };
        let id = call
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("call_{}_{}", self.seq, call.index));
        out.push(StreamEvent::ToolCallDelta {
            id,
            name: Some(name),
            arguments: Some(call.arguments),
        });
    }

    fn fail(&mut self, out: &mut Vec<StreamEvent>, message: String) {
        self.finished = true;
        self.pending = None;
        out.push(StreamEvent::Error {
            kind: TransportErrorKind::Malformed,
            message,
        });
    }
}

fn to_chat_request(request: &ModelRequest, fallback_model: &str) -> ChatRequest {
    let model = if request.model.trim().is_empty() {
        fallback_model.to_string()
    } else {
        request.model.clone()
    };
    let messages = request.messages.iter().map(to_chat_message).collect();
    let tools = request.tools.iter().map(to_chat_tool).collect();
    ChatRequest::new(model, messages).with_tools(tools)
}

fn to_chat_message(message: &Message) -> ChatMessage {
    let mut chat = ChatMessage::text(message.role.as_str(), message.content.clone());
    if message.role == Role::Assistant && !message.tool_calls.is_empty() {
        if message.content.is_empty() {
            chat.content = None;
        }
        chat.tool_calls = message
            .tool_calls
            .iter()
            .map(|call| {
                let arguments = serde_json::Value::Object(call.arguments.clone()).to_string();
                ChatToolCall::function(call.id.clone(), call.name.clone(), arguments)
            })
            .collect();
    }
    chat.tool_call_id = message.tool_call_id.clone();
    chat
}

fn to_chat_tool(tool: &ToolDefinition) -> ChatTool {
    ChatTool::function(
        tool.name.clone(),
        tool.description.clone(),
        tool.input_schema.clone(),
    )
}

fn map_failure_class(class: FailureClass) -> TransportErrorKind {
    match class {
        FailureClass::Transient => TransportErrorKind::Transient,
        FailureClass::RateLimited => TransportErrorKind::RateLimited,
        FailureClass::Auth => TransportErrorKind::AuthFailed,
        FailureClass::Malformed | FailureClass::Fatal => TransportErrorKind::Malformed,
    }
}

fn sanitize_model(model: &str) -> String {
    let model = model.trim();
    if model.is_empty() {
        "gpt-4.1".to_string()
    } else {
        model.to_string()
    }
}

fn map_init_error(error: ChatApiError) -> ProviderInitError {
    ProviderInitError::new(format!("Failed to initialize chat-api provider: {error}"))
}
