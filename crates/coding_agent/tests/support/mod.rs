#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use agent_provider::{CancelSignal, Role, ToolCall, ToolDefinition, ToolResult, ToolStatus};
use agent_provider_mock::{Script, ScriptedModelClient};
use coding_agent::console::{TerminalIo, UserInput};
use coding_agent::session::{Session, SessionOptions};
use coding_agent::tools::{BuiltinToolExecutor, EditPreview, ToolExecutor};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum IoEvent {
    Text(String),
    EndResponse,
    ToolCall { name: String, arguments: Value },
    ToolResult { id: String, status: ToolStatus, output: String },
    EditPreview { path: String, approved: bool },
    Notice(String),
    Error { kind: String, message: String },
}

/// `TerminalIo` that records every call and replays scripted input.
#[derive(Default)]
pub struct RecordingIo {
    pub events: Vec<IoEvent>,
    inputs: VecDeque<UserInput>,
    cancel: Option<CancelSignal>,
    cancel_after_deltas: Option<usize>,
    cancel_after_results: Option<usize>,
    cancel_during_tool: Option<Duration>,
    reject_edits: bool,
    /// Every diff shown for confirmation, in order.
    pub previews: Vec<EditPreview>,
    deltas: usize,
    results: usize,
}

impl RecordingIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs<I>(inputs: I) -> Self
    where
        I: IntoIterator<Item = UserInput>,
    {
        Self {
            inputs: inputs.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Raises the turn's cancel flag once `count` text deltas were rendered,
    /// the way Ctrl-C would.
    pub fn cancel_after_deltas(mut self, count: usize) -> Self {
        self.cancel_after_deltas = Some(count);
        self
    }

    /// Raises the turn's cancel flag once `count` tool results were rendered.
    pub fn cancel_after_results(mut self, count: usize) -> Self {
        self.cancel_after_results = Some(count);
        self
    }

    /// Raises the turn's cancel flag from another thread `delay` after the
    /// first tool call starts.
    pub fn cancel_during_tool(mut self, delay: Duration) -> Self {
        self.cancel_during_tool = Some(delay);
        self
    }

    /// Answers "no" to every edit confirmation.
    pub fn rejecting_edits(mut self) -> Self {
        self.reject_edits = true;
        self
    }

    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                IoEvent::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                IoEvent::Notice(notice) => Some(notice.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                IoEvent::Error { kind, message } => Some((kind.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                IoEvent::ToolCall { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn raise_cancel(&self) {
        if let Some(cancel) = self.cancel.as_ref() {
            cancel.store(true, Ordering::SeqCst);
        }
    }
}

impl TerminalIo for RecordingIo {
    fn render_text_delta(&mut self, text: &str) {
        self.events.push(IoEvent::Text(text.to_string()));
        self.deltas += 1;
        if self.cancel_after_deltas == Some(self.deltas) {
            self.raise_cancel();
        }
    }

    fn end_response(&mut self) {
        self.events.push(IoEvent::EndResponse);
    }

    fn render_tool_call(&mut self, call: &ToolCall) {
        self.events.push(IoEvent::ToolCall {
            name: call.name.clone(),
            arguments: Value::Object(call.arguments.clone()),
        });
        if let (Some(delay), Some(cancel)) = (self.cancel_during_tool.take(), self.cancel.as_ref()) {
            let cancel = Arc::clone(cancel);
            thread::spawn(move || {
                thread::sleep(delay);
                cancel.store(true, Ordering::SeqCst);
            });
        }
    }

    fn render_tool_result(&mut self, _call: &ToolCall, result: &ToolResult) {
        self.events.push(IoEvent::ToolResult {
            id: result.tool_call_id.clone(),
            status: result.status,
            output: result.output.clone(),
        });
        self.results += 1;
        if self.cancel_after_results == Some(self.results) {
            self.raise_cancel();
        }
    }

    fn render_notice(&mut self, message: &str) {
        self.events.push(IoEvent::Notice(message.to_string()));
    }

    fn render_error(&mut self, kind: &str, message: &str) {
        self.events.push(IoEvent::Error {
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }

    fn read_user_input(&mut self) -> UserInput {
        self.inputs.pop_front().unwrap_or(UserInput::Exit)
    }

    fn confirm_edit(&mut self, preview: &EditPreview) -> bool {
        let approved = !self.reject_edits;
        self.events.push(IoEvent::EditPreview {
            path: preview.path.clone(),
            approved,
        });
        self.previews.push(preview.clone());
        approved
    }

    fn turn_started(&mut self, cancel: &CancelSignal) {
        self.cancel = Some(Arc::clone(cancel));
        self.deltas = 0;
        self.results = 0;
    }

    fn turn_finished(&mut self) {
        self.cancel = None;
    }
}

/// Executor that advertises no tools and fails every call.
pub struct NoTools;

impl ToolExecutor for NoTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    fn execute(&mut self, call: &ToolCall, _cancel: &CancelSignal) -> ToolResult {
        ToolResult::error(&call.id, "no tools in this session")
    }
}

pub fn options() -> SessionOptions {
    SessionOptions {
        model: "mock".to_string(),
        system_instructions: "sys".to_string(),
        ..SessionOptions::default()
    }
}

/// Session over `root` with the builtin tools and a scripted client.
pub fn session_in(root: &Path, scripts: Vec<Script>) -> (Session, Arc<ScriptedModelClient>) {
    session_with_options(root, options(), scripts)
}

pub fn session_with_options(
    root: &Path,
    options: SessionOptions,
    scripts: Vec<Script>,
) -> (Session, Arc<ScriptedModelClient>) {
    let client = Arc::new(ScriptedModelClient::new(scripts));
    let tools = BuiltinToolExecutor::new(root).expect("builtin tools");
    let session = Session::new(options, Arc::<ScriptedModelClient>::clone(&client), Box::new(tools));
    (session, client)
}

pub fn roles(session: &Session) -> Vec<Role> {
    session
        .conversation()
        .messages()
        .iter()
        .map(|message| message.role)
        .collect()
}
