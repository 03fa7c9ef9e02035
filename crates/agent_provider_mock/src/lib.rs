//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic. Tests queue one [`Script`]
//! per expected model request; when the queue runs dry the client echoes the
//! latest user message back, which is enough for local offline runs.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::{
    is_cancelled, CancelSignal, EventStream, FinishReason, ModelClient, ModelRequest,
    ProviderProfile, Role, StreamEvent, TransportErrorKind,
};
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// One step of a scripted response.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Yield this event to the consumer.
    Event(StreamEvent),
    /// Block the consumer for this long, returning early on cancellation.
    Delay(Duration),
    /// Raise the request's cancel flag, as a user interrupt would.
    RaiseCancel,
}

/// Scripted response for a single model request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, delta: impl Into<String>) -> Self {
        self.steps
            .push(ScriptStep::Event(StreamEvent::TextDelta(delta.into())));
        self
    }

    /// Appends one complete tool call. `arguments` is serialized as the JSON
    /// text a provider would stream.
    #[must_use]
    pub fn tool_call(mut self, id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        self.steps.push(ScriptStep::Event(StreamEvent::ToolCallDelta {
            id: id.into(),
            name: Some(name.into()),
            arguments: Some(arguments.to_string()),
        }));
        self
    }

    /// Appends a raw tool-call fragment, for exercising partial deltas.
    #[must_use]
    pub fn tool_call_fragment(
        mut self,
        id: impl Into<String>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Self {
        self.steps.push(ScriptStep::Event(StreamEvent::ToolCallDelta {
            id: id.into(),
            name: name.map(str::to_string),
            arguments: arguments.map(str::to_string),
        }));
        self
    }

    #[must_use]
    pub fn finish(mut self, reason: FinishReason) -> Self {
        self.steps.push(ScriptStep::Event(StreamEvent::Done(reason)));
        self
    }

    #[must_use]
    pub fn error(mut self, kind: TransportErrorKind, message: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Event(StreamEvent::Error {
            kind,
            message: message.into(),
        }));
        self
    }

    #[must_use]
    pub fn delay(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Delay(duration));
        self
    }

    #[must_use]
    pub fn raise_cancel(mut self) -> Self {
        self.steps.push(ScriptStep::RaiseCancel);
        self
    }

    #[must_use]
    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

/// Deterministic `ModelClient` used by `coding_agent` tests and local runs.
#[derive(Debug)]
pub struct ScriptedModelClient {
    model_id: String,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ModelRequest>>,
    echo_delay: Duration,
}

impl ScriptedModelClient {
    /// Creates a client that replays `scripts` in order, one per request.
    #[must_use]
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            model_id: "mock".to_string(),
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            echo_delay: Duration::ZERO,
        }
    }

    /// Creates an echo-only client that streams word by word, for offline runs.
    #[must_use]
    pub fn echo() -> Self {
        Self::new(Vec::new()).with_echo_delay(Duration::from_millis(ECHO_TOKEN_DELAY_MS))
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        if !model_id.trim().is_empty() {
            self.model_id = model_id.trim().to_string();
        }
        self
    }

    #[must_use]
    pub fn with_echo_delay(mut self, delay: Duration) -> Self {
        self.echo_delay = delay;
        self
    }

    /// Queues another script after the existing ones.
    pub fn push_script(&self, script: Script) {
        lock_unpoisoned(&self.scripts).push_back(script);
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    #[must_use]
    pub fn remaining_scripts(&self) -> usize {
        lock_unpoisoned(&self.scripts).len()
    }

    fn echo_script(&self, request: &ModelRequest) -> Script {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or("");
        let reply = format!("You said: {prompt}");

        let mut script = Script::new();
        let mut pending = String::new();
        for ch in reply.chars() {
            pending.push(ch);
            if matches!(ch, ' ' | '\n') {
                script = script.text(std::mem::take(&mut pending));
                if !self.echo_delay.is_zero() {
                    script = script.delay(self.echo_delay);
                }
            }
        }
        if !pending.is_empty() {
            script = script.text(pending);
        }
        script.finish(FinishReason::Stop)
    }
}

const ECHO_TOKEN_DELAY_MS: u64 = 30;

impl Default for ScriptedModelClient {
    fn default() -> Self {
        Self::echo()
    }
}

impl ModelClient for ScriptedModelClient {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    fn send(&self, request: ModelRequest, cancel: CancelSignal) -> EventStream {
        let script = lock_unpoisoned(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| self.echo_script(&request));
        lock_unpoisoned(&self.requests).push(request);

        Box::new(ScriptedStream {
            steps: script.steps.into(),
            cancel,
            finished: false,
        })
    }
}

struct ScriptedStream {
    steps: VecDeque<ScriptStep>,
    cancel: CancelSignal,
    finished: bool,
}

impl Iterator for ScriptedStream {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        while !self.finished {
            if is_cancelled(&self.cancel) {
                self.finished = true;
                return None;
            }

            match self.steps.pop_front() {
                Some(ScriptStep::Event(event)) => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Some(ScriptStep::Delay(duration)) => sleep_unless_cancelled(duration, &self.cancel),
                Some(ScriptStep::RaiseCancel) => {
                    self.cancel
                        .store(true, std::sync::atomic::Ordering::Release);
                }
                None => self.finished = true,
            }
        }
        None
    }
}

fn sleep_unless_cancelled(duration: Duration, cancel: &CancelSignal) {
    let deadline = Instant::now() + duration;
    loop {
        if is_cancelled(cancel) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
