//! Ordered conversation history with tool-call pairing and compaction.

use std::collections::HashSet;

use agent_provider::{Message, Role};

use crate::error::{BudgetError, ConversationError};

/// Fixed per-message cost for role and framing tokens.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Byte-based token heuristic. Bytes are never fewer than chars, so the
/// estimate errs high.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimator {
    chars_per_token: usize,
}

impl TokenEstimator {
    #[must_use]
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    #[must_use]
    pub fn text(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }

    #[must_use]
    pub fn message(&self, message: &Message) -> usize {
        let mut bytes = message.content.len();
        for call in &message.tool_calls {
            bytes += call.id.len() + call.name.len();
            bytes += serde_json::Value::Object(call.arguments.clone())
                .to_string()
                .len();
        }
        if let Some(id) = message.tool_call_id.as_ref() {
            bytes += id.len();
        }
        MESSAGE_OVERHEAD_TOKENS + bytes.div_ceil(self.chars_per_token)
    }
}

/// Record of one compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    pub removed_messages: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    turn_start: Option<usize>,
    open_calls: Vec<String>,
    answered: HashSet<String>,
    estimator: TokenEstimator,
}

impl Conversation {
    #[must_use]
    pub fn new(estimator: TokenEstimator) -> Self {
        Self {
            messages: Vec::new(),
            turn_start: None,
            open_calls: Vec::new(),
            answered: HashSet::new(),
            estimator,
        }
    }

    #[must_use]
    pub fn with_system(system: impl Into<String>, estimator: TokenEstimator) -> Self {
        let mut conversation = Self::new(estimator);
        conversation.messages.push(Message::system(system));
        conversation
    }

    /// Appends `message`, enforcing that tool messages answer an open call of
    /// the latest assistant message and that nothing else is appended while
    /// calls remain unanswered.
    pub fn append(&mut self, message: Message) -> Result<(), ConversationError> {
        match message.role {
            Role::Tool => {
                let id = message
                    .tool_call_id
                    .as_ref()
                    .ok_or(ConversationError::MissingToolCallId)?;
                if self.answered.contains(id) {
                    return Err(ConversationError::DuplicateToolResult(id.clone()));
                }
                let Some(position) = self.open_calls.iter().position(|open| open == id) else {
                    return Err(ConversationError::UnknownToolCallId(id.clone()));
                };
                let id = self.open_calls.remove(position);
                self.answered.insert(id);
            }
            role => {
                if !self.open_calls.is_empty() {
                    return Err(ConversationError::PendingToolCalls {
                        role: role.as_str(),
                        pending: self.open_calls.clone(),
                    });
                }
                if role == Role::Assistant {
                    let mut seen = HashSet::new();
                    for call in &message.tool_calls {
                        if !seen.insert(call.id.as_str()) {
                            return Err(ConversationError::DuplicateToolCallId(call.id.clone()));
                        }
                    }
                    self.open_calls = message.tool_calls.iter().map(|call| call.id.clone()).collect();
                    self.answered.clear();
                }
            }
        }

        self.messages.push(message);
        Ok(())
    }

    /// Marks the next appended message as the first of the in-progress turn.
    pub fn begin_turn(&mut self) {
        self.turn_start = Some(self.messages.len());
    }

    pub fn end_turn(&mut self) {
        self.turn_start = None;
    }

    /// Ids of the latest assistant message's calls that have no result yet.
    #[must_use]
    pub fn open_tool_calls(&self) -> &[String] {
        &self.open_calls
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn estimator(&self) -> TokenEstimator {
        self.estimator
    }

    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|message| self.estimator.message(message))
            .sum()
    }

    /// Drops everything except system messages.
    pub fn clear(&mut self) {
        self.messages.retain(|message| message.role == Role::System);
        self.turn_start = None;
        self.open_calls.clear();
        self.answered.clear();
    }

    /// Removes the oldest whole units until the estimate fits `budget`.
    ///
    /// A unit is a user message, or an assistant message with its tool
    /// results. System messages and the in-progress turn are never removed.
    pub fn compact(&mut self, budget: usize) -> Result<Option<Compaction>, BudgetError> {
        let tokens_before = self.estimate_tokens();
        if tokens_before <= budget {
            return Ok(None);
        }

        let mut estimated = tokens_before;
        let mut removed = 0;
        while estimated > budget {
            let Some(unit) = self.oldest_removable_unit() else {
                break;
            };
            let unit_tokens: usize = self.messages[unit.clone()]
                .iter()
                .map(|message| self.estimator.message(message))
                .sum();
            let unit_len = unit.len();
            self.messages.drain(unit);
            if let Some(start) = self.turn_start.as_mut() {
                *start -= unit_len;
            }
            estimated -= unit_tokens;
            removed += unit_len;
        }

        if estimated > budget {
            return Err(BudgetError::ContextExceeded { estimated, budget });
        }

        Ok(Some(Compaction {
            removed_messages: removed,
            tokens_before,
            tokens_after: estimated,
        }))
    }

    /// Reloads previously recorded messages after the current ones.
    ///
    /// A trailing assistant message whose tool calls were never all answered
    /// is dropped together with its partial results. Returns how many
    /// messages were restored.
    pub fn restore(&mut self, messages: Vec<Message>) -> Result<usize, ConversationError> {
        let mut messages: Vec<Message> = messages
            .into_iter()
            .filter(|message| message.role != Role::System)
            .collect();
        truncate_incomplete_tail(&mut messages);

        let restored = messages.len();
        for message in messages {
            self.append(message)?;
        }
        Ok(restored)
    }

    fn oldest_removable_unit(&self) -> Option<std::ops::Range<usize>> {
        let protected_from = self.turn_start.unwrap_or(self.messages.len());
        let start = self.messages[..protected_from]
            .iter()
            .position(|message| message.role != Role::System)?;

        let end = match self.messages[start].role {
            Role::Assistant => {
                let results = self.messages[start + 1..protected_from]
                    .iter()
                    .take_while(|message| message.role == Role::Tool)
                    .count();
                start + 1 + results
            }
            _ => start + 1,
        };
        Some(start..end)
    }
}

fn truncate_incomplete_tail(messages: &mut Vec<Message>) {
    let Some(last_assistant) = messages
        .iter()
        .rposition(|message| message.role == Role::Assistant)
    else {
        return;
    };

    let expected = messages[last_assistant].tool_calls.len();
    let answered = messages[last_assistant + 1..]
        .iter()
        .filter(|message| message.role == Role::Tool)
        .count();
    if answered < expected {
        messages.truncate(last_assistant);
    }
}
