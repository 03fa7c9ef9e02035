use agent_provider::{TransportError, TransportErrorKind};

/// Failure of a single tool invocation. Always becomes conversation data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("path escapes working root: {0}")]
    PathEscape(String),
    #[error("command timed out after {seconds}s; process group killed\n{output}")]
    Timeout { seconds: u64, output: String },
    #[error("command failed ({status})\n{output}")]
    NonZeroExit { status: String, output: String },
    #[error("{0}")]
    Io(String),
    #[error("command cancelled; process group killed\n{output}")]
    Cancelled { output: String },
}

impl ToolError {
    pub(crate) fn io(action: &str, path: &std::path::Path, error: std::io::Error) -> Self {
        Self::Io(format!("failed to {action} {}: {error}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("context budget exceeded: estimated {estimated} tokens, budget {budget}")]
    ContextExceeded { estimated: usize, budget: usize },
    #[error("turn limit reached: {limit} model requests in one turn")]
    MaxTurns { limit: u32 },
}

/// Conversation pairing violations. These are programming errors in the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("tool message is missing tool_call_id")]
    MissingToolCallId,
    #[error("tool result for unknown tool_call_id '{0}'")]
    UnknownToolCallId(String),
    #[error("duplicate tool result for tool_call_id '{0}'")]
    DuplicateToolResult(String),
    #[error("assistant message repeats tool call id '{0}'")]
    DuplicateToolCallId(String),
    #[error("cannot append {role} message while tool calls are unanswered: {pending:?}")]
    PendingToolCalls { role: &'static str, pending: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Short label shown next to the rendered message.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Transport(error) => match error.kind {
                TransportErrorKind::Transient => "transient",
                TransportErrorKind::RateLimited => "rate_limited",
                TransportErrorKind::AuthFailed => "auth_failed",
                TransportErrorKind::Malformed => "malformed",
            },
            Self::Budget(BudgetError::ContextExceeded { .. }) => "context_exceeded",
            Self::Budget(BudgetError::MaxTurns { .. }) => "max_turns",
            Self::Internal(_) => "internal",
        }
    }

    /// Message without the kind prefix.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Transport(error) => error.message.clone(),
            Self::Budget(error) => error.to_string(),
            Self::Internal(message) => message.clone(),
        }
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<ConversationError> for AgentError {
    fn from(error: ConversationError) -> Self {
        Self::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_follow_error_class() {
        let auth = AgentError::from(TransportError::new(TransportErrorKind::AuthFailed, "401"));
        assert_eq!(auth.kind_label(), "auth_failed");
        assert_eq!(auth.detail(), "401");

        let budget = AgentError::from(BudgetError::MaxTurns { limit: 3 });
        assert_eq!(budget.kind_label(), "max_turns");
        assert!(!budget.is_internal());

        let internal = AgentError::from(ConversationError::UnknownToolCallId("x".to_string()));
        assert_eq!(internal.kind_label(), "internal");
        assert!(internal.is_internal());
        assert!(internal.to_string().contains("unknown tool_call_id 'x'"));
    }

    #[test]
    fn command_errors_carry_captured_output() {
        let error = ToolError::NonZeroExit {
            status: "exit_code=2".to_string(),
            output: "stderr:\nboom".to_string(),
        };
        assert_eq!(error.to_string(), "command failed (exit_code=2)\nstderr:\nboom");
    }
}
