use serde::{Deserialize, Serialize};

/// Stream event emitted by the parser after normalization.
///
/// Tool-call fragments are surfaced raw; the provider only guarantees that
/// `id` and `name` arrive on the first fragment of each `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    ContentDelta {
        delta: String,
    },
    ToolCallFragment {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    Finished {
        reason: String,
    },
    /// The `[DONE]` sentinel.
    Done,
    ProviderError {
        code: Option<String>,
        message: String,
    },
    /// A frame that could not be decoded. Carries a short description.
    Malformed {
        detail: String,
    },
}

impl ChatStreamEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ProviderError { .. } | Self::Malformed { .. })
    }
}
