//! Transport-only client primitives for OpenAI-compatible chat completions.
//!
//! This crate owns request building, bearer authentication headers, retry
//! policy, and incremental SSE parsing for the `/chat/completions` endpoint.
//! It contains no conversation or tool semantics and no UI coupling.
//!
//! SSE normalization surfaces raw tool-call fragments keyed by their stream
//! `index` via [`ChatStreamEvent::ToolCallFragment`]; assembling fragments into
//! complete calls is the caller's job. Unparseable frames are reported as
//! [`ChatStreamEvent::Malformed`] instead of being skipped.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod url;

pub use client::{CancellationSignal, ChatApiClient};
pub use config::ChatApiConfig;
pub use error::ChatApiError;
pub use events::ChatStreamEvent;
pub use payload::{ChatFunction, ChatMessage, ChatRequest, ChatTool, ChatToolCall, ChatToolSpec};
pub use sse::SseStreamParser;
pub use url::normalize_chat_url;
