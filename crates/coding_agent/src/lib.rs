//! Terminal coding agent.
//!
//! A [`session::Session`] holds one conversation with a chat-completions
//! model, executes the model's tool calls against a working root through
//! [`tools::BuiltinToolExecutor`], and streams everything to a
//! [`console::TerminalIo`].
//!
//! ## Provider bootstrap
//!
//! - `CODING_AGENT_PROVIDER=chat-api` (default) talks to an OpenAI-compatible
//!   `/chat/completions` endpoint. The key comes from `CODING_AGENT_API_KEY`,
//!   falling back to `OPENAI_API_KEY`; `CODING_AGENT_API_BASE_URL` overrides
//!   the endpoint.
//! - `CODING_AGENT_PROVIDER=mock` echoes the prompt back, for offline runs.
//!
//! See [`config`] for the remaining environment variables and flags.
//!
//! ## History contract
//!
//! Every tool message answers exactly one call of the assistant message
//! before it, and each call id executes at most once. Compaction removes whole
//! units from the front and never touches system messages or the turn in
//! progress.

pub mod app;
pub mod commands;
pub mod config;
pub mod console;
pub mod conversation;
pub mod error;
pub mod providers;
pub mod session;
pub mod tools;
pub mod transcript;
