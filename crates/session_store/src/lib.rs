//! Append-only JSONL transcripts for coding-agent sessions.
//!
//! One session per file under `<cwd>/.coding_agent/sessions/`. The first line
//! is a [`SessionHeader`]; every following line is a [`SessionEntry`] linked to
//! its predecessor through `parent_id`.

mod error;
mod paths;
mod replay;
mod schema;
mod store;

pub use error::SessionStoreError;
pub use paths::{session_file_name, session_root};
pub use schema::{
    EntryRecordType, SessionEntry, SessionEntryKind, SessionHeader, SessionRecordType,
};
pub use store::SessionStore;
