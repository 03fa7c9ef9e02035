//! Optional JSONL transcript of a session.
//!
//! Write failures are logged and otherwise ignored: losing the transcript
//! must never fail a turn.

use std::path::Path;

use agent_provider::Message;
use session_store::{SessionEntryKind, SessionStore, SessionStoreError};

use crate::conversation::Compaction;
use crate::session::TurnOutcome;

#[derive(Debug)]
pub struct Transcript {
    store: SessionStore,
}

impl Transcript {
    /// Starts a new transcript file under `working_root`.
    pub fn create(working_root: &Path, model: &str) -> Result<Self, SessionStoreError> {
        let store = SessionStore::create_new(working_root, model)?;
        tracing::info!(path = %store.path().display(), "transcript started");
        Ok(Self { store })
    }

    /// Reopens the most recent transcript under `working_root` and returns
    /// the messages on its current branch.
    pub fn resume_latest(working_root: &Path) -> Result<(Self, Vec<Message>), SessionStoreError> {
        let path = SessionStore::latest_session_path(working_root)?;
        let store = SessionStore::open(&path)?;
        let messages = store.replay_messages(store.current_leaf_id())?;
        tracing::info!(
            path = %store.path().display(),
            messages = messages.len(),
            "transcript resumed"
        );
        Ok((Self { store }, messages))
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn session_id(&self) -> &str {
        &self.store.header().session_id
    }

    pub fn record_message(&mut self, message: &Message) {
        self.record(SessionEntryKind::Message {
            message: message.clone(),
        });
    }

    pub fn record_compaction(&mut self, compaction: &Compaction) {
        self.record(SessionEntryKind::Compaction {
            removed_messages: compaction.removed_messages,
            tokens_before: compaction.tokens_before,
            tokens_after: compaction.tokens_after,
        });
    }

    pub fn record_outcome(&mut self, outcome: &TurnOutcome) {
        self.record(SessionEntryKind::TurnOutcome {
            outcome: outcome.label().to_string(),
            detail: outcome.detail(),
        });
    }

    fn record(&mut self, kind: SessionEntryKind) {
        if let Err(error) = self.store.record(kind) {
            tracing::warn!(path = %self.store.path().display(), %error, "transcript write failed");
        }
    }
}
