use std::collections::HashSet;

use agent_provider::Message;

use crate::error::SessionStoreError;
use crate::schema::{SessionEntry, SessionEntryKind};
use crate::store::SessionStore;

impl SessionStore {
    /// Walks the parent chain ending at `target_leaf` (the current leaf when
    /// `None`) and returns its entries root-first.
    pub fn branch(&self, target_leaf: Option<&str>) -> Result<Vec<&SessionEntry>, SessionStoreError> {
        let Some(leaf_id) = target_leaf.or(self.current_leaf_id.as_deref()) else {
            return Ok(Vec::new());
        };

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(leaf_id);

        while let Some(id) = cursor {
            let Some(&index) = self.index_by_id.get(id) else {
                return Err(SessionStoreError::UnknownLeaf {
                    path: self.path.clone(),
                    leaf_id: id.to_string(),
                });
            };
            if !seen.insert(id) {
                return Err(SessionStoreError::ReplayCycle {
                    path: self.path.clone(),
                    leaf_id: leaf_id.to_string(),
                });
            }
            let entry = &self.entries[index];
            chain.push(entry);
            cursor = entry.parent_id.as_deref();
        }

        chain.reverse();
        Ok(chain)
    }

    /// Conversation messages recorded on the branch ending at `target_leaf`.
    /// Compaction and outcome markers are bookkeeping and are skipped.
    pub fn replay_messages(
        &self,
        target_leaf: Option<&str>,
    ) -> Result<Vec<Message>, SessionStoreError> {
        Ok(self
            .branch(target_leaf)?
            .into_iter()
            .filter_map(|entry| match &entry.kind {
                SessionEntryKind::Message { message } => Some(message.clone()),
                SessionEntryKind::Compaction { .. } | SessionEntryKind::TurnOutcome { .. } => None,
            })
            .collect())
    }
}
