// Ephemeral per-session presence (cursor, identity) for open files.
//
// Records live only while their session is attached; nothing here is ever
// persisted. Cursor updates are last-write-wins per session via a monotonic
// sequence number, since cursor position carries no causal meaning.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use coedit_common::types::{CursorPosition, PresenceRecord};

/// Tracks presence records per file, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    state: Arc<RwLock<HashMap<Uuid, HashMap<Uuid, PresenceRecord>>>>,
}

impl PresenceTracker {
    /// Register a new session on a file. The caller must have passed the
    /// access gate already. Returns the freshly created record.
    pub async fn attach(
        &self,
        file_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
        display_name: String,
        color: String,
    ) -> PresenceRecord {
        let record = PresenceRecord {
            session_id,
            user_id,
            display_name,
            color,
            cursor: CursorPosition { line: 1, column: 1 },
            seq: 0,
        };
        let mut guard = self.state.write().await;
        guard.entry(file_id).or_default().insert(session_id, record.clone());
        record
    }

    /// Apply a cursor move. Returns the updated record, or `None` when the
    /// update is stale (seq at or below the last seen) or the session is
    /// unknown.
    pub async fn update_cursor(
        &self,
        file_id: Uuid,
        session_id: Uuid,
        cursor: CursorPosition,
        seq: u64,
    ) -> Option<PresenceRecord> {
        let mut guard = self.state.write().await;
        let record = guard.get_mut(&file_id)?.get_mut(&session_id)?;
        if seq <= record.seq {
            return None;
        }
        record.cursor = cursor;
        record.seq = seq;
        Some(record.clone())
    }

    /// Remove a session's record. Returns `true` when the file has no
    /// remaining sessions (the signal to persist and release the document).
    pub async fn detach(&self, file_id: Uuid, session_id: Uuid) -> bool {
        let mut guard = self.state.write().await;
        let Some(sessions) = guard.get_mut(&file_id) else {
            return false;
        };
        sessions.remove(&session_id);
        if sessions.is_empty() {
            guard.remove(&file_id);
            true
        } else {
            false
        }
    }

    /// All presence records currently attached to a file, ordered by
    /// session id for deterministic output.
    pub async fn list(&self, file_id: Uuid) -> Vec<PresenceRecord> {
        let guard = self.state.read().await;
        let mut records: Vec<PresenceRecord> =
            guard.get(&file_id).map(|sessions| sessions.values().cloned().collect()).unwrap_or_default();
        records.sort_by_key(|record| record.session_id);
        records
    }
}
