// Per-file session coordination.
//
// One `DocumentEntry` per open file holds the live CRDT and the outbound
// channel of every attached session. The entry's mutex serializes all edits
// to a single file; different files proceed in parallel. Documents are
// created lazily on first attach (seeded from the stored content) and
// released, after persisting, when the last session detaches.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use coedit_common::error::SyncError;
use coedit_common::op::Operation;
use coedit_common::protocol::ws::WsMessage;
use coedit_common::types::{Commit, CursorPosition};

use crate::access::{AccessGate, Action};
use crate::engine::TextCrdt;
use crate::presence::PresenceTracker;
use crate::store::SharedDb;

pub type SessionSender = mpsc::UnboundedSender<WsMessage>;

struct DocumentEntry {
    crdt: TextCrdt,
    sessions: HashMap<Uuid, SessionSender>,
}

impl DocumentEntry {
    /// Send to every attached session except `exclude`. A failed send means
    /// the receiver task is gone; the session is cleaned up on detach.
    fn broadcast(&self, message: &WsMessage, exclude: Option<Uuid>) {
        for (session_id, sender) in &self.sessions {
            if Some(*session_id) == exclude {
                continue;
            }
            let _ = sender.send(message.clone());
        }
    }
}

pub struct SyncCoordinator {
    db: SharedDb,
    gate: AccessGate,
    presence: PresenceTracker,
    docs: RwLock<HashMap<Uuid, Arc<Mutex<DocumentEntry>>>>,
    orphan_ttl: Duration,
}

impl SyncCoordinator {
    pub fn new(db: SharedDb, orphan_ttl: Duration) -> Self {
        Self {
            gate: AccessGate::new(db.clone()),
            presence: PresenceTracker::default(),
            docs: RwLock::new(HashMap::new()),
            db,
            orphan_ttl,
        }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn db(&self) -> &SharedDb {
        &self.db
    }

    // ── Session lifecycle ──────────────────────────────────────────

    /// Attach a session to a file. Requires read access. The joiner first
    /// receives the full operation backlog, then the presence of every peer
    /// already attached; peers are told about the newcomer.
    pub async fn attach(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        session_id: Uuid,
        display_name: String,
        color: String,
        sender: SessionSender,
    ) -> Result<(), SyncError> {
        self.gate.authorize(user_id, file_id, Action::Read).await?;

        let doc = self.open_document(file_id).await?;
        let mut entry = doc.lock().await;

        // Backlog before live traffic, so the joiner never sees an op that
        // depends on history it does not have.
        let _ = sender.send(WsMessage::Sync { operations: entry.crdt.operation_log() });
        for record in self.presence.list(file_id).await {
            let _ = sender.send(WsMessage::PresenceUpdate { presence: record });
        }

        entry.sessions.insert(session_id, sender);
        let record = self
            .presence
            .attach(file_id, session_id, user_id, display_name, color)
            .await;
        entry.broadcast(&WsMessage::PresenceUpdate { presence: record }, Some(session_id));

        debug!(%file_id, %session_id, %user_id, "session attached");
        Ok(())
    }

    /// Detach a session. When it was the last one on the file, the
    /// materialized text is persisted and the live document is released.
    pub async fn detach(&self, file_id: Uuid, session_id: Uuid) -> Result<(), SyncError> {
        let Some(doc) = self.document(file_id).await else {
            return Ok(());
        };
        let mut entry = doc.lock().await;
        entry.sessions.remove(&session_id);
        entry.broadcast(&WsMessage::PresenceLeave { session_id }, None);

        let released = self.presence.detach(file_id, session_id).await;
        debug!(%file_id, %session_id, released, "session detached");
        if !released {
            return Ok(());
        }

        let text = entry.crdt.text();
        self.db.lock().await.persist_content(file_id, &text)?;
        drop(entry);

        // Re-check under the write lock: a session may have attached through
        // the old handle between persisting and removal.
        let mut docs = self.docs.write().await;
        if let Some(doc) = docs.get(&file_id) {
            if doc.lock().await.sessions.is_empty() {
                docs.remove(&file_id);
                info!(%file_id, "document released");
            }
        }
        Ok(())
    }

    // ── Edits ──────────────────────────────────────────────────────

    /// Apply an operation from a session and fan it out. Requires write
    /// access. Duplicates are dropped; a delete whose target has not arrived
    /// is buffered and not broadcast until its insert flushes it.
    pub async fn apply(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        session_id: Uuid,
        operation: Operation,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.gate.authorize(user_id, file_id, Action::Write).await?;
        let doc = self
            .document(file_id)
            .await
            .ok_or_else(|| SyncError::not_found("session"))?;
        let mut entry = doc.lock().await;

        let result = entry.crdt.apply(operation.clone(), now);
        if result.applied() {
            entry.broadcast(&WsMessage::Op { operation }, Some(session_id));
        }
        // Flushed ops originated elsewhere and were never broadcast, so the
        // unblocking sender needs them too.
        for flushed in result.flushed {
            entry.broadcast(&WsMessage::Op { operation: flushed }, None);
        }
        Ok(())
    }

    /// LWW cursor move, fanned out to the session's peers. Stale or unknown
    /// updates are dropped silently.
    pub async fn update_cursor(
        &self,
        file_id: Uuid,
        session_id: Uuid,
        cursor: CursorPosition,
        seq: u64,
    ) {
        let Some(record) = self.presence.update_cursor(file_id, session_id, cursor, seq).await
        else {
            return;
        };
        if let Some(doc) = self.document(file_id).await {
            let entry = doc.lock().await;
            entry.broadcast(&WsMessage::PresenceUpdate { presence: record }, Some(session_id));
        }
    }

    // ── Versioning ─────────────────────────────────────────────────

    /// Record a named snapshot as a commit, `committed_by` the caller.
    /// Commits are append-only; the live document is not touched.
    pub async fn save_commit(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        content: &str,
    ) -> Result<Commit, SyncError> {
        self.gate.authorize(user_id, file_id, Action::Write).await?;
        self.db.lock().await.save_commit(file_id, content, user_id)
    }

    /// Restore a committed snapshot. The live document is never rewound:
    /// restoration re-enters as ordinary delete and insert operations, so
    /// concurrent editors converge on the restored text like on any edit.
    pub async fn restore_commit(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        commit_id: Uuid,
    ) -> Result<String, SyncError> {
        self.gate.authorize(user_id, file_id, Action::Write).await?;

        let commit = self.db.lock().await.get_commit(commit_id)?;
        if commit.file_id != file_id {
            return Err(SyncError::not_found("commit"));
        }

        match self.document(file_id).await {
            Some(doc) => {
                let mut entry = doc.lock().await;
                let visible = entry.crdt.visible_len();
                let mut operations = entry.crdt.local_delete(0, visible);
                operations.extend(entry.crdt.local_insert(0, &commit.content));
                for operation in operations {
                    entry.broadcast(&WsMessage::Op { operation }, None);
                }
            }
            None => self.db.lock().await.persist_content(file_id, &commit.content)?,
        }
        info!(%file_id, %commit_id, "commit restored");
        Ok(commit.content)
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Drop buffered deletes past their TTL across all open documents.
    /// Called from the background sweeper.
    pub async fn sweep_orphans(&self, now: DateTime<Utc>) {
        let docs: Vec<(Uuid, Arc<Mutex<DocumentEntry>>)> = self
            .docs
            .read()
            .await
            .iter()
            .map(|(file_id, doc)| (*file_id, doc.clone()))
            .collect();
        for (file_id, doc) in docs {
            for dropped in doc.lock().await.crdt.expire_orphans(now) {
                warn!(
                    %file_id,
                    origin = %dropped.origin_id,
                    counter = dropped.site_counter,
                    "dropped orphaned operation past its ttl"
                );
            }
        }
    }

    /// Materialized text of an open document, if any.
    pub async fn live_text(&self, file_id: Uuid) -> Option<String> {
        let doc = self.document(file_id).await?;
        let entry = doc.lock().await;
        Some(entry.crdt.text())
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn document(&self, file_id: Uuid) -> Option<Arc<Mutex<DocumentEntry>>> {
        self.docs.read().await.get(&file_id).cloned()
    }

    /// Get or lazily create the live document, seeding the CRDT from the
    /// stored content.
    async fn open_document(&self, file_id: Uuid) -> Result<Arc<Mutex<DocumentEntry>>, SyncError> {
        let mut docs = self.docs.write().await;
        if let Some(doc) = docs.get(&file_id) {
            return Ok(doc.clone());
        }

        let content = self
            .db
            .lock()
            .await
            .file(file_id)?
            .ok_or_else(|| SyncError::not_found("file"))?
            .content;
        let mut crdt = TextCrdt::with_orphan_ttl(Uuid::new_v4(), self.orphan_ttl);
        crdt.local_insert(0, &content);

        let doc = Arc::new(Mutex::new(DocumentEntry { crdt, sessions: HashMap::new() }));
        docs.insert(file_id, doc.clone());
        info!(%file_id, "document opened");
        Ok(doc)
    }
}
