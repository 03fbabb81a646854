// Role enforcement for every mutating call into the sync subsystem.
//
// The gate sits in front of the CRDT engine, the presence tracker, and the
// commit store: unauthorized mutations are rejected here, before any shared
// state is touched, so nothing partial is ever broadcast.

use uuid::Uuid;

use coedit_common::error::SyncError;
use coedit_common::types::{Collaborator, Role};

use crate::store::SharedDb;

/// Actions mediated by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    ManageCollaborators,
}

/// Role -> action matrix. Owner implies editor rights; editor implies
/// viewer rights.
pub fn role_allows(role: Role, action: Action) -> bool {
    match action {
        Action::Read => true,
        Action::Write => matches!(role, Role::Owner | Role::Editor),
        Action::ManageCollaborators => matches!(role, Role::Owner),
    }
}

#[derive(Clone)]
pub struct AccessGate {
    db: SharedDb,
}

impl AccessGate {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// Check that `user_id` may perform `action` on `file_id`.
    ///
    /// Unknown file -> `NotFound`; known file without a collaborator row for
    /// the user, or a role that does not allow the action -> `Unauthorized`.
    pub async fn authorize(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        action: Action,
    ) -> Result<Role, SyncError> {
        let db = self.db.lock().await;
        if !db.file_exists(file_id)? {
            return Err(SyncError::not_found("file"));
        }
        let role = db.role_for(file_id, user_id)?.ok_or(SyncError::Unauthorized)?;
        if !role_allows(role, action) {
            return Err(SyncError::Unauthorized);
        }
        Ok(role)
    }

    /// Add a collaborator with a role parsed from the request. Owner-only.
    pub async fn add_collaborator(
        &self,
        actor: Uuid,
        file_id: Uuid,
        collaborator: Uuid,
        role: &str,
    ) -> Result<(), SyncError> {
        self.authorize(actor, file_id, Action::ManageCollaborators).await?;
        let role: Role = role.parse()?;
        if role == Role::Owner {
            // Ownership is set at file creation and never granted afterwards.
            return Err(SyncError::InvalidRole("owner".to_string()));
        }
        if collaborator.is_nil() {
            return Err(SyncError::validation("collaborator id must not be nil"));
        }

        let db = self.db.lock().await;
        if db.role_for(file_id, collaborator)?.is_some() {
            return Err(SyncError::AlreadyCollaborator);
        }
        db.insert_collaborator(file_id, collaborator, role)
    }

    /// Change an existing collaborator's role. Owner-only.
    pub async fn change_role(
        &self,
        actor: Uuid,
        file_id: Uuid,
        collaborator: Uuid,
        role: &str,
    ) -> Result<(), SyncError> {
        self.authorize(actor, file_id, Action::ManageCollaborators).await?;
        let role: Role = role.parse()?;
        if role == Role::Owner {
            return Err(SyncError::InvalidRole("owner".to_string()));
        }

        let db = self.db.lock().await;
        if !db.update_collaborator_role(file_id, collaborator, role)? {
            return Err(SyncError::not_found("collaborator"));
        }
        Ok(())
    }

    /// List collaborators; requires at least read access.
    pub async fn list_collaborators(
        &self,
        actor: Uuid,
        file_id: Uuid,
    ) -> Result<Vec<Collaborator>, SyncError> {
        self.authorize(actor, file_id, Action::Read).await?;
        self.db.lock().await.list_collaborators(file_id)
    }
}
