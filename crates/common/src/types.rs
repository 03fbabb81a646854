// Core domain types shared across all coedit crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

/// A shared file: one replicated document plus its durable metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub name: String,
    /// Latest persisted materialization of the file's text. Updated when the
    /// last live session detaches, not on every edit.
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// An immutable snapshot of a file's content at a point in time.
///
/// Commits are append-only: once written they are never mutated or deleted,
/// and they are independent of the live operation stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub commit_id: Uuid,
    pub file_id: Uuid,
    pub content: String,
    pub committed_by: Uuid,
    pub parent_commit_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// A user's role on a single file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "owner" => Ok(Self::Owner),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            other => Err(SyncError::InvalidRole(other.to_string())),
        }
    }
}

/// A user attached to a file with a role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: Uuid,
    pub role: Role,
}

/// A cursor location in the editor, as lines and columns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

/// Ephemeral per-session presence. Created on attach, updated on cursor
/// moves, destroyed on disconnect; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    /// Hex color assigned to this peer (e.g. "#e06c75").
    pub color: String,
    pub cursor: CursorPosition,
    /// Per-session monotonic sequence number. Cursor updates are
    /// last-write-wins: an update with `seq` at or below the last one seen
    /// for the session is discarded as stale.
    pub seq: u64,
}
