// Durable storage: files (latest-content pointer), the append-only commit
// log, and collaborator roles. Backed by sqlite with WAL journaling and
// idempotent versioned migrations.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use coedit_common::error::SyncError;
use coedit_common::types::{Collaborator, Commit, FileRecord, Role};

pub type SharedDb = Arc<Mutex<MetaDb>>;

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE files (
    file_id     TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    content     TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE collaborators (
    file_id     TEXT NOT NULL REFERENCES files (file_id),
    user_id     TEXT NOT NULL,
    role        TEXT NOT NULL CHECK (role IN ('owner', 'editor', 'viewer')),
    added_at    TEXT NOT NULL,
    PRIMARY KEY (file_id, user_id)
);

CREATE TABLE commits (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    commit_id        TEXT NOT NULL UNIQUE,
    file_id          TEXT NOT NULL REFERENCES files (file_id),
    content          TEXT NOT NULL,
    committed_by     TEXT NOT NULL,
    parent_commit_id TEXT NULL,
    created_at       TEXT NOT NULL
);

CREATE INDEX commits_file_idx ON commits (file_id, seq);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

#[derive(Debug)]
pub struct MetaDb {
    conn: Connection,
}

impl MetaDb {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at `{}`", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> anyhow::Result<Self> {
        use anyhow::Context;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )
        .context("failed to configure sqlite pragmas")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn into_shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }

    // ── Files ──────────────────────────────────────────────────────

    /// Create a file; the creator becomes its owner collaborator.
    pub fn create_file(&mut self, name: &str, owner: Uuid) -> Result<FileRecord, SyncError> {
        if name.trim().is_empty() {
            return Err(SyncError::validation("file name must not be empty"));
        }
        if owner.is_nil() {
            return Err(SyncError::validation("owner id must not be nil"));
        }

        let record = FileRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            content: String::new(),
            created_at: Utc::now(),
        };

        let tx = self.conn.transaction().map_err(SyncError::internal)?;
        tx.execute(
            "INSERT INTO files (file_id, name, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id.to_string(),
                record.name,
                record.content,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(SyncError::internal)?;
        tx.execute(
            "INSERT INTO collaborators (file_id, user_id, role, added_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id.to_string(),
                owner.to_string(),
                Role::Owner.as_str(),
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(SyncError::internal)?;
        tx.commit().map_err(SyncError::internal)?;

        Ok(record)
    }

    pub fn file(&self, file_id: Uuid) -> Result<Option<FileRecord>, SyncError> {
        self.conn
            .query_row(
                "SELECT file_id, name, content, created_at FROM files WHERE file_id = ?1",
                params![file_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(SyncError::internal)?
            .map(|(id, name, content, created_at)| {
                Ok(FileRecord {
                    id: parse_uuid(&id)?,
                    name,
                    content,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .transpose()
    }

    pub fn file_exists(&self, file_id: Uuid) -> Result<bool, SyncError> {
        Ok(self.file(file_id)?.is_some())
    }

    /// Update the latest-content pointer. Written when the last live session
    /// detaches, not on every edit.
    pub fn persist_content(&self, file_id: Uuid, content: &str) -> Result<(), SyncError> {
        let changed = self
            .conn
            .execute(
                "UPDATE files SET content = ?2 WHERE file_id = ?1",
                params![file_id.to_string(), content],
            )
            .map_err(SyncError::internal)?;
        if changed == 0 {
            return Err(SyncError::not_found("file"));
        }
        Ok(())
    }

    // ── Collaborators ──────────────────────────────────────────────

    pub fn role_for(&self, file_id: Uuid, user_id: Uuid) -> Result<Option<Role>, SyncError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM collaborators WHERE file_id = ?1 AND user_id = ?2",
                params![file_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(SyncError::internal)?;
        raw.map(|value| value.parse()).transpose()
    }

    pub fn insert_collaborator(
        &self,
        file_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<(), SyncError> {
        self.conn
            .execute(
                "INSERT INTO collaborators (file_id, user_id, role, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    file_id.to_string(),
                    user_id.to_string(),
                    role.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(SyncError::internal)?;
        Ok(())
    }

    pub fn update_collaborator_role(
        &self,
        file_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<bool, SyncError> {
        let changed = self
            .conn
            .execute(
                "UPDATE collaborators SET role = ?3 WHERE file_id = ?1 AND user_id = ?2",
                params![file_id.to_string(), user_id.to_string(), role.as_str()],
            )
            .map_err(SyncError::internal)?;
        Ok(changed > 0)
    }

    pub fn list_collaborators(&self, file_id: Uuid) -> Result<Vec<Collaborator>, SyncError> {
        let mut statement = self
            .conn
            .prepare(
                "SELECT user_id, role FROM collaborators WHERE file_id = ?1 ORDER BY added_at",
            )
            .map_err(SyncError::internal)?;
        let rows = statement
            .query_map(params![file_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(SyncError::internal)?;

        let mut collaborators = Vec::new();
        for row in rows {
            let (user_id, role) = row.map_err(SyncError::internal)?;
            collaborators
                .push(Collaborator { user_id: parse_uuid(&user_id)?, role: role.parse()? });
        }
        Ok(collaborators)
    }

    // ── Commits ────────────────────────────────────────────────────

    /// Append a commit. Never overwrites; the parent pointer is the file's
    /// most recent prior commit, or null for the first.
    pub fn save_commit(
        &self,
        file_id: Uuid,
        content: &str,
        committed_by: Uuid,
    ) -> Result<Commit, SyncError> {
        if file_id.is_nil() {
            return Err(SyncError::validation("fileId must not be nil"));
        }
        if committed_by.is_nil() {
            return Err(SyncError::validation("committedBy must not be nil"));
        }
        if !self.file_exists(file_id)? {
            return Err(SyncError::not_found("file"));
        }

        let parent_commit_id = self.latest_commit_id(file_id)?;
        let commit = Commit {
            commit_id: Uuid::new_v4(),
            file_id,
            content: content.to_string(),
            committed_by,
            parent_commit_id,
            timestamp: Utc::now(),
        };

        self.conn
            .execute(
                "INSERT INTO commits
                     (commit_id, file_id, content, committed_by, parent_commit_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    commit.commit_id.to_string(),
                    commit.file_id.to_string(),
                    commit.content,
                    commit.committed_by.to_string(),
                    commit.parent_commit_id.map(|id| id.to_string()),
                    commit.timestamp.to_rfc3339(),
                ],
            )
            .map_err(SyncError::internal)?;

        Ok(commit)
    }

    /// Commits for a file, newest first.
    pub fn list_commits(&self, file_id: Uuid) -> Result<Vec<Commit>, SyncError> {
        let mut statement = self
            .conn
            .prepare(
                "SELECT commit_id, file_id, content, committed_by, parent_commit_id, created_at
                 FROM commits WHERE file_id = ?1 ORDER BY seq DESC",
            )
            .map_err(SyncError::internal)?;
        let rows = statement
            .query_map(params![file_id.to_string()], commit_row)
            .map_err(SyncError::internal)?;

        let mut commits = Vec::new();
        for row in rows {
            commits.push(row.map_err(SyncError::internal)?.into_commit()?);
        }
        Ok(commits)
    }

    pub fn get_commit(&self, commit_id: Uuid) -> Result<Commit, SyncError> {
        self.conn
            .query_row(
                "SELECT commit_id, file_id, content, committed_by, parent_commit_id, created_at
                 FROM commits WHERE commit_id = ?1",
                params![commit_id.to_string()],
                commit_row,
            )
            .optional()
            .map_err(SyncError::internal)?
            .ok_or_else(|| SyncError::not_found("commit"))?
            .into_commit()
    }

    /// Historical content for loading into an editor. Does not touch live
    /// replicated state; layering it back onto a live document is the
    /// caller's decision, expressed as ordinary operations.
    pub fn restore(&self, commit_id: Uuid) -> Result<String, SyncError> {
        Ok(self.get_commit(commit_id)?.content)
    }

    fn latest_commit_id(&self, file_id: Uuid) -> Result<Option<Uuid>, SyncError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT commit_id FROM commits WHERE file_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![file_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(SyncError::internal)?;
        raw.map(|id| parse_uuid(&id)).transpose()
    }
}

struct CommitRow {
    commit_id: String,
    file_id: String,
    content: String,
    committed_by: String,
    parent_commit_id: Option<String>,
    created_at: String,
}

impl CommitRow {
    fn into_commit(self) -> Result<Commit, SyncError> {
        Ok(Commit {
            commit_id: parse_uuid(&self.commit_id)?,
            file_id: parse_uuid(&self.file_id)?,
            content: self.content,
            committed_by: parse_uuid(&self.committed_by)?,
            parent_commit_id: self.parent_commit_id.as_deref().map(parse_uuid).transpose()?,
            timestamp: parse_timestamp(&self.created_at)?,
        })
    }
}

fn commit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommitRow> {
    Ok(CommitRow {
        commit_id: row.get(0)?,
        file_id: row.get(1)?,
        content: row.get(2)?,
        committed_by: row.get(3)?,
        parent_commit_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, SyncError> {
    Uuid::parse_str(raw).map_err(SyncError::internal)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(SyncError::internal)
}

fn ensure_migration_table(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn apply_pending_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    use anyhow::Context;

    for (version, sql) in MIGRATIONS {
        let already_applied: Option<i64> = conn
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![version],
                |row| row.get(0),
            )
            .optional()?;
        if already_applied.is_some() {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply schema migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
    }
    Ok(())
}
