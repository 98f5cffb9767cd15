//! Embedded state store
//!
//! One SQLite database holds the active project descriptor, apply attempts
//! and the run-to-project history. Read-modify-write goes through an
//! `IMMEDIATE` transaction so two writers never interleave.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::error::{EngineError, Result};
use crate::models::attempt::{ApplyAttempt, AttemptFile, AttemptStatus};
use crate::models::project::ProjectDescriptor;

const LATEST_SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS active_project (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    descriptor TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attempts (
    id TEXT PRIMARY KEY,
    project_root TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    files TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS attempts_by_root
    ON attempts (project_root, status, created_at);

CREATE TABLE IF NOT EXISTS run_projects (
    run_id TEXT PRIMARY KEY,
    descriptor TEXT NOT NULL,
    repository_key TEXT,
    branch TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS run_projects_by_repository
    ON run_projects (repository_key, recorded_at);
";

/// Fixed-width timestamps so text order is time order.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad timestamp '{}': {}", raw, e),
            ))
        })
}

/// SQLite-backed state store
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "state store lock poisoned",
            ))
        })
    }

    /// Run `f` inside an `IMMEDIATE` transaction, committing on success.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // Active project

    /// The active descriptor, or the default one if none was ever saved.
    pub fn load_active(&self) -> Result<ProjectDescriptor> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT descriptor FROM active_project WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(ProjectDescriptor::default()),
        }
    }

    pub fn save_active(&self, descriptor: &ProjectDescriptor) -> Result<()> {
        let raw = serde_json::to_string(descriptor)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO active_project (id, descriptor, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET descriptor = excluded.descriptor,
                                           updated_at = excluded.updated_at",
            params![raw, timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    // Attempts

    pub fn insert_attempt(&self, attempt: &ApplyAttempt) -> Result<()> {
        let conn = self.lock()?;
        write_attempt(&conn, attempt)
    }

    pub fn get_attempt(&self, id: &str) -> Result<Option<ApplyAttempt>> {
        let conn = self.lock()?;
        read_attempt(&conn, id)
    }

    /// Read an attempt, let `f` change it, and write it back, all in one
    /// transaction. Nothing is written when `f` fails.
    pub fn update_attempt<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ApplyAttempt) -> Result<T>,
    ) -> Result<T> {
        self.transaction(|tx| {
            let mut attempt =
                read_attempt(tx, id)?.ok_or_else(|| EngineError::AttemptNotFound(id.to_string()))?;
            let value = f(&mut attempt)?;
            write_attempt(tx, &attempt)?;
            Ok(value)
        })
    }

    /// Most recently created active attempt for `project_root`.
    pub fn latest_active_attempt(&self, project_root: &str) -> Result<Option<ApplyAttempt>> {
        let conn = self.lock()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM attempts
                 WHERE project_root = ?1 AND status = ?2
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                params![project_root, AttemptStatus::Active.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => read_attempt(&conn, &id),
            None => Ok(None),
        }
    }

    // Run history

    /// Remember which project a run was made against.
    pub fn record_run(
        &self,
        run_id: &str,
        descriptor: &ProjectDescriptor,
        repository_key: Option<&str>,
    ) -> Result<()> {
        let raw = serde_json::to_string(descriptor)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO run_projects (run_id, descriptor, repository_key, branch, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id) DO UPDATE SET descriptor = excluded.descriptor,
                                               repository_key = excluded.repository_key,
                                               branch = excluded.branch,
                                               recorded_at = excluded.recorded_at",
            params![
                run_id,
                raw,
                repository_key,
                descriptor.branch,
                timestamp(&Utc::now())
            ],
        )?;
        Ok(())
    }

    pub fn descriptor_for_run(&self, run_id: &str) -> Result<Option<ProjectDescriptor>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT descriptor FROM run_projects WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(EngineError::from))
            .transpose()
    }

    /// Branches recorded for a repository, most recent first, deduplicated.
    pub fn branches_for_repository(&self, repository_key: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT branch FROM run_projects
             WHERE repository_key = ?1 AND branch IS NOT NULL AND branch != ''
             ORDER BY recorded_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![repository_key], |row| row.get::<_, String>(0))?;

        let mut branches: Vec<String> = Vec::new();
        for branch in rows {
            let branch = branch?;
            if !branches.contains(&branch) {
                branches.push(branch);
            }
        }
        Ok(branches)
    }
}

fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current > LATEST_SCHEMA_VERSION {
        return Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "state database schema {} is newer than supported {}",
                current, LATEST_SCHEMA_VERSION
            ),
        )));
    }

    if current < 1 {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(SCHEMA_V1)?;
        tx.pragma_update(None, "user_version", 1i64)?;
        tx.commit()?;
    }

    Ok(())
}

fn read_attempt(conn: &Connection, id: &str) -> Result<Option<ApplyAttempt>> {
    let row = conn
        .query_row(
            "SELECT id, project_root, status, created_at, completed_at, files
             FROM attempts WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, project_root, status, created_at, completed_at, files)) = row else {
        return Ok(None);
    };

    let status = AttemptStatus::parse(&status).ok_or_else(|| {
        EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown attempt status '{}'", status),
        ))
    })?;
    let files: Vec<AttemptFile> = serde_json::from_str(&files)?;

    Ok(Some(ApplyAttempt {
        id,
        status,
        created_at: parse_timestamp(&created_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        project_root,
        files,
    }))
}

fn write_attempt(conn: &Connection, attempt: &ApplyAttempt) -> Result<()> {
    conn.execute(
        "INSERT INTO attempts (id, project_root, status, created_at, completed_at, files)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET status = excluded.status,
                                       completed_at = excluded.completed_at,
                                       files = excluded.files",
        params![
            attempt.id,
            attempt.project_root,
            attempt.status.as_str(),
            timestamp(&attempt.created_at),
            attempt.completed_at.as_ref().map(timestamp),
            serde_json::to_string(&attempt.files)?,
        ],
    )?;
    Ok(())
}
