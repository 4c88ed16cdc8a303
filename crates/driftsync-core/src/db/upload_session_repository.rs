//! Resumable upload session persistence

use serde::{Deserialize, Serialize};

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

use super::{u64_column, u64_param};

/// A chunked upload that has been initiated on the remote but not finalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub folder_id: String,
    pub relative_path: String,
    /// Remote-side session handle
    pub upload_id: String,
    pub total_size: u64,
    /// Hash of the content being uploaded; a changed file invalidates the session
    pub content_hash: String,
    pub created_at: i64,
}

/// Trait for upload session storage
pub trait UploadSessionRepository {
    fn get_session(&self, folder_id: &str, relative_path: &str) -> Result<Option<UploadSession>>;

    fn save_session(&self, session: &UploadSession) -> Result<()>;

    fn delete_session(&self, folder_id: &str, relative_path: &str) -> Result<bool>;
}

/// `SQLite` implementation of `UploadSessionRepository`
pub struct SqliteUploadSessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteUploadSessionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl UploadSessionRepository for SqliteUploadSessionRepository<'_> {
    fn get_session(&self, folder_id: &str, relative_path: &str) -> Result<Option<UploadSession>> {
        let session = self
            .conn
            .query_row(
                "SELECT folder_id, relative_path, upload_id, total_size, content_hash, created_at
                 FROM upload_sessions WHERE folder_id = ? AND relative_path = ?",
                params![folder_id, relative_path],
                |row| {
                    Ok(UploadSession {
                        folder_id: row.get(0)?,
                        relative_path: row.get(1)?,
                        upload_id: row.get(2)?,
                        total_size: u64_column(row, 3)?,
                        content_hash: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    fn save_session(&self, session: &UploadSession) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO upload_sessions
                (folder_id, relative_path, upload_id, total_size, content_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                session.folder_id,
                session.relative_path,
                session.upload_id,
                u64_param(session.total_size),
                session.content_hash,
                session.created_at,
            ],
        )?;
        Ok(())
    }

    fn delete_session(&self, folder_id: &str, relative_path: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM upload_sessions WHERE folder_id = ? AND relative_path = ?",
            params![folder_id, relative_path],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn session_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteUploadSessionRepository::new(db.connection());

        let session = UploadSession {
            folder_id: "docs".to_string(),
            relative_path: "big.bin".to_string(),
            upload_id: "up-1".to_string(),
            total_size: 10 * 1024 * 1024,
            content_hash: "abc".to_string(),
            created_at: 1_000,
        };
        repo.save_session(&session).unwrap();
        assert_eq!(
            repo.get_session("docs", "big.bin").unwrap(),
            Some(session.clone())
        );

        let replaced = UploadSession {
            upload_id: "up-2".to_string(),
            ..session
        };
        repo.save_session(&replaced).unwrap();
        assert_eq!(
            repo.get_session("docs", "big.bin").unwrap().map(|s| s.upload_id),
            Some("up-2".to_string())
        );

        assert!(repo.delete_session("docs", "big.bin").unwrap());
        assert_eq!(repo.get_session("docs", "big.bin").unwrap(), None);
    }
}
