//! Settings repository implementation

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

const DEVICE_ID_KEY: &str = "device_id";

/// Trait for key/value settings local to this device
pub trait SettingsRepository {
    /// Read a setting
    fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Write a setting
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// The device id, generated and stored on first use
    fn device_id(&self) -> Result<String>;
}

/// `SQLite` implementation of `SettingsRepository`
pub struct SqliteSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for SqliteSettingsRepository<'_> {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    fn device_id(&self) -> Result<String> {
        if let Some(existing) = self.get_setting(DEVICE_ID_KEY)? {
            return Ok(existing);
        }

        let device_id = uuid::Uuid::now_v7().to_string();
        self.conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)",
            params![DEVICE_ID_KEY, device_id],
        )?;
        tracing::info!(%device_id, "Generated device id");

        // Another writer may have won the insert
        Ok(self.get_setting(DEVICE_ID_KEY)?.unwrap_or(device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_missing_setting_is_none() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSettingsRepository::new(db.connection());
        assert_eq!(repo.get_setting("nope").unwrap(), None);
    }

    #[test]
    fn test_set_and_get_setting() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSettingsRepository::new(db.connection());

        repo.set_setting("theme", "dark").unwrap();
        repo.set_setting("theme", "light").unwrap();
        assert_eq!(repo.get_setting("theme").unwrap().as_deref(), Some("light"));
    }

    #[test]
    fn device_id_is_stable() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSettingsRepository::new(db.connection());

        let first = repo.device_id().unwrap();
        assert!(!first.is_empty());
        assert_eq!(repo.device_id().unwrap(), first);
    }
}
