//! Database layer for the local metadata store

mod connection;
mod conflict_repository;
mod file_repository;
mod folder_repository;
mod migrations;
mod operation_repository;
mod settings_repository;
mod upload_session_repository;

use std::str::FromStr;

pub use connection::Database;
pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use file_repository::{FileRepository, SqliteFileRepository};
pub use folder_repository::{FolderRepository, SqliteFolderRepository};
pub use operation_repository::{OperationRepository, SqliteOperationRepository};
pub use settings_repository::{SettingsRepository, SqliteSettingsRepository};
pub use upload_session_repository::{
    SqliteUploadSessionRepository, UploadSession, UploadSessionRepository,
};

/// Read a text column and parse it, surfacing parse failures as conversion errors.
fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(error),
        )
    })
}

/// Read a non-negative integer column as `u64`.
fn u64_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            Box::new(error),
        )
    })
}

/// `SQLite` stores integers as i64; saturate the rare value above `i64::MAX`.
fn u64_param(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
