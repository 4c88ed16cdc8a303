//! Transport abstraction and transfer coordination.
//!
//! Every remote backend implements [`Transport`]; the rest of the engine never
//! branches on backend type.

mod coordinator;
mod local;
#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

pub use coordinator::{part_path, TransferCoordinator, UploadOutcome};
pub use local::LocalTransport;

use crate::sync::FileEntry;
use crate::Result;

/// Suffix of partially downloaded files next to their destination
pub const PART_SUFFIX: &str = ".driftsync-part";

/// Remote listings share the analyzer's entry shape.
pub type RemoteEntry = FileEntry;

/// Byte stream returned by ranged downloads
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// What the remote needs to open a chunked upload session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMeta {
    /// Destination path on the remote
    pub remote_path: String,
    pub total_size: u64,
    /// Hex BLAKE3 of the full content
    pub content_hash: String,
}

/// Capability interface of a remote backend.
///
/// Paths are `/`-separated and relative to the backend root.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Recursive listing under `path`; entry paths are relative to `path`.
    async fn list_remote(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Single-shot upload of a small file.
    async fn upload_small(&self, local: &Path, dest: &str) -> Result<()>;

    /// Stream `path` starting at byte `offset`.
    async fn download_range(&self, path: &str, offset: u64) -> Result<ByteStream>;

    async fn delete_remote(&self, path: &str) -> Result<()>;

    async fn create_folder(&self, parent: &str, name: &str) -> Result<()>;

    async fn move_or_rename(&self, src: &str, dst: &str) -> Result<()>;

    /// Open a chunked upload session and return its id.
    async fn initiate_upload(&self, meta: &UploadMeta) -> Result<String>;

    /// Append `bytes` at `offset`; returns the new committed offset.
    async fn upload_chunk(&self, upload_id: &str, offset: u64, bytes: &[u8]) -> Result<u64>;

    /// Bytes durably received for a session.
    async fn committed_offset(&self, upload_id: &str) -> Result<u64>;

    /// Verify size and hash, then publish the file at its destination.
    async fn finalize_upload(&self, upload_id: &str, expected_size: u64, expected_hash: &str)
        -> Result<()>;

    /// Discard a session and any partial data.
    async fn cancel_upload(&self, upload_id: &str) -> Result<()>;
}

/// Join a folder's remote root with a relative path.
pub fn remote_path(remote_root: &str, relative_path: &str) -> String {
    let root = remote_root.trim_matches('/');
    let relative = relative_path.trim_matches('/');
    match (root.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (false, true) => root.to_string(),
        (false, false) => format!("{root}/{relative}"),
    }
}
