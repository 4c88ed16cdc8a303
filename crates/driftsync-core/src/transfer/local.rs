//! Transport backed by a directory on a locally mounted filesystem.
//!
//! Used by tests and by the CLI when the "remote" is a mounted share. Chunked
//! sessions are staged under `.driftsync-uploads/<id>` inside the root.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use walkdir::WalkDir;

use super::{ByteStream, RemoteEntry, Transport, UploadMeta};
use crate::detector::hash_file_async;
use crate::{util, Error, Result};

const STAGING_DIR: &str = ".driftsync-uploads";
const SESSION_DATA: &str = "data";
const SESSION_META: &str = "meta.json";

/// Local filesystem transport
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    /// Create a transport rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.trim_matches('/').is_empty() {
            return Ok(self.root.clone());
        }
        let relative = util::normalize_relative_path(path)?;
        if relative == STAGING_DIR || relative.starts_with(&format!("{STAGING_DIR}/")) {
            return Err(Error::InvalidInput(format!("reserved remote path: {path}")));
        }
        Ok(self.root.join(relative))
    }

    fn session_dir(&self, upload_id: &str) -> Result<PathBuf> {
        uuid::Uuid::parse_str(upload_id)
            .map_err(|_| Error::InvalidInput(format!("invalid upload id: {upload_id}")))?;
        Ok(self.root.join(STAGING_DIR).join(upload_id))
    }

    async fn load_meta(&self, upload_id: &str) -> Result<(PathBuf, UploadMeta)> {
        let dir = self.session_dir(upload_id)?;
        let raw = match tokio::fs::read_to_string(dir.join(SESSION_META)).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("upload session {upload_id}")));
            }
            Err(error) => return Err(error.into()),
        };
        Ok((dir, serde_json::from_str(&raw)?))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn list_remote(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let base = self.resolve(path)?;
        if !base.exists() {
            return Ok(Vec::new());
        }

        let staging = self.root.join(STAGING_DIR);
        let walk_base = base.clone();
        let found = tokio::task::spawn_blocking(move || -> Result<Vec<(String, PathBuf, bool, u64, i64)>> {
            let mut found = Vec::new();
            for entry in WalkDir::new(&walk_base)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| entry.path() != staging.as_path())
            {
                let entry = entry.map_err(std::io::Error::from)?;
                if entry.file_type().is_symlink() {
                    continue;
                }
                let metadata = entry.metadata().map_err(std::io::Error::from)?;
                found.push((
                    util::relative_path(&walk_base, entry.path())?,
                    entry.path().to_path_buf(),
                    entry.file_type().is_dir(),
                    metadata.len(),
                    metadata.modified().map_or(0, util::system_time_millis),
                ));
            }
            Ok(found)
        })
        .await
        .map_err(|error| Error::Io(std::io::Error::other(error)))??;

        let mut entries = Vec::with_capacity(found.len());
        for (relative, absolute, is_directory, size, modified_at) in found {
            if is_directory {
                entries.push(RemoteEntry::directory(relative, modified_at));
            } else {
                let hash = hash_file_async(absolute).await?;
                entries.push(RemoteEntry::file(relative, hash, size, modified_at));
            }
        }
        Ok(entries)
    }

    async fn upload_small(&self, local: &Path, dest: &str) -> Result<()> {
        let target = self.resolve(dest)?;
        Self::ensure_parent(&target).await?;
        tokio::fs::copy(local, &target).await?;
        Ok(())
    }

    async fn download_range(&self, path: &str, offset: u64) -> Result<ByteStream> {
        let source = self.resolve(path)?;
        let mut file = match tokio::fs::File::open(&source).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("remote file {path}")));
            }
            Err(error) => return Err(error.into()),
        };
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Box::pin(file))
    }

    async fn delete_remote(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(&target).await?,
            Ok(_) => tokio::fs::remove_file(&target).await?,
            // Already gone
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        Ok(())
    }

    async fn create_folder(&self, parent: &str, name: &str) -> Result<()> {
        let target = self.resolve(&super::remote_path(parent, name))?;
        tokio::fs::create_dir_all(target).await?;
        Ok(())
    }

    async fn move_or_rename(&self, src: &str, dst: &str) -> Result<()> {
        let source = self.resolve(src)?;
        let target = self.resolve(dst)?;
        Self::ensure_parent(&target).await?;
        tokio::fs::rename(source, target).await?;
        Ok(())
    }

    async fn initiate_upload(&self, meta: &UploadMeta) -> Result<String> {
        // Validates the destination early
        self.resolve(&meta.remote_path)?;

        let upload_id = uuid::Uuid::now_v7().to_string();
        let dir = self.session_dir(&upload_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(SESSION_META), serde_json::to_vec(meta)?).await?;
        tokio::fs::File::create(dir.join(SESSION_DATA)).await?;
        Ok(upload_id)
    }

    async fn upload_chunk(&self, upload_id: &str, offset: u64, bytes: &[u8]) -> Result<u64> {
        let (dir, _) = self.load_meta(upload_id).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(dir.join(SESSION_DATA))
            .await?;

        let committed = file.metadata().await?.len();
        if offset > committed {
            return Err(Error::Transport(format!(
                "chunk at {offset} leaves a gap after committed offset {committed}"
            )));
        }
        // A resent chunk overwrites whatever followed its offset
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.sync_data().await?;
        Ok(offset + bytes.len() as u64)
    }

    async fn committed_offset(&self, upload_id: &str) -> Result<u64> {
        let (dir, _) = self.load_meta(upload_id).await?;
        Ok(tokio::fs::metadata(dir.join(SESSION_DATA)).await?.len())
    }

    async fn finalize_upload(
        &self,
        upload_id: &str,
        expected_size: u64,
        expected_hash: &str,
    ) -> Result<()> {
        let (dir, meta) = self.load_meta(upload_id).await?;
        let data = dir.join(SESSION_DATA);

        let size = tokio::fs::metadata(&data).await?.len();
        if size != expected_size {
            return Err(Error::Integrity {
                path: meta.remote_path,
                reason: format!("expected {expected_size} bytes, received {size}"),
            });
        }
        let hash = hash_file_async(data.clone()).await?;
        if hash != expected_hash {
            return Err(Error::Integrity {
                path: meta.remote_path,
                reason: format!("hash mismatch: expected {expected_hash}, got {hash}"),
            });
        }

        let target = self.resolve(&meta.remote_path)?;
        Self::ensure_parent(&target).await?;
        tokio::fs::rename(&data, &target).await?;
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    async fn cancel_upload(&self, upload_id: &str) -> Result<()> {
        let dir = self.session_dir(upload_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
