//! Chunked, resumable uploads and ranged downloads.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::{Transport, UploadMeta, PART_SUFFIX};
use crate::config::EngineConfig;
use crate::db::UploadSession;
use crate::detector::hash_file_async;
use crate::services::MetadataStore;
use crate::{util, Error, Result};

const DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;

/// What reached the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub size: u64,
    pub content_hash: String,
    /// Whether the chunked protocol was used
    pub chunked: bool,
    /// Offset an interrupted session was resumed from
    pub resumed_from: Option<u64>,
}

/// Temporary download target next to `local_path`.
pub fn part_path(local_path: &Path) -> PathBuf {
    let mut name = local_path.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Moves file content between the local disk and a [`Transport`].
#[derive(Clone)]
pub struct TransferCoordinator {
    transport: Arc<dyn Transport>,
    store: MetadataStore,
    chunk_size: u64,
    small_file_threshold: u64,
}

impl TransferCoordinator {
    pub fn new(transport: Arc<dyn Transport>, store: MetadataStore, config: &EngineConfig) -> Self {
        Self {
            transport,
            store,
            chunk_size: config.chunk_size.max(1),
            small_file_threshold: config.small_file_threshold,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Upload `local_path` to `remote_path`.
    ///
    /// Large files go through the chunked protocol and resume from the
    /// remote's committed offset when a session for the same content exists.
    /// Cancellation is honored between chunks and keeps the session.
    pub async fn upload(
        &self,
        folder_id: &str,
        local_path: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let size = tokio::fs::metadata(local_path).await?.len();
        let content_hash = hash_file_async(local_path.to_path_buf()).await?;

        if size <= self.small_file_threshold {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.transport.upload_small(local_path, remote_path).await?;
            tracing::debug!(path = %remote_path, size, "Uploaded small file");
            return Ok(UploadOutcome {
                size,
                content_hash,
                chunked: false,
                resumed_from: None,
            });
        }

        let (upload_id, mut offset) = self
            .open_session(folder_id, remote_path, size, &content_hash)
            .await?;
        let resumed_from = (offset > 0).then_some(offset);
        if let Some(from) = resumed_from {
            tracing::info!(path = %remote_path, offset = from, "Resuming chunked upload");
        }

        let mut file = tokio::fs::File::open(local_path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = Vec::new();

        while offset < size {
            if cancel.is_cancelled() {
                tracing::info!(path = %remote_path, offset, "Upload cancelled; session kept");
                return Err(Error::Cancelled);
            }

            let len = self.chunk_size.min(size - offset);
            buffer.resize(usize::try_from(len).unwrap_or(usize::MAX), 0);
            file.read_exact(&mut buffer).await?;

            let committed = self.transport.upload_chunk(&upload_id, offset, &buffer).await?;
            if committed != offset + len {
                return Err(Error::Transport(format!(
                    "remote committed {committed} bytes, expected {}",
                    offset + len
                )));
            }
            offset = committed;
        }

        match self
            .transport
            .finalize_upload(&upload_id, size, &content_hash)
            .await
        {
            Ok(()) => {}
            Err(error @ Error::Integrity { .. }) => {
                tracing::warn!(path = %remote_path, %error, "Upload failed verification");
                if let Err(cancel_error) = self.transport.cancel_upload(&upload_id).await {
                    tracing::warn!(path = %remote_path, error = %cancel_error, "Failed to cancel upload");
                }
                self.store.delete_upload_session(folder_id, remote_path).await?;
                return Err(error);
            }
            Err(error) => return Err(error),
        }

        self.store.delete_upload_session(folder_id, remote_path).await?;
        tracing::debug!(path = %remote_path, size, "Finalized chunked upload");
        Ok(UploadOutcome {
            size,
            content_hash,
            chunked: true,
            resumed_from,
        })
    }

    /// Reuse a persisted session for identical content, or start a new one.
    async fn open_session(
        &self,
        folder_id: &str,
        remote_path: &str,
        size: u64,
        content_hash: &str,
    ) -> Result<(String, u64)> {
        if let Some(session) = self.store.get_upload_session(folder_id, remote_path).await? {
            if session.total_size == size && session.content_hash == content_hash {
                match self.transport.committed_offset(&session.upload_id).await {
                    Ok(offset) if offset <= size => return Ok((session.upload_id, offset)),
                    Ok(_) | Err(Error::NotFound(_)) => {}
                    Err(error) => return Err(error),
                }
            }
            // Content changed or the remote forgot the session
            if let Err(error) = self.transport.cancel_upload(&session.upload_id).await {
                tracing::debug!(%error, "Discarding stale upload session");
            }
            self.store.delete_upload_session(folder_id, remote_path).await?;
        }

        let upload_id = self
            .transport
            .initiate_upload(&UploadMeta {
                remote_path: remote_path.to_string(),
                total_size: size,
                content_hash: content_hash.to_string(),
            })
            .await?;
        self.store
            .save_upload_session(&UploadSession {
                folder_id: folder_id.to_string(),
                relative_path: remote_path.to_string(),
                upload_id: upload_id.clone(),
                total_size: size,
                content_hash: content_hash.to_string(),
                created_at: util::now_millis(),
            })
            .await?;
        Ok((upload_id, 0))
    }

    /// Download `remote_path` into `local_path` through a `.driftsync-part` file.
    ///
    /// An existing part file is resumed with a ranged request. When
    /// `expected_hash` is known the content is verified before the part file
    /// replaces the destination. Returns the final size.
    pub async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        expected_hash: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let part = part_path(local_path);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let verifiable = expected_hash.is_some_and(|hash| !hash.is_empty());
        let offset = match tokio::fs::metadata(&part).await {
            Ok(metadata) if verifiable => metadata.len(),
            // Leftover bytes can't be checked without a hash
            Ok(_) => {
                tokio::fs::remove_file(&part).await?;
                0
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => 0,
            Err(error) => return Err(error.into()),
        };
        if offset > 0 {
            tracing::info!(path = %remote_path, offset, "Resuming download");
        }

        let mut stream = self.transport.download_range(remote_path, offset).await?;
        let mut out = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&part)
            .await?;

        let mut buffer = vec![0_u8; DOWNLOAD_BUFFER_SIZE];
        let mut total = offset;
        loop {
            if cancel.is_cancelled() {
                out.flush().await?;
                return Err(Error::Cancelled);
            }
            let read = stream.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read]).await?;
            total += read as u64;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        if let Some(expected) = expected_hash.filter(|hash| !hash.is_empty()) {
            let actual = hash_file_async(part.clone()).await?;
            if actual != expected {
                tokio::fs::remove_file(&part).await?;
                return Err(Error::Integrity {
                    path: remote_path.to_string(),
                    reason: format!("downloaded hash {actual} does not match {expected}"),
                });
            }
        }

        tokio::fs::rename(&part, local_path).await?;
        tracing::debug!(path = %remote_path, size = total, "Downloaded file");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::testing::ScriptedTransport;
    use crate::transfer::LocalTransport;
    use pretty_assertions::assert_eq;

    fn config() -> EngineConfig {
        EngineConfig {
            chunk_size: 1_024,
            small_file_threshold: 2_048,
            ..EngineConfig::default()
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn chunked_upload_reconstructs_exact_bytes() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let data = payload(10_000);
        let source = local.path().join("big.bin");
        std::fs::write(&source, &data).unwrap();

        let store = MetadataStore::open_in_memory().unwrap();
        let transport = Arc::new(LocalTransport::new(remote.path()).unwrap());
        let coordinator = TransferCoordinator::new(transport, store.clone(), &config());

        let outcome = coordinator
            .upload("docs", &source, "docs/big.bin", &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.chunked);
        assert_eq!(outcome.size, 10_000);
        let uploaded = std::fs::read(remote.path().join("docs/big.bin")).unwrap();
        assert_eq!(blake3::hash(&uploaded), blake3::hash(&data));
        assert_eq!(
            store.get_upload_session("docs", "docs/big.bin").await.unwrap(),
            None
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interrupted_upload_resumes_from_committed_offset() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let data = payload(5_000);
        let source = local.path().join("big.bin");
        std::fs::write(&source, &data).unwrap();

        let store = MetadataStore::open_in_memory().unwrap();
        let transport = Arc::new(ScriptedTransport::new(remote.path()));
        let coordinator = TransferCoordinator::new(transport.clone(), store.clone(), &config());

        // First chunk lands, then the network drops on finalize
        transport.fail("finalize_upload", 1, || Error::Network("connection reset".into()));
        let error = coordinator
            .upload("docs", &source, "big.bin", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(error.is_transient());
        assert!(store.get_upload_session("docs", "big.bin").await.unwrap().is_some());
        assert_eq!(transport.calls("upload_chunk"), 5);

        let outcome = coordinator
            .upload("docs", &source, "big.bin", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.resumed_from, Some(5_000));
        assert_eq!(transport.calls("upload_chunk"), 5);
        assert_eq!(transport.calls("initiate_upload"), 1);
        assert_eq!(std::fs::read(remote.path().join("big.bin")).unwrap(), data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn integrity_failure_cancels_remote_session() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let source = local.path().join("big.bin");
        std::fs::write(&source, payload(4_000)).unwrap();

        let store = MetadataStore::open_in_memory().unwrap();
        let transport = Arc::new(ScriptedTransport::new(remote.path()));
        transport.corrupt_chunks();
        let coordinator = TransferCoordinator::new(transport.clone(), store.clone(), &config());

        let error = coordinator
            .upload("docs", &source, "big.bin", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Integrity { .. }));
        assert_eq!(transport.cancelled_uploads().len(), 1);
        assert!(!remote.path().join("big.bin").exists());
        assert_eq!(store.get_upload_session("docs", "big.bin").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_upload_keeps_session() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let source = local.path().join("big.bin");
        std::fs::write(&source, payload(4_000)).unwrap();

        let store = MetadataStore::open_in_memory().unwrap();
        let transport = Arc::new(LocalTransport::new(remote.path()).unwrap());
        let coordinator = TransferCoordinator::new(transport, store.clone(), &config());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let error = coordinator
            .upload("docs", &source, "big.bin", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Cancelled));
        assert!(store.get_upload_session("docs", "big.bin").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_resumes_part_file_and_verifies_hash() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let data = payload(3_000);
        std::fs::write(remote.path().join("a.bin"), &data).unwrap();

        let target = local.path().join("sub").join("a.bin");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(part_path(&target), &data[..1_000]).unwrap();

        let coordinator = TransferCoordinator::new(
            Arc::new(LocalTransport::new(remote.path()).unwrap()),
            MetadataStore::open_in_memory().unwrap(),
            &config(),
        );
        let expected = blake3::hash(&data).to_hex().to_string();
        let size = coordinator
            .download("a.bin", &target, Some(&expected), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(size, 3_000);
        assert_eq!(std::fs::read(&target).unwrap(), data);
        assert!(!part_path(&target).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_without_hash_restarts_from_scratch() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("a.bin"), b"current remote bytes").unwrap();

        let target = local.path().join("a.bin");
        std::fs::write(part_path(&target), b"older version").unwrap();

        let coordinator = TransferCoordinator::new(
            Arc::new(LocalTransport::new(remote.path()).unwrap()),
            MetadataStore::open_in_memory().unwrap(),
            &config(),
        );
        let size = coordinator
            .download("a.bin", &target, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(size, 20);
        assert_eq!(std::fs::read(&target).unwrap(), b"current remote bytes");
        assert!(!part_path(&target).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_with_wrong_hash_discards_part() {
        let local = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("a.bin"), b"remote bytes").unwrap();

        let coordinator = TransferCoordinator::new(
            Arc::new(LocalTransport::new(remote.path()).unwrap()),
            MetadataStore::open_in_memory().unwrap(),
            &config(),
        );
        let target = local.path().join("a.bin");
        let error = coordinator
            .download("a.bin", &target, Some("deadbeef"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Integrity { .. }));
        assert!(!target.exists());
        assert!(!part_path(&target).exists());
    }
}
