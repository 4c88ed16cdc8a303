//! Test transport that wraps `LocalTransport` with scripted failures.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ByteStream, LocalTransport, RemoteEntry, Transport, UploadMeta};
use crate::{Error, Result};

type ErrorFactory = fn() -> Error;

pub(crate) struct ScriptedTransport {
    inner: LocalTransport,
    failures: Mutex<HashMap<&'static str, (usize, ErrorFactory)>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    cancelled: Mutex<Vec<String>>,
    corrupt_chunks: AtomicBool,
}

impl ScriptedTransport {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            inner: LocalTransport::new(root).unwrap(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
            corrupt_chunks: AtomicBool::new(false),
        }
    }

    /// Make the next `times` calls of `method` fail with `error()`.
    pub(crate) fn fail(&self, method: &'static str, times: usize, error: ErrorFactory) {
        self.failures.lock().unwrap().insert(method, (times, error));
    }

    /// Flip the first byte of every chunk written from now on.
    pub(crate) fn corrupt_chunks(&self) {
        self.corrupt_chunks.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self, method: &'static str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub(crate) fn cancelled_uploads(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn enter(&self, method: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
        let mut failures = self.failures.lock().unwrap();
        if let Some((remaining, error)) = failures.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn list_remote(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.enter("list_remote")?;
        self.inner.list_remote(path).await
    }

    async fn upload_small(&self, local: &Path, dest: &str) -> Result<()> {
        self.enter("upload_small")?;
        self.inner.upload_small(local, dest).await
    }

    async fn download_range(&self, path: &str, offset: u64) -> Result<ByteStream> {
        self.enter("download_range")?;
        self.inner.download_range(path, offset).await
    }

    async fn delete_remote(&self, path: &str) -> Result<()> {
        self.enter("delete_remote")?;
        self.inner.delete_remote(path).await
    }

    async fn create_folder(&self, parent: &str, name: &str) -> Result<()> {
        self.enter("create_folder")?;
        self.inner.create_folder(parent, name).await
    }

    async fn move_or_rename(&self, src: &str, dst: &str) -> Result<()> {
        self.enter("move_or_rename")?;
        self.inner.move_or_rename(src, dst).await
    }

    async fn initiate_upload(&self, meta: &UploadMeta) -> Result<String> {
        self.enter("initiate_upload")?;
        self.inner.initiate_upload(meta).await
    }

    async fn upload_chunk(&self, upload_id: &str, offset: u64, bytes: &[u8]) -> Result<u64> {
        self.enter("upload_chunk")?;
        if self.corrupt_chunks.load(Ordering::SeqCst) && !bytes.is_empty() {
            let mut corrupted = bytes.to_vec();
            corrupted[0] ^= 0xff;
            return self.inner.upload_chunk(upload_id, offset, &corrupted).await;
        }
        self.inner.upload_chunk(upload_id, offset, bytes).await
    }

    async fn committed_offset(&self, upload_id: &str) -> Result<u64> {
        self.enter("committed_offset")?;
        self.inner.committed_offset(upload_id).await
    }

    async fn finalize_upload(
        &self,
        upload_id: &str,
        expected_size: u64,
        expected_hash: &str,
    ) -> Result<()> {
        self.enter("finalize_upload")?;
        self.inner
            .finalize_upload(upload_id, expected_size, expected_hash)
            .await
    }

    async fn cancel_upload(&self, upload_id: &str) -> Result<()> {
        self.enter("cancel_upload")?;
        self.cancelled.lock().unwrap().push(upload_id.to_string());
        self.inner.cancel_upload(upload_id).await
    }
}
