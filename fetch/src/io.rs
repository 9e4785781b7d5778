//! Interfaces of the external collaborators: the transport issuing remote reads and the disk
//! layer performing local writes.

use anyhow::Context;
use futures::future::BoxFuture;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// A request for one byte range of one file on a remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub node: String,
    pub source_dir: std::path::PathBuf,
    pub file: std::path::PathBuf,
    pub offset: u64,
    pub size: u64,
    /// Set on the final segment of the file so that the serving side may release the file early
    pub is_last: bool,
}

/// Issues remote reads. A returned buffer must hold exactly `request.size` bytes, anything else is
/// treated as a failed read.
pub trait Transport: Send + Sync + 'static {
    fn read(&self, request: ReadRequest) -> BoxFuture<'static, anyhow::Result<bytes::Bytes>>;
}

/// An open local file. The file is closed when the handle is dropped.
pub trait FileHandle: Send + 'static {
    fn write_at(&mut self, offset: u64, data: bytes::Bytes) -> BoxFuture<'_, anyhow::Result<()>>;
}

pub trait Disk: Send + Sync + 'static {
    fn open(
        &self,
        path: std::path::PathBuf,
    ) -> BoxFuture<'static, anyhow::Result<Box<dyn FileHandle>>>;
}

/// [`Disk`] backed by the local filesystem through `tokio::fs`.
///
/// Opening a file creates missing parent directories and truncates existing content.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDisk;

impl Disk for LocalDisk {
    fn open(
        &self,
        path: std::path::PathBuf,
    ) -> BoxFuture<'static, anyhow::Result<Box<dyn FileHandle>>> {
        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed creating directory {parent:?}"))?;
            }
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .await
                .with_context(|| format!("failed opening {:?} for writing", &path))?;
            tracing::debug!("opened {:?} for writing", &path);
            Ok::<_, anyhow::Error>(Box::new(LocalFile { file, path }) as Box<dyn FileHandle>)
        })
    }
}

struct LocalFile {
    file: tokio::fs::File,
    path: std::path::PathBuf,
}

impl FileHandle for LocalFile {
    fn write_at(&mut self, offset: u64, data: bytes::Bytes) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.file
                .seek(std::io::SeekFrom::Start(offset))
                .await
                .with_context(|| format!("failed seeking {:?} to {}", &self.path, offset))?;
            self.file
                .write_all(&data)
                .await
                .with_context(|| {
                    format!("failed writing {} bytes to {:?}", data.len(), &self.path)
                })?;
            // tokio buffers writes, flush so that completion means the bytes reached the file
            self.file
                .flush()
                .await
                .with_context(|| format!("failed flushing {:?}", &self.path))?;
            Ok::<(), anyhow::Error>(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_disk_writes_at_offsets() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("nested").join("dir").join("file.bin");
        let mut handle = LocalDisk.open(path.clone()).await?;
        handle.write_at(0, bytes::Bytes::from_static(b"hello ")).await?;
        handle.write_at(6, bytes::Bytes::from_static(b"world")).await?;
        drop(handle);
        assert_eq!(tokio::fs::read(&path).await?, b"hello world");
        Ok(())
    }

    #[tokio::test]
    async fn local_disk_truncates_existing_file() -> anyhow::Result<()> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("file.bin");
        tokio::fs::write(&path, b"some much longer stale content").await?;
        let mut handle = LocalDisk.open(path.clone()).await?;
        handle.write_at(0, bytes::Bytes::from_static(b"new")).await?;
        drop(handle);
        assert_eq!(tokio::fs::read(&path).await?, b"new");
        Ok(())
    }
}
