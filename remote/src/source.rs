use std::path::{Component, Path, PathBuf};

use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::instrument;

use crate::protocol::{FileEntry, RemoteError};

/// Serves files below a root directory.
///
/// All paths in requests are relative to the root. Absolute paths and `..` components are
/// rejected so a request can never reach outside of it. A `DirSource` is also a
/// [`fetch::Transport`] on its own, which lets the engine pull from a local directory without a
/// server in between.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

/// Validates that a relative path does not escape its base directory.
fn validate_relative(path: &Path) -> Result<(), RemoteError> {
    let invalid = |reason: &str| RemoteError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    for component in path.components() {
        match component {
            Component::ParentDir => return Err(invalid("parent directory traversal not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute path not allowed"));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, dir: &Path, file: Option<&Path>) -> Result<PathBuf, RemoteError> {
        validate_relative(dir)?;
        let mut path = self.root.join(dir);
        if let Some(file) = file {
            if file.as_os_str().is_empty() {
                return Err(RemoteError::InvalidPath {
                    path: file.to_path_buf(),
                    reason: "empty file name".to_string(),
                });
            }
            validate_relative(file)?;
            path.push(file);
        }
        Ok(path)
    }

    /// Reads exactly `size` bytes at `offset` of `dir/file`.
    #[instrument(level = "debug", skip(self))]
    pub async fn read_range(
        &self,
        dir: &Path,
        file: &Path,
        offset: u64,
        size: u64,
    ) -> Result<bytes::Bytes, RemoteError> {
        let path = self.resolve(dir, Some(file))?;
        let mut handle = tokio::fs::File::open(&path)
            .await
            .map_err(|error| RemoteError::io(&path, &error))?;
        let len = handle
            .metadata()
            .await
            .map_err(|error| RemoteError::io(&path, &error))?
            .len();
        if offset.checked_add(size).is_none_or(|end| end > len) {
            return Err(RemoteError::OutOfRange {
                path: file.to_path_buf(),
                offset,
                size,
                len,
            });
        }
        handle
            .seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|error| RemoteError::io(&path, &error))?;
        let mut buffer = bytes::BytesMut::zeroed(size as usize);
        handle
            .read_exact(&mut buffer)
            .await
            .map_err(|error| RemoteError::io(&path, &error))?;
        Ok(buffer.freeze())
    }

    /// Sizes of the named files, or of every regular file below `dir` (sorted, relative to
    /// `dir`) when `files` is empty.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_files(
        &self,
        dir: &Path,
        files: &[PathBuf],
    ) -> Result<Vec<FileEntry>, RemoteError> {
        let base = self.resolve(dir, None)?;
        if files.is_empty() {
            return walk(&base).await;
        }
        let mut entries = Vec::with_capacity(files.len());
        for name in files {
            let path = self.resolve(dir, Some(name))?;
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|error| RemoteError::io(&path, &error))?;
            if !metadata.is_file() {
                return Err(RemoteError::InvalidPath {
                    path: name.clone(),
                    reason: "not a regular file".to_string(),
                });
            }
            entries.push(FileEntry {
                name: name.clone(),
                size: metadata.len(),
            });
        }
        Ok(entries)
    }
}

async fn walk(base: &Path) -> Result<Vec<FileEntry>, RemoteError> {
    let mut entries = vec![];
    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        let dir = base.join(&relative);
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|error| RemoteError::io(&dir, &error))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|error| RemoteError::io(&dir, &error))?
        {
            let name = relative.join(entry.file_name());
            // symlinks are not followed
            let file_type = entry
                .file_type()
                .await
                .map_err(|error| RemoteError::io(&entry.path(), &error))?;
            if file_type.is_dir() {
                pending.push(name);
            } else if file_type.is_file() {
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|error| RemoteError::io(&entry.path(), &error))?;
                entries.push(FileEntry {
                    name,
                    size: metadata.len(),
                });
            } else {
                tracing::debug!("skipping {:?}, not a regular file", entry.path());
            }
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

impl fetch::Transport for DirSource {
    fn read(
        &self,
        request: fetch::ReadRequest,
    ) -> BoxFuture<'static, anyhow::Result<bytes::Bytes>> {
        let source = self.clone();
        Box::pin(async move {
            let data = source
                .read_range(
                    &request.source_dir,
                    &request.file,
                    request.offset,
                    request.size,
                )
                .await?;
            Ok::<_, anyhow::Error>(data)
        })
    }
}
