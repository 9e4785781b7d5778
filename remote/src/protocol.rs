//! Messages exchanged between `rpull` and `rpulld`.
//!
//! Every message is one bincode-encoded frame. A connection carries one request at a time: the
//! client sends a [`Request`] and waits for its [`Response`]. A [`Response::Data`] header is
//! followed by a second, raw frame holding exactly `size` bytes of file content.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Request {
    /// Sizes of `files` under `dir`, or of every regular file below `dir` when `files` is empty
    ListFiles { dir: PathBuf, files: Vec<PathBuf> },
    Read {
        dir: PathBuf,
        file: PathBuf,
        offset: u64,
        size: u64,
        is_last: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileEntry {
    /// Path relative to the listed directory
    pub name: PathBuf,
    pub size: u64,
}

impl From<FileEntry> for fetch::FileSpec {
    fn from(entry: FileEntry) -> Self {
        fetch::FileSpec {
            name: entry.name,
            size: entry.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Response {
    Files(Vec<FileEntry>),
    // implies the data frame follows immediately
    Data { size: u64 },
    Error(RemoteError),
}

/// Failure reported by the serving side. The connection stays usable after it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Deserialize, Serialize)]
pub enum RemoteError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("{path:?}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("{path:?} has {len} bytes, cannot read [{offset}, +{size})")]
    OutOfRange {
        path: PathBuf,
        offset: u64,
        size: u64,
        len: u64,
    },

    #[error("read of {size} bytes exceeds the {limit} byte frame limit")]
    TooLarge { size: u64, limit: u64 },
}

impl RemoteError {
    pub fn io(path: &std::path::Path, error: &std::io::Error) -> Self {
        RemoteError::Io {
            path: path.to_path_buf(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_survives_bincode() {
        let request = Request::Read {
            dir: "models".into(),
            file: "shard-0".into(),
            offset: 4 << 20,
            size: 1024,
            is_last: true,
        };
        let bytes = bincode::serialize(&request).unwrap();
        assert_eq!(bincode::deserialize::<Request>(&bytes).unwrap(), request);
    }

    #[test]
    fn error_message_names_the_range() {
        let error = RemoteError::OutOfRange {
            path: "a".into(),
            offset: 8,
            size: 4,
            len: 10,
        };
        assert_eq!(error.to_string(), "\"a\" has 10 bytes, cannot read [8, +4)");
    }
}
