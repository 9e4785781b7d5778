//! Job, file and segment bookkeeping.
//!
//! Jobs live in the engine's arena keyed by [`JobId`]. Files and segments are stored by index
//! inside their job, so a segment is addressed by a [`SegmentRef`] instead of holding pointers
//! back to its owners.

use crate::error::Error;
use crate::io::FileHandle;

/// Stable identifier of a submitted job, never reused by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Low,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{other}', expected 'high' or 'low'")),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// One file to fetch, its size was discovered before the job was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    /// Path relative to both the source and the destination directory
    pub name: std::path::PathBuf,
    pub size: u64,
}

/// A ready-to-run transfer request.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Remote node serving the files
    pub node: String,
    /// Directory on the remote node the file names are relative to
    pub source_dir: std::path::PathBuf,
    /// Local directory the files are written into
    pub dest_dir: std::path::PathBuf,
    pub files: Vec<FileSpec>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub files: usize,
    pub bytes: u64,
    pub elapsed: std::time::Duration,
}

impl std::fmt::Display for JobSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files fetched: {}\n\
            bytes fetched: {}\n\
            elapsed: {:.2?}",
            self.files,
            bytesize::ByteSize(self.bytes),
            self.elapsed,
        )
    }
}

/// Invoked exactly once when a job succeeds, fails or is cancelled.
///
/// Runs on the engine's dispatch task, so it must not block.
pub type Callback = Box<dyn FnOnce(Result<JobSummary, Error>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SegmentRef {
    pub job: JobId,
    pub file: usize,
    pub index: usize,
}

#[derive(Debug)]
pub(crate) enum SegmentState {
    Pending,
    RemoteCopyInFlight,
    ReadyForWrite(bytes::Bytes),
    WriteInFlight,
    Done,
}

#[derive(Debug)]
pub(crate) struct Segment {
    pub offset: u64,
    pub size: u64,
    pub is_last: bool,
    pub retries_left: u32,
    pub state: SegmentState,
}

impl Segment {
    pub fn is_buffered(&self) -> bool {
        matches!(self.state, SegmentState::ReadyForWrite(_))
    }
}

/// Divides a file into segments of `segment_size` bytes, the last one possibly shorter. An empty
/// file still gets one (empty) segment so that it is created locally.
pub(crate) fn split_segments(file_size: u64, segment_size: u64, retries: u32) -> Vec<Segment> {
    assert!(segment_size > 0);
    let count = std::cmp::max(1, file_size.div_ceil(segment_size));
    (0..count)
        .map(|index| {
            let offset = index * segment_size;
            Segment {
                offset,
                size: std::cmp::min(segment_size, file_size - offset),
                is_last: index + 1 == count,
                retries_left: retries,
                state: SegmentState::Pending,
            }
        })
        .collect()
}

pub(crate) struct FileState {
    pub name: std::path::PathBuf,
    pub size: u64,
    pub segments: Vec<Segment>,
    /// Index of the next segment allowed to be written
    pub current_write_index: usize,
    pub finished_segments: usize,
    /// Opened by the first write, lent to the write task while a write is in flight and dropped
    /// (closing the file) once the last segment is written
    pub handle: Option<Box<dyn FileHandle>>,
}

impl FileState {
    pub fn is_complete(&self) -> bool {
        self.finished_segments == self.segments.len()
    }
}

impl std::fmt::Debug for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("FileState")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("segments", &self.segments.len())
            .field("current_write_index", &self.current_write_index)
            .field("finished_segments", &self.finished_segments)
            .field("is_open", &self.handle.is_some())
            .finish()
    }
}

pub(crate) struct Job {
    pub id: JobId,
    pub priority: Priority,
    pub node: String,
    pub source_dir: std::path::PathBuf,
    pub dest_dir: std::path::PathBuf,
    pub files: Vec<FileState>,
    pub finished_files: usize,
    /// Remote reads currently in flight for this job
    pub concurrent_copy_count: usize,
    pub is_finished: bool,
    pub on_complete: Option<Callback>,
    pub started: std::time::Instant,
}

impl Job {
    pub fn new(
        id: JobId,
        spec: JobSpec,
        segment_size: u64,
        retries: u32,
        on_complete: Callback,
    ) -> Self {
        let files = spec
            .files
            .into_iter()
            .map(|file| FileState {
                segments: split_segments(file.size, segment_size, retries),
                name: file.name,
                size: file.size,
                current_write_index: 0,
                finished_segments: 0,
                handle: None,
            })
            .collect();
        Self {
            id,
            priority: spec.priority,
            node: spec.node,
            source_dir: spec.source_dir,
            dest_dir: spec.dest_dir,
            files,
            finished_files: 0,
            concurrent_copy_count: 0,
            is_finished: false,
            on_complete: Some(on_complete),
            started: std::time::Instant::now(),
        }
    }

    /// All segments of the job in file order, the order they are first queued in.
    pub fn segment_refs(&self) -> Vec<SegmentRef> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(file, state)| {
                (0..state.segments.len()).map(move |index| SegmentRef {
                    job: self.id,
                    file,
                    index,
                })
            })
            .collect()
    }

    pub fn segment(&self, seg: SegmentRef) -> &Segment {
        &self.files[seg.file].segments[seg.index]
    }

    pub fn buffered_segments(&self) -> usize {
        self.files
            .iter()
            .flat_map(|file| file.segments.iter())
            .filter(|segment| segment.is_buffered())
            .count()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            files: self.files.len(),
            bytes: self.files.iter().map(|file| file.size).sum(),
            elapsed: self.started.elapsed(),
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("node", &self.node)
            .field("files", &self.files.len())
            .field("finished_files", &self.finished_files)
            .field("concurrent_copy_count", &self.concurrent_copy_count)
            .field("is_finished", &self.is_finished)
            .finish()
    }
}
