//! Remote read and local write stages of the dispatch task.
//!
//! A segment moves `Pending -> RemoteCopyInFlight -> ReadyForWrite -> WriteInFlight -> Done`.
//! Reads of one file may complete in any order but writes are issued strictly by segment index,
//! one at a time per file: a fetched segment only enters the write queue once every segment
//! before it has been written. A failure at either stage sends the segment back to `Pending`
//! while it has retries left and fails the whole job otherwise.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;

use crate::engine::{Core, Event, send_event};
use crate::error::Error;
use crate::io::{Disk, FileHandle, ReadRequest, Transport};
use crate::job::{SegmentRef, SegmentState};

impl Core {
    fn write_pipeline_idle(&self) -> bool {
        self.counters.concurrent_local_writes.get() == 0 && self.write_queue.is_empty()
    }

    fn may_start_remote_read(&self) -> bool {
        let in_flight = self.counters.concurrent_copy_requests.get();
        if in_flight >= self.settings.max_concurrent_remote_copy_requests {
            return false;
        }
        // reads in flight will land in the buffer, count them as already buffered
        let buffered = self.counters.buffered_local_writes.get();
        if buffered + in_flight >= self.settings.max_buffered_local_writes {
            // the buffer may be full of segments waiting for a retried one, nothing would ever
            // drain it, so let a single read through when everything else is idle
            return in_flight == 0 && self.write_pipeline_idle();
        }
        true
    }

    /// Starts as many remote reads as the concurrency, buffer and rate budgets allow.
    pub(crate) fn try_dispatch(&mut self) {
        while !self.copy_queue.is_empty() && self.may_start_remote_read() {
            if let Err(wait) = self.limiter.check() {
                self.schedule_replenish(wait);
                return;
            }
            let per_job_cap = self.settings.max_copy_requests_per_job;
            let jobs = &self.jobs;
            let Some((_, seg)) = self.copy_queue.pop(|id| {
                jobs.get(&id)
                    .is_some_and(|job| job.concurrent_copy_count < per_job_cap)
            }) else {
                // every job with queued work is at its cap, a read completion will wake us up
                return;
            };
            self.start_remote_read(seg);
        }
    }

    fn schedule_replenish(&mut self, wait: Duration) {
        if self.replenish_pending {
            return;
        }
        self.replenish_pending = true;
        tracing::trace!("rate limited, next dispatch in {wait:?}");
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            send_event(&events, Event::Replenished);
        });
    }

    fn start_remote_read(&mut self, seg: SegmentRef) {
        let Some(job) = self.jobs.get_mut(&seg.job) else {
            return;
        };
        let segment = job.segment(seg);
        let request = ReadRequest {
            node: job.node.clone(),
            source_dir: job.source_dir.clone(),
            file: job.files[seg.file].name.clone(),
            offset: segment.offset,
            size: segment.size,
            is_last: segment.is_last,
        };
        job.files[seg.file].segments[seg.index].state = SegmentState::RemoteCopyInFlight;
        job.concurrent_copy_count += 1;
        self.counters.concurrent_copy_requests.inc();
        self.limiter.consume(request.size);
        tracing::debug!(
            "{}: reading {:?} [{}, +{}) from {}",
            seg.job,
            &request.file,
            request.offset,
            request.size,
            &request.node
        );
        let transport = self.transport.clone();
        let events = self.events.clone();
        let rpc_timeout = self.settings.rpc_timeout;
        tokio::spawn(async move {
            let result = remote_read(transport.as_ref(), request, rpc_timeout).await;
            send_event(&events, Event::RemoteReadDone { seg, result });
        });
    }

    pub(crate) fn on_remote_read_done(&mut self, seg: SegmentRef, result: anyhow::Result<Bytes>) {
        self.counters.concurrent_copy_requests.dec();
        let Some(job) = self.jobs.get_mut(&seg.job) else {
            tracing::debug!("{}: finished, ignoring read of segment {}", seg.job, seg.index);
            return;
        };
        job.concurrent_copy_count -= 1;
        match result {
            Ok(bytes) => {
                self.counters.bytes_copied.add(bytes.len() as u64);
                let file = &mut job.files[seg.file];
                file.segments[seg.index].state = SegmentState::ReadyForWrite(bytes);
                self.counters.buffered_local_writes.inc();
                if file.current_write_index == seg.index {
                    self.write_queue.push_back(seg);
                } else {
                    tracing::trace!(
                        "{}: holding segment {} of {:?} until {} is written",
                        seg.job,
                        seg.index,
                        &file.name,
                        file.current_write_index
                    );
                }
            }
            Err(error) => {
                self.counters.copy_failures.inc();
                self.retry_or_fail(seg, Error::RemoteReadFailed(error));
            }
        }
    }

    /// Starts queued writes up to the local write concurrency limit.
    pub(crate) fn pump_writes(&mut self) {
        while self.counters.concurrent_local_writes.get()
            < self.settings.max_concurrent_local_writes
        {
            let Some(seg) = self.write_queue.pop_front() else {
                return;
            };
            self.start_local_write(seg);
        }
    }

    fn start_local_write(&mut self, seg: SegmentRef) {
        let Some(job) = self.jobs.get_mut(&seg.job) else {
            return;
        };
        let path = job.dest_dir.join(&job.files[seg.file].name);
        let file = &mut job.files[seg.file];
        let segment = &mut file.segments[seg.index];
        let bytes = match std::mem::replace(&mut segment.state, SegmentState::WriteInFlight) {
            SegmentState::ReadyForWrite(bytes) => bytes,
            other => {
                tracing::error!(
                    "{}: segment {} of {:?} queued for write in state {:?}",
                    seg.job,
                    seg.index,
                    &path,
                    &other
                );
                segment.state = other;
                return;
            }
        };
        let offset = segment.offset;
        let handle = file.handle.take();
        self.counters.concurrent_local_writes.inc();
        tracing::debug!(
            "{}: writing {:?} [{}, +{})",
            seg.job,
            &path,
            offset,
            bytes.len()
        );
        let disk = self.disk.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let (handle, result) = local_write(disk.as_ref(), handle, path, offset, bytes).await;
            send_event(
                &events,
                Event::LocalWriteDone {
                    seg,
                    handle,
                    result,
                },
            );
        });
    }

    pub(crate) fn on_local_write_done(
        &mut self,
        seg: SegmentRef,
        handle: Option<Box<dyn FileHandle>>,
        result: anyhow::Result<()>,
    ) {
        self.counters.concurrent_local_writes.dec();
        // the written segment held a buffer slot even if its job is gone by now
        self.counters.buffered_local_writes.dec();
        let Some(job) = self.jobs.get_mut(&seg.job) else {
            tracing::debug!("{}: finished, ignoring write of segment {}", seg.job, seg.index);
            return;
        };
        let file = &mut job.files[seg.file];
        file.handle = handle;
        if let Err(error) = result {
            self.counters.write_failures.inc();
            self.retry_or_fail(seg, Error::LocalWriteFailed(error));
            return;
        }
        let segment = &mut file.segments[seg.index];
        segment.state = SegmentState::Done;
        self.counters.bytes_written.add(segment.size);
        file.current_write_index += 1;
        file.finished_segments += 1;
        if !file.is_complete() {
            if file.segments[file.current_write_index].is_buffered() {
                self.write_queue.push_back(SegmentRef {
                    index: file.current_write_index,
                    ..seg
                });
            }
            return;
        }
        // closes the file
        file.handle = None;
        tracing::debug!("{}: finished {:?}", seg.job, &file.name);
        job.finished_files += 1;
        if job.finished_files == job.files.len() {
            self.finalize(seg.job, Ok(()));
        }
    }

    fn retry_or_fail(&mut self, seg: SegmentRef, error: Error) {
        let Some(job) = self.jobs.get_mut(&seg.job) else {
            return;
        };
        let priority = job.priority;
        let file = &mut job.files[seg.file];
        let segment = &mut file.segments[seg.index];
        if segment.retries_left == 0 {
            tracing::error!(
                "{}: segment {} of {:?} failed with no retries left",
                seg.job,
                seg.index,
                &file.name
            );
            self.finalize(
                seg.job,
                Err(Error::RetriesExhausted {
                    source: Box::new(error),
                }),
            );
            return;
        }
        segment.retries_left -= 1;
        segment.state = SegmentState::Pending;
        tracing::warn!(
            "{}: retrying segment {} of {:?} ({} retries left): {error}",
            seg.job,
            seg.index,
            &file.name,
            segment.retries_left
        );
        self.copy_queue.push_retry(priority, seg);
    }
}

async fn remote_read(
    transport: &dyn Transport,
    request: ReadRequest,
    rpc_timeout: Option<Duration>,
) -> anyhow::Result<Bytes> {
    let size = request.size;
    let read = transport.read(request);
    let bytes = match rpc_timeout {
        Some(timeout) => tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| anyhow!("remote read timed out after {timeout:?}"))??,
        None => read.await?,
    };
    if bytes.len() as u64 != size {
        return Err(anyhow!(
            "remote read returned {} bytes, expected {size}",
            bytes.len()
        ));
    }
    Ok(bytes)
}

/// Writes one segment, opening the file first if this is its first write. Hands the file handle
/// back so the next segment of the file can reuse it.
async fn local_write(
    disk: &dyn Disk,
    handle: Option<Box<dyn FileHandle>>,
    path: PathBuf,
    offset: u64,
    bytes: Bytes,
) -> (Option<Box<dyn FileHandle>>, anyhow::Result<()>) {
    let mut handle = match handle {
        Some(handle) => handle,
        None => match disk.open(path).await {
            Ok(handle) => handle,
            Err(error) => return (None, Err(error)),
        },
    };
    let result = handle.write_at(offset, bytes).await;
    (Some(handle), result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;
    use tracing_test::traced_test;

    use super::*;
    use crate::{Engine, FileSpec, JobSpec, Priority, Settings};

    /// Fails the first read it sees, serves zeros afterwards.
    #[derive(Default)]
    struct FlakyTransport {
        reads: AtomicUsize,
    }

    impl Transport for FlakyTransport {
        fn read(&self, request: ReadRequest) -> BoxFuture<'static, anyhow::Result<Bytes>> {
            let attempt = self.reads.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if attempt == 0 {
                    anyhow::bail!("connection reset");
                }
                Ok::<_, anyhow::Error>(Bytes::from(vec![0; request.size as usize]))
            })
        }
    }

    struct NullFile;

    impl FileHandle for NullFile {
        fn write_at(&mut self, _offset: u64, _data: Bytes) -> BoxFuture<'_, anyhow::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct NullDisk;

    impl Disk for NullDisk {
        fn open(&self, _path: PathBuf) -> BoxFuture<'static, anyhow::Result<Box<dyn FileHandle>>> {
            Box::pin(async { Ok(Box::new(NullFile) as Box<dyn FileHandle>) })
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn retry_and_completion_are_logged() {
        let engine = Engine::new(
            Settings {
                segment_size: 8,
                max_copy_requests_per_job: 1,
                ..Default::default()
            },
            Arc::new(FlakyTransport::default()),
            Arc::new(NullDisk),
        )
        .unwrap();
        let summary = engine
            .fetch(JobSpec {
                node: "peer".to_string(),
                source_dir: "/data".into(),
                dest_dir: "/restore".into(),
                files: vec![FileSpec {
                    name: "log".into(),
                    size: 20,
                }],
                priority: Priority::Low,
            })
            .await
            .unwrap();
        assert_eq!(summary.bytes, 20);
        assert!(logs_contain("retrying segment 0"));
        assert!(logs_contain("connection reset"));
        assert!(logs_contain("job-0 finished"));
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        struct ShortTransport;

        impl Transport for ShortTransport {
            fn read(&self, request: ReadRequest) -> BoxFuture<'static, anyhow::Result<Bytes>> {
                Box::pin(async move {
                    Ok::<_, anyhow::Error>(Bytes::from(vec![0; request.size as usize - 1]))
                })
            }
        }

        let request = ReadRequest {
            node: "peer".to_string(),
            source_dir: "/data".into(),
            file: "log".into(),
            offset: 0,
            size: 4,
            is_last: true,
        };
        let error = remote_read(&ShortTransport, request, None).await.unwrap_err();
        assert!(error.to_string().contains("returned 3 bytes, expected 4"));
    }
}
