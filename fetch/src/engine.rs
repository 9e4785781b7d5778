use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::config::Settings;
use crate::dispatch::PriorityQueue;
use crate::error::Error;
use crate::io::{Disk, FileHandle, Transport};
use crate::job::{Callback, Job, JobId, JobSpec, JobSummary, SegmentRef};
use crate::stats::{Counters, Stats};

/// Everything that can wake up the dispatch task.
pub(crate) enum Event {
    Submit {
        id: JobId,
        spec: JobSpec,
        on_complete: Callback,
    },
    Cancel(JobId),
    RemoteReadDone {
        seg: SegmentRef,
        result: anyhow::Result<bytes::Bytes>,
    },
    LocalWriteDone {
        seg: SegmentRef,
        handle: Option<Box<dyn FileHandle>>,
        result: anyhow::Result<()>,
    },
    Replenished,
    Shutdown,
}

/// Entry point of the crate: accepts jobs and drives them to completion.
///
/// Creating an engine spawns its dispatch task on the current tokio runtime, [`Engine::new`]
/// fails when called outside of one. The task owns all queues and job state; this handle only
/// posts events to it.
pub struct Engine {
    events: mpsc::UnboundedSender<Event>,
    counters: Arc<Counters>,
    next_job_id: AtomicU64,
    dispatcher: Option<tokio::task::JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        transport: Arc<dyn Transport>,
        disk: Arc<dyn Disk>,
    ) -> anyhow::Result<Self> {
        settings.validate().map_err(anyhow::Error::msg)?;
        let runtime = tokio::runtime::Handle::try_current()
            .context("the fetch engine must be created inside a tokio runtime")?;
        tracing::debug!("starting fetch engine: {:?}", &settings);
        let (events, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let core = Core {
            limiter: throttle::TokenBucket::new(settings.max_copy_rate),
            copy_queue: PriorityQueue::new(settings.high_priority_speed_ratio),
            settings,
            transport,
            disk,
            counters: counters.clone(),
            events: events.clone(),
            jobs: HashMap::new(),
            write_queue: VecDeque::new(),
            replenish_pending: false,
        };
        let dispatcher = runtime.spawn(core.run(receiver));
        Ok(Self {
            events,
            counters,
            next_job_id: AtomicU64::new(0),
            dispatcher: Some(dispatcher),
        })
    }

    /// Queues a job. `on_complete` is called exactly once, from the dispatch task, with the job
    /// summary or the error that ended it. Submission never fails: saturation only delays work.
    pub fn submit_job(
        &self,
        spec: JobSpec,
        on_complete: impl FnOnce(Result<JobSummary, Error>) + Send + 'static,
    ) -> JobHandle {
        let id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        let event = Event::Submit {
            id,
            spec,
            on_complete: Box::new(on_complete),
        };
        if let Err(mpsc::error::SendError(Event::Submit { on_complete, .. })) =
            self.events.send(event)
        {
            tracing::warn!("{id} submitted after engine shutdown");
            on_complete(Err(Error::Shutdown));
        }
        JobHandle {
            id,
            events: self.events.clone(),
        }
    }

    /// Submits a job and waits for it to finish. Dropping the returned future does not cancel
    /// the job.
    #[instrument(skip(self, spec), fields(node = %spec.node, files = spec.files.len()))]
    pub async fn fetch(&self, spec: JobSpec) -> Result<JobSummary, Error> {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        self.submit_job(spec, move |result| {
            if sender.send(result).is_err() {
                tracing::debug!("fetch caller is gone, dropping job result");
            }
        });
        receiver.await.unwrap_or(Err(Error::Shutdown))
    }

    pub fn cancel_job(&self, id: JobId) {
        send_event(&self.events, Event::Cancel(id));
    }

    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// Fails all unfinished jobs with [`Error::Shutdown`] and waits for the dispatch task to exit.
    pub async fn shutdown(mut self) {
        send_event(&self.events, Event::Shutdown);
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };
        if let Err(error) = dispatcher.await {
            tracing::error!("fetch dispatcher task failed: {error}");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            send_event(&self.events, Event::Shutdown);
        }
    }
}

/// Returned by [`Engine::submit_job`].
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    events: mpsc::UnboundedSender<Event>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Finalizes the job with [`Error::Cancelled`] unless it already finished. In-flight reads
    /// and writes are not aborted, their completions are ignored.
    pub fn cancel(&self) {
        send_event(&self.events, Event::Cancel(self.id));
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Event::Submit { id, spec, .. } => write!(f, "Submit({id}, {} files)", spec.files.len()),
            Event::Cancel(id) => write!(f, "Cancel({id})"),
            Event::RemoteReadDone { seg, result } => {
                write!(f, "RemoteReadDone({seg:?}, ok: {})", result.is_ok())
            }
            Event::LocalWriteDone { seg, result, .. } => {
                write!(f, "LocalWriteDone({seg:?}, ok: {})", result.is_ok())
            }
            Event::Replenished => write!(f, "Replenished"),
            Event::Shutdown => write!(f, "Shutdown"),
        }
    }
}

pub(crate) fn send_event(events: &mpsc::UnboundedSender<Event>, event: Event) {
    if let Err(error) = events.send(event) {
        tracing::debug!("engine stopped, dropping {:?}", error.0);
    }
}

/// State owned by the dispatch task.
pub(crate) struct Core {
    pub settings: Settings,
    pub transport: Arc<dyn Transport>,
    pub disk: Arc<dyn Disk>,
    pub counters: Arc<Counters>,
    pub events: mpsc::UnboundedSender<Event>,
    pub jobs: HashMap<JobId, Job>,
    /// Segments waiting for a remote read
    pub copy_queue: PriorityQueue,
    /// Fetched segments whose turn to be written has come
    pub write_queue: VecDeque<SegmentRef>,
    pub limiter: throttle::TokenBucket,
    pub replenish_pending: bool,
}

impl Core {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = receiver.recv().await {
            tracing::trace!("event: {:?}", &event);
            match event {
                Event::Submit {
                    id,
                    spec,
                    on_complete,
                } => self.submit(id, spec, on_complete),
                Event::Cancel(id) => self.finalize(id, Err(Error::Cancelled)),
                Event::RemoteReadDone { seg, result } => self.on_remote_read_done(seg, result),
                Event::LocalWriteDone {
                    seg,
                    handle,
                    result,
                } => self.on_local_write_done(seg, handle, result),
                Event::Replenished => self.replenish_pending = false,
                Event::Shutdown => {
                    self.shutdown();
                    return;
                }
            }
            self.pump_writes();
            self.try_dispatch();
            self.counters.queued_segments.set(self.copy_queue.len());
        }
    }

    fn submit(&mut self, id: JobId, spec: JobSpec, on_complete: Callback) {
        let job = Job::new(
            id,
            spec,
            self.settings.segment_size,
            self.settings.max_retry_count_per_copy_request,
            on_complete,
        );
        let segments = job.segment_refs();
        tracing::info!(
            "{id} submitted: {} files, {} segments from {}:{:?} (priority: {})",
            job.files.len(),
            segments.len(),
            &job.node,
            &job.source_dir,
            job.priority,
        );
        let priority = job.priority;
        self.jobs.insert(id, job);
        self.counters.live_jobs.inc();
        if segments.is_empty() {
            self.finalize(id, Ok(()));
            return;
        }
        self.copy_queue.push_job(priority, id, segments);
    }

    /// Ends a job exactly once: releases everything it still holds and fires its callback.
    pub(crate) fn finalize(&mut self, id: JobId, result: Result<(), Error>) {
        let Some(mut job) = self.jobs.remove(&id) else {
            tracing::debug!("{id} is already finalized");
            return;
        };
        job.is_finished = true;
        let dropped = self.copy_queue.remove_job(job.priority, id);
        self.write_queue.retain(|seg| seg.job != id);
        // in-flight writes keep their buffered slot until their completion arrives
        let buffered = job.buffered_segments();
        self.counters.buffered_local_writes.sub(buffered);
        self.counters.live_jobs.dec();
        tracing::debug!("{id} released {dropped} queued and {buffered} buffered segments");
        let result = match result {
            Ok(()) => {
                let summary = job.summary();
                self.counters.jobs_succeeded.inc();
                tracing::info!(
                    "{id} finished: {} files, {} in {:.2?}",
                    summary.files,
                    bytesize::ByteSize(summary.bytes),
                    summary.elapsed
                );
                Ok(summary)
            }
            Err(error) => {
                self.counters.jobs_failed.inc();
                match &error {
                    Error::Cancelled | Error::Shutdown => tracing::info!("{id} stopped: {error}"),
                    _ => tracing::error!("{id} failed: {error}"),
                }
                Err(error)
            }
        };
        if let Some(on_complete) = job.on_complete.take() {
            on_complete(result);
        }
        // dropping the job closes its open files
    }

    fn shutdown(&mut self) {
        let ids: Vec<JobId> = self.jobs.keys().copied().collect();
        tracing::info!("fetch engine shutting down, {} unfinished jobs", ids.len());
        for id in ids {
            self.finalize(id, Err(Error::Shutdown));
        }
    }
}
