use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Monotonic total.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Number of things currently in some state, e.g. remote reads in flight.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicUsize,
}

impl Gauge {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec(&self) {
        self.sub(1);
    }

    pub fn sub(&self, value: usize) {
        let previous = self.value.fetch_sub(value, Ordering::AcqRel);
        debug_assert!(previous >= value, "gauge underflow: {previous} - {value}");
    }

    pub fn set(&self, value: usize) {
        self.value.store(value, Ordering::Release);
    }

    pub fn get(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }
}

/// Engine wide counters. Written by the dispatch task only, readable from anywhere.
#[derive(Debug, Default)]
pub struct Counters {
    pub concurrent_copy_requests: Gauge,
    pub concurrent_local_writes: Gauge,
    pub buffered_local_writes: Gauge,
    pub queued_segments: Gauge,
    pub live_jobs: Gauge,
    pub bytes_copied: Counter,
    pub copy_failures: Counter,
    pub bytes_written: Counter,
    pub write_failures: Counter,
    pub jobs_succeeded: Counter,
    pub jobs_failed: Counter,
}

impl Counters {
    pub fn snapshot(&self) -> Stats {
        Stats {
            concurrent_copy_requests: self.concurrent_copy_requests.get(),
            concurrent_local_writes: self.concurrent_local_writes.get(),
            buffered_local_writes: self.buffered_local_writes.get(),
            queued_segments: self.queued_segments.get(),
            live_jobs: self.live_jobs.get(),
            bytes_copied: self.bytes_copied.get(),
            copy_failures: self.copy_failures.get(),
            bytes_written: self.bytes_written.get(),
            write_failures: self.write_failures.get(),
            jobs_succeeded: self.jobs_succeeded.get(),
            jobs_failed: self.jobs_failed.get(),
        }
    }
}

/// Point in time view of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub concurrent_copy_requests: usize,
    pub concurrent_local_writes: usize,
    pub buffered_local_writes: usize,
    pub queued_segments: usize,
    pub live_jobs: usize,
    pub bytes_copied: u64,
    pub copy_failures: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "remote reads in flight: {}\n\
            local writes in flight: {}\n\
            buffered writes: {}\n\
            queued segments: {}\n\
            live jobs: {}\n\
            bytes copied: {}\n\
            copy failures: {}\n\
            bytes written: {}\n\
            write failures: {}\n\
            jobs succeeded: {}\n\
            jobs failed: {}",
            self.concurrent_copy_requests,
            self.concurrent_local_writes,
            self.buffered_local_writes,
            self.queued_segments,
            self.live_jobs,
            bytesize::ByteSize(self.bytes_copied),
            self.copy_failures,
            bytesize::ByteSize(self.bytes_written),
            self.write_failures,
            self.jobs_succeeded,
            self.jobs_failed,
        )
    }
}
