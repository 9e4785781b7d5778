//! Round-robin queue over jobs, used for low priority segments.
//!
//! Every job gets its own sub-queue. Pops rotate over the sub-queues so that each job is served
//! in turn, skipping jobs that already have as many remote reads in flight as they are allowed.

use std::collections::VecDeque;

use crate::job::{JobId, SegmentRef};

#[derive(Debug)]
struct SubQueue {
    job: JobId,
    segments: VecDeque<SegmentRef>,
}

#[derive(Debug, Default)]
pub(crate) struct FairQueue {
    queues: Vec<SubQueue>,
    // next sub-queue to pop from
    cursor: usize,
    total: usize,
}

impl FairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds all segments of a new job as its own sub-queue.
    pub fn push(&mut self, job: JobId, segments: impl IntoIterator<Item = SegmentRef>) {
        let segments: VecDeque<SegmentRef> = segments.into_iter().collect();
        if segments.is_empty() {
            return;
        }
        debug_assert!(segments.iter().all(|seg| seg.job == job));
        self.total += segments.len();
        self.queues.push(SubQueue { job, segments });
    }

    /// Puts a failed segment back in front of its job's remaining work. If the job's sub-queue
    /// was already drained a new one is created.
    pub fn push_retry(&mut self, seg: SegmentRef) {
        self.total += 1;
        match self.queues.iter_mut().find(|queue| queue.job == seg.job) {
            Some(queue) => queue.segments.push_front(seg),
            None => self.queues.push(SubQueue {
                job: seg.job,
                segments: VecDeque::from([seg]),
            }),
        }
    }

    /// Pops the front segment of the first eligible sub-queue, starting at the cursor. Visits each
    /// sub-queue at most once, returns `None` if no job is eligible.
    pub fn pop(&mut self, mut eligible: impl FnMut(JobId) -> bool) -> Option<SegmentRef> {
        if self.total == 0 {
            return None;
        }
        if self.cursor >= self.queues.len() {
            self.cursor = 0;
        }
        let start = self.cursor;
        loop {
            let queue = &mut self.queues[self.cursor];
            if eligible(queue.job) {
                let seg = queue.segments.pop_front();
                if queue.segments.is_empty() {
                    // the cursor now points at the following sub-queue
                    self.queues.remove(self.cursor);
                } else {
                    self.cursor += 1;
                }
                self.total -= 1;
                return seg;
            }
            self.cursor = (self.cursor + 1) % self.queues.len();
            if self.cursor == start {
                return None;
            }
        }
    }

    /// Drops all queued segments of a job, returns how many were removed.
    pub fn remove_job(&mut self, job: JobId) -> usize {
        let Some(position) = self.queues.iter().position(|queue| queue.job == job) else {
            return 0;
        };
        let removed = self.queues.remove(position).segments.len();
        if position < self.cursor {
            self.cursor -= 1;
        }
        self.total -= removed;
        removed
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}
