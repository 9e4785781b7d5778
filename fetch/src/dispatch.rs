//! Two-tier queue of segments waiting for a remote read.
//!
//! High priority segments sit in a FIFO, low priority segments in the [`FairQueue`]. Both share
//! the engine's global rate and concurrency budget; high priority traffic gets a larger share of
//! it by alternation: after `speed_ratio` high priority pops one low priority segment is served.
//! Concretely a credit starts at `speed_ratio` and is spent by each high priority pop. Once it is
//! zero (or the FIFO is empty) the fair queue gets a turn, falling back to the FIFO if no low
//! priority job is eligible. The credit is refilled only when a low priority segment is actually
//! served, so a low priority job that was skipped gets the very next turn once it is eligible.
//! The steady state pattern is therefore `H^r L H^r L ...` and neither class waits when the other
//! one has nothing to send.

use std::collections::VecDeque;

use crate::fair_queue::FairQueue;
use crate::job::{JobId, Priority, SegmentRef};

#[derive(Debug)]
pub(crate) struct PriorityQueue {
    high: VecDeque<SegmentRef>,
    low: FairQueue,
    speed_ratio: usize,
    high_credit: usize,
}

impl PriorityQueue {
    pub fn new(speed_ratio: usize) -> Self {
        Self {
            high: VecDeque::new(),
            low: FairQueue::new(),
            speed_ratio,
            high_credit: speed_ratio,
        }
    }

    pub fn push_job(&mut self, priority: Priority, job: JobId, segments: Vec<SegmentRef>) {
        match priority {
            Priority::High => self.high.extend(segments),
            Priority::Low => self.low.push(job, segments),
        }
    }

    /// Re-queues a failed segment ahead of the other pending work of its class.
    pub fn push_retry(&mut self, priority: Priority, seg: SegmentRef) {
        match priority {
            Priority::High => self.high.push_front(seg),
            Priority::Low => self.low.push_retry(seg),
        }
    }

    /// Picks the next segment to read. `eligible` tells whether a low priority job is below its
    /// per-job concurrency cap.
    pub fn pop(&mut self, eligible: impl FnMut(JobId) -> bool) -> Option<(Priority, SegmentRef)> {
        if self.high_credit > 0 && !self.high.is_empty() {
            self.high_credit -= 1;
            return self.high.pop_front().map(|seg| (Priority::High, seg));
        }
        if let Some(seg) = self.low.pop(eligible) {
            self.high_credit = self.speed_ratio;
            return Some((Priority::Low, seg));
        }
        self.high.pop_front().map(|seg| (Priority::High, seg))
    }

    /// Drops every queued segment of a job, returns how many were removed.
    pub fn remove_job(&mut self, priority: Priority, job: JobId) -> usize {
        match priority {
            Priority::High => {
                let before = self.high.len();
                self.high.retain(|seg| seg.job != job);
                before - self.high.len()
            }
            Priority::Low => self.low.remove_job(job),
        }
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }
}
