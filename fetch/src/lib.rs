//! Segment-level scheduling engine for bulk file fetches
//!
//! This crate moves whole sets of files from a remote node to local storage. Every file of a job
//! is split into fixed-size segments, each segment is read from the remote side and then written
//! locally at its offset. The engine decides which segment is read next and when it is written,
//! under a fixed set of global budgets.
//!
//! # Overview
//!
//! A job is submitted with [`Engine::submit_job`] (or awaited with [`Engine::fetch`]) and ends
//! with exactly one call of its completion callback carrying either a [`JobSummary`] or an
//! [`Error`]. Between these two points:
//!
//! - remote reads are released in round-robin order across low priority jobs, each job limited
//!   to [`Settings::max_copy_requests_per_job`] reads in flight
//! - high priority jobs bypass the round-robin and get
//!   [`Settings::high_priority_speed_ratio`] reads for every low priority one
//! - reads share one byte rate limit ([`Settings::max_copy_rate`]) and one concurrency ceiling
//! - fetched segments are written strictly in order within a file, one write at a time per file,
//!   so a file never has a hole once a later segment is on disk
//! - fetched but unwritten segments are bounded by [`Settings::max_buffered_local_writes`]
//! - a failed read or write is retried up to [`Settings::max_retry_count_per_copy_request`]
//!   times, after which the whole job fails
//!
//! # Architecture
//!
//! All state lives in a single dispatch task. Submissions, cancellations, completions of remote
//! reads and local writes, and rate limiter wake-ups all arrive as events on one channel and are
//! handled one at a time, so no locks guard the queues. Reads and writes run as separate tokio
//! tasks that report back through the same channel. When a job is finalized it is removed from
//! the job table, completions that arrive for it afterwards only release their global slots.
//!
//! The remote side and the local filesystem are abstracted by the [`Transport`] and [`Disk`]
//! traits. [`LocalDisk`] writes through `tokio::fs`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! # struct Remote;
//! # impl fetch::Transport for Remote {
//! #     fn read(
//! #         &self,
//! #         _: fetch::ReadRequest,
//! #     ) -> futures::future::BoxFuture<'static, anyhow::Result<bytes::Bytes>> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = fetch::Engine::new(
//!     fetch::Settings::default(),
//!     Arc::new(Remote),
//!     Arc::new(fetch::LocalDisk),
//! )?;
//! let summary = engine
//!     .fetch(fetch::JobSpec {
//!         node: "storage-1:7070".to_string(),
//!         source_dir: "/data/model".into(),
//!         dest_dir: "/tmp/model".into(),
//!         files: vec![fetch::FileSpec { name: "weights.bin".into(), size: 1 << 30 }],
//!         priority: fetch::Priority::High,
//!     })
//!     .await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatch;
mod engine;
mod error;
mod fair_queue;
mod io;
mod job;
mod pipeline;
mod stats;

pub use config::Settings;
pub use engine::{Engine, JobHandle};
pub use error::Error;
pub use io::{Disk, FileHandle, LocalDisk, ReadRequest, Transport};
pub use job::{Callback, FileSpec, JobId, JobSpec, JobSummary, Priority};
pub use stats::Stats;
