//! Byte rate limiting for remote copy operations
//!
//! This crate provides the token bucket used by the fetch engine to bound the aggregate number
//! of bytes released to remote reads per second.
//!
//! # Overview
//!
//! A [`TokenBucket`] is configured with a rate (bytes per second) and a burst size. Tokens are
//! replenished continuously based on elapsed time, there is no background replenish task.
//! Callers ask whether admission is allowed right now and, if it is not, how long until it will
//! be - the caller decides how to wait (the fetch engine posts a wake-up event into its dispatch
//! loop instead of parking a task).
//!
//! # Borrowing
//!
//! Admission only requires the bucket to be non-negative. The amount consumed may drive it below
//! zero, and that debt delays the next admission. This lets a single request larger than the
//! burst size make progress while still keeping the long-run average at the configured rate.
//!
//! ```rust
//! use throttle::TokenBucket;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // 4 MiB/s, default burst of 1.5x the rate
//! let mut bucket = TokenBucket::new(4 * 1024 * 1024);
//! match bucket.try_consume(1024 * 1024) {
//!     Ok(()) => { /* issue the request */ }
//!     Err(wait) => { /* try again after `wait` */ let _ = wait; }
//! }
//! # }
//! ```
//!
//! # Disabling
//!
//! A rate of `0` disables limiting, every admission succeeds immediately.

mod bucket;

pub use bucket::TokenBucket;

/// Burst size used by [`TokenBucket::new`], as a multiple of the rate.
pub const DEFAULT_BURST_FACTOR: f64 = 1.5;
