//! Bulk file fetch tools - `rpull` (segmented parallel fetch) and `rpulld` (file server)
//!
//! `rpull` copies a set of files from a source directory into a local destination directory.
//! Files are split into segments that are fetched in parallel and written in order, under global
//! limits on outstanding reads, outstanding writes, buffered data and bandwidth.
//!
//! # Tools
//!
//! ## rpulld - File Server
//!
//! Serves every file below a root directory over TCP:
//!
//! ```bash
//! rpulld /srv/replicas --bind 0.0.0.0:7070
//! ```
//!
//! ## rpull - Fetch Tool
//!
//! Fetches from a running `rpulld`, the source directory is relative to the server's root:
//!
//! ```bash
//! # Everything below shard-7
//! rpull --remote storage-1:7070 shard-7 /var/lib/replica/shard-7 --progress --summary
//!
//! # Only the named files, ahead of other transfers from the same node
//! rpull --remote storage-1:7070 shard-7 /tmp/shard-7 wal/000012 wal/000013 --priority high
//! ```
//!
//! Without `--remote` the source is a local directory, which is handy for testing the engine
//! settings against local disks:
//!
//! ```bash
//! rpull /mnt/backup/shard-7 /var/lib/replica/shard-7 --max-copy-rate 200MiB
//! ```
//!
//! # Tuning
//!
//! See [`EngineArgs`] for the options controlling segment size, concurrency, buffering, rate
//! limiting and retries.

/// Fetch engine options shared by the command-line tools.
#[derive(clap::Args, Debug, Clone)]
pub struct EngineArgs {
    /// Size of a single remote read and local write
    #[arg(
        long,
        default_value = "4MiB",
        value_name = "SIZE",
        help_heading = "Engine options"
    )]
    pub segment_size: bytesize::ByteSize,

    /// Aggregate copy rate limit per second (0 = no limit)
    #[arg(
        long,
        default_value = "500MiB",
        value_name = "SIZE",
        help_heading = "Engine options"
    )]
    pub max_copy_rate: bytesize::ByteSize,

    /// Maximum number of remote reads in flight
    #[arg(
        long,
        default_value = "50",
        value_name = "N",
        help_heading = "Engine options"
    )]
    pub max_remote_requests: usize,

    /// Maximum number of local writes in flight
    #[arg(
        long,
        default_value = "50",
        value_name = "N",
        help_heading = "Engine options"
    )]
    pub max_local_writes: usize,

    /// Maximum number of fetched segments waiting to be written
    #[arg(
        long,
        default_value = "500",
        value_name = "N",
        help_heading = "Engine options"
    )]
    pub max_buffered_writes: usize,

    /// Maximum number of remote reads in flight for one low priority job
    #[arg(
        long,
        default_value = "2",
        value_name = "N",
        help_heading = "Engine options"
    )]
    pub max_requests_per_job: usize,

    /// Number of high priority segments served for every low priority one
    #[arg(
        long,
        default_value = "2",
        value_name = "N",
        help_heading = "Engine options"
    )]
    pub speed_ratio: usize,

    /// Number of times a failed segment is retried before giving up
    #[arg(
        long,
        default_value = "2",
        value_name = "N",
        help_heading = "Engine options"
    )]
    pub max_retries: u32,

    /// Deadline of a single remote read (0s = no deadline)
    ///
    /// Accepts human-readable durations like "500ms", "10s", "1min".
    #[arg(
        long,
        default_value = "10s",
        value_name = "DURATION",
        help_heading = "Engine options"
    )]
    pub rpc_timeout: humantime::Duration,
}

impl EngineArgs {
    pub fn to_settings(&self) -> fetch::Settings {
        let rpc_timeout: std::time::Duration = self.rpc_timeout.into();
        fetch::Settings {
            segment_size: self.segment_size.0,
            max_copy_rate: self.max_copy_rate.0,
            max_concurrent_remote_copy_requests: self.max_remote_requests,
            max_concurrent_local_writes: self.max_local_writes,
            max_buffered_local_writes: self.max_buffered_writes,
            max_copy_requests_per_job: self.max_requests_per_job,
            high_priority_speed_ratio: self.speed_ratio,
            max_retry_count_per_copy_request: self.max_retries,
            rpc_timeout: (!rpc_timeout.is_zero()).then_some(rpc_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[command(flatten)]
        engine: EngineArgs,
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let args = TestArgs::parse_from(["test"]);
        let settings = args.engine.to_settings();
        let defaults = fetch::Settings::default();
        assert_eq!(settings.segment_size, defaults.segment_size);
        assert_eq!(settings.max_copy_rate, defaults.max_copy_rate);
        assert_eq!(
            settings.max_concurrent_remote_copy_requests,
            defaults.max_concurrent_remote_copy_requests
        );
        assert_eq!(
            settings.max_buffered_local_writes,
            defaults.max_buffered_local_writes
        );
        assert_eq!(settings.rpc_timeout, defaults.rpc_timeout);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let args = TestArgs::parse_from([
            "test",
            "--rpc-timeout",
            "0s",
            "--segment-size",
            "64KiB",
            "--max-copy-rate",
            "0",
        ]);
        let settings = args.engine.to_settings();
        assert_eq!(settings.rpc_timeout, None);
        assert_eq!(settings.segment_size, 64 * 1024);
        assert_eq!(settings.max_copy_rate, 0);
    }
}
