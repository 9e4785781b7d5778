//! Periodic progress reports built from engine [`Stats`].

use fetch::Stats;

/// How often progress is printed.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSettings {
    pub delay: std::time::Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            delay: std::time::Duration::from_secs(1),
        }
    }
}

impl ProgressSettings {
    /// Accepts human-readable durations like "200ms", "10s", "5min".
    pub fn parse_delay(delay: &str) -> anyhow::Result<Self> {
        let delay = humantime::parse_duration(delay)
            .map_err(|error| anyhow::anyhow!("invalid progress delay '{delay}': {error}"))?;
        if delay.is_zero() {
            anyhow::bail!("progress delay must be greater than 0");
        }
        Ok(Self { delay })
    }
}

pub struct ProgressPrinter {
    start_time: std::time::Instant,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl ProgressPrinter {
    pub fn new() -> Self {
        let now = std::time::Instant::now();
        Self {
            start_time: now,
            last_bytes: 0,
            last_update: now,
        }
    }

    pub fn print(&mut self, stats: &Stats) -> String {
        let time_now = std::time::Instant::now();
        let total_duration_secs = (time_now - self.start_time)
            .as_secs_f64()
            .max(f64::EPSILON);
        let curr_duration_secs = (time_now - self.last_update)
            .as_secs_f64()
            .max(f64::EPSILON);
        let average_bytes_rate = stats.bytes_written as f64 / total_duration_secs;
        let current_bytes_rate =
            stats.bytes_written.saturating_sub(self.last_bytes) as f64 / curr_duration_secs;
        self.last_bytes = stats.bytes_written;
        self.last_update = time_now;
        format!(
            "---------------------\n\
            IN FLIGHT:\n\
            remote reads: {:>10}\n\
            local writes: {:>10}\n\
            buffered:     {:>10}\n\
            queued:       {:>10}\n\
            jobs:         {:>10}\n\
            -----------------------\n\
            WRITTEN:\n\
            average: {:>10}/s\n\
            current: {:>10}/s\n\
            total:   {:>10}\n\
            -----------------------\n\
            FAILURES:\n\
            reads:  {:>10}\n\
            writes: {:>10}",
            stats.concurrent_copy_requests,
            stats.concurrent_local_writes,
            stats.buffered_local_writes,
            stats.queued_segments,
            stats.live_jobs,
            bytesize::ByteSize(average_bytes_rate as u64),
            bytesize::ByteSize(current_bytes_rate as u64),
            bytesize::ByteSize(stats.bytes_written),
            stats.copy_failures,
            stats.write_failures,
        )
    }
}

impl Default for ProgressPrinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Prints a progress report to stderr every `settings.delay` until `cancel` fires.
pub async fn print_progress(
    settings: ProgressSettings,
    stats: impl Fn() -> Stats,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut printer = ProgressPrinter::new();
    let mut interval = tokio::time::interval(settings.delay);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => eprintln!("{}", printer.print(&stats())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value<'a>(report: &'a str, label: &str) -> &'a str {
        report
            .lines()
            .find_map(|line| line.strip_prefix(label))
            .unwrap()
            .trim()
    }

    #[test]
    fn report_shows_totals() {
        let mut printer = ProgressPrinter::new();
        let report = printer.print(&Stats {
            concurrent_copy_requests: 3,
            bytes_written: 2048,
            copy_failures: 1,
            ..Default::default()
        });
        assert_eq!(value(&report, "remote reads:"), "3");
        assert_eq!(value(&report, "reads:"), "1");
        assert_eq!(value(&report, "writes:"), "0");
        assert_eq!(value(&report, "total:"), bytesize::ByteSize(2048).to_string());
        assert_eq!(printer.last_bytes, 2048);
    }

    #[test]
    fn delay_parsing() {
        assert_eq!(
            ProgressSettings::parse_delay("200ms").unwrap().delay,
            std::time::Duration::from_millis(200)
        );
        assert!(ProgressSettings::parse_delay("0s").is_err());
        assert!(ProgressSettings::parse_delay("soon").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn printer_stops_on_cancel() {
        let cancel = tokio_util::sync::CancellationToken::new();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let task = tokio::spawn({
            let cancel = cancel.clone();
            let calls = calls.clone();
            print_progress(
                ProgressSettings {
                    delay: std::time::Duration::from_secs(1),
                },
                move || {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Stats::default()
                },
                cancel,
            )
        });
        tokio::time::sleep(std::time::Duration::from_millis(3500)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
