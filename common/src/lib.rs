//! Shared plumbing of the rpull binaries
//!
//! [`run`] is the common entry point: it sets up logging from an [`OutputConfig`], builds the
//! tokio runtime from a [`RuntimeConfig`], drives the tool's main future and reports its outcome.
//! Progress reports of a running engine are printed with [`progress::print_progress`].

pub mod config;
pub mod logging;
pub mod progress;

pub use config::{OutputConfig, RuntimeConfig};
pub use progress::{ProgressPrinter, ProgressSettings};

/// Runs `func` on a fresh multi-threaded runtime.
///
/// Returns the summary on success. On failure the error is printed to stderr (unless quiet) and
/// `None` is returned, callers are expected to exit with a non-zero status.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Fut: std::future::Future<Output = Result<Summary, Error>>,
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
{
    if let Some(error) = logging::init(&output).err().filter(|_| !output.quiet) {
        eprintln!("{error:#}");
    }
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let tokio_runtime = match builder.build() {
        Ok(tokio_runtime) => tokio_runtime,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to start tokio runtime: {error}");
            }
            return None;
        }
    };
    let start_time = std::time::Instant::now();
    match tokio_runtime.block_on(func()) {
        Ok(summary) => {
            tracing::info!("finished in {:.2?}", start_time.elapsed());
            if output.verbose > 0 || output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
