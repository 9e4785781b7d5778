use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rpull",
    version,
    about = "Fetch files in parallel segments from an `rpulld` server or a local directory",
    long_about = "`rpull` fetches a set of files into a local directory. Every file is split into segments which are read in parallel and written in order, under global limits on concurrency, buffered data and bandwidth.

With --remote the source directory is resolved below the root served by `rpulld` on that address, otherwise it is a local directory.

When no files are named, every regular file below the source directory is fetched.

EXAMPLES:
    # Fetch a directory from a remote server
    rpull --remote storage-1:7070 shard-7 /var/lib/replica/shard-7 --progress --summary

    # Fetch selected files ahead of other traffic
    rpull --remote storage-1:7070 shard-7 /tmp/shard-7 wal/000012 wal/000013 --priority high

    # Copy a local tree with a bandwidth cap
    rpull /mnt/backup/shard-7 /var/lib/replica/shard-7 --max-copy-rate 200MiB"
)]
struct Args {
    /// Source directory (relative to the server root when --remote is used)
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Local destination directory
    #[arg(value_name = "DESTINATION")]
    destination: PathBuf,

    /// Files to fetch, relative to SOURCE (default: all regular files below SOURCE)
    #[arg(value_name = "FILES")]
    files: Vec<PathBuf>,

    // Fetch options
    /// Address of the `rpulld` server to fetch from
    #[arg(long, value_name = "ADDR", help_heading = "Fetch options")]
    remote: Option<String>,

    /// Scheduling class of the job: low (fair share) or high (served ahead of low)
    #[arg(
        long,
        default_value = "low",
        value_name = "PRIORITY",
        help_heading = "Fetch options"
    )]
    priority: fetch::Priority,

    #[command(flatten)]
    engine: rpull::EngineArgs,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Set delay between progress updates
    ///
    /// If specified, --progress flag is implied. Accepts human-readable durations like "200ms", "10s", "5min".
    #[arg(long, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

#[instrument(skip(args))]
async fn async_main(args: Args) -> anyhow::Result<fetch::JobSummary> {
    let progress = match (&args.progress_delay, args.progress) {
        (Some(delay), _) => Some(common::ProgressSettings::parse_delay(delay)?),
        (None, true) => Some(common::ProgressSettings::default()),
        (None, false) => None,
    };
    // a local source is served by a DirSource rooted at SOURCE itself
    let (transport, node, source_dir, listing) = match &args.remote {
        Some(addr) => {
            // every segment travels as a single data frame
            remote::streams::check_read_size(args.engine.segment_size.0)
                .context("invalid --segment-size for a remote fetch")?;
            let client = remote::Client::default();
            let listing = client.list_files(addr, &args.source, &args.files).await?;
            let transport: Arc<dyn fetch::Transport> = Arc::new(client);
            (transport, addr.clone(), args.source.clone(), listing)
        }
        None => {
            let source = remote::DirSource::new(&args.source);
            let listing = source
                .list_files(std::path::Path::new(""), &args.files)
                .await
                .with_context(|| format!("failed listing {:?}", args.source))?;
            let transport: Arc<dyn fetch::Transport> = Arc::new(source);
            (transport, "localhost".to_string(), PathBuf::new(), listing)
        }
    };
    tracing::info!("fetching {} files from {node}", listing.len());
    let engine = Arc::new(fetch::Engine::new(
        args.engine.to_settings(),
        transport,
        Arc::new(fetch::LocalDisk),
    )?);
    let cancel = tokio_util::sync::CancellationToken::new();
    let printer = progress.map(|settings| {
        let engine = engine.clone();
        tokio::spawn(common::progress::print_progress(
            settings,
            move || engine.stats(),
            cancel.clone(),
        ))
    });
    let result = engine
        .fetch(fetch::JobSpec {
            node,
            source_dir,
            dest_dir: args.destination.clone(),
            files: listing.into_iter().map(fetch::FileSpec::from).collect(),
            priority: args.priority,
        })
        .await;
    cancel.cancel();
    if let Some(printer) = printer {
        printer.await.context("progress printer failed")?;
    }
    tracing::info!("engine totals:\n{}", engine.stats());
    result.with_context(|| format!("failed fetching into {:?}", args.destination))
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
