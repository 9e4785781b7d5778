use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rpulld",
    version,
    about = "`rpulld` serves the files below a root directory to `rpull` clients. Please see `rpull` for more information."
)]
struct Args {
    /// Directory whose contents are served
    #[arg(value_name = "ROOT")]
    root: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:7070", value_name = "ADDR")]
    bind: String,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(long, default_value = "0", value_name = "N")]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(long, default_value = "0", value_name = "N")]
    max_blocking_threads: usize,
}

#[instrument]
async fn async_main(args: Args) -> anyhow::Result<String> {
    let metadata = tokio::fs::metadata(&args.root)
        .await
        .with_context(|| format!("cannot serve {:?}", args.root))?;
    if !metadata.is_dir() {
        return Err(anyhow!("{:?} is not a directory", args.root));
    }
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed binding {}", args.bind))?;
    let addr = listener.local_addr()?;
    // clients and tests read the bound address from stdout
    println!("listening on {addr}");
    tracing::info!("serving {:?} on {addr}", args.root);
    remote::server::serve(listener, remote::DirSource::new(&args.root)).await?;
    Ok(format!("stopped serving {:?}", args.root))
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
        print_summary: false,
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
