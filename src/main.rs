use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use feedpipe::config::Config;
use feedpipe::feed::{ConcurrentFetcher, Entries, SequentialFetcher, SourceDescriptor};

#[derive(Parser, Debug)]
#[command(
    name = "feedpipe",
    about = "Fetch RSS/Atom feeds and print their merged entries as JSON lines"
)]
struct Args {
    /// Feed locations (URLs or file paths), merged in the order given
    #[arg(required = true, value_name = "SOURCE")]
    sources: Vec<String>,

    /// Read all sources at once instead of one after another
    #[arg(long)]
    concurrent: bool,

    /// Stop after this many entries
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Config file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn print_entries(entries: Entries, limit: Option<usize>) -> Result<usize> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0;

    for entry in entries.take(limit.unwrap_or(usize::MAX)) {
        let entry = entry.context("Failed to fetch feed")?;
        serde_json::to_writer(&mut out, &entry).context("Failed to serialize entry")?;
        writeln!(out)?;
        printed += 1;
    }

    Ok(printed)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => Config::default(),
    };

    let sources: Vec<SourceDescriptor> = args
        .sources
        .iter()
        .map(|s| SourceDescriptor::from(s.as_str()))
        .collect();
    let limit = args.limit;

    let printed = if args.concurrent {
        let fetcher =
            ConcurrentFetcher::from_config(&config).context("Failed to create HTTP client")?;
        let result = fetcher
            .fetch(sources, false, None)
            .await
            .context("Failed to fetch feeds")?;
        print_entries(result.entries, limit)?
    } else {
        // The blocking reader owns its own runtime and must live outside ours
        tokio::task::spawn_blocking(move || {
            let fetcher =
                SequentialFetcher::from_config(&config).context("Failed to create HTTP client")?;
            print_entries(fetcher.fetch(sources, false, None).entries, limit)
        })
        .await??
    };

    tracing::info!(entries = printed, "Done");
    Ok(())
}
