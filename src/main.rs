use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use scrapewatch::data::duration::format_seconds;
use scrapewatch::data::DerivedScalars;
use scrapewatch::{
    FileSource, HistoryEntry, HttpSource, MetricsSource, PollOptions, Rates, Session,
    SessionState, Settings, TimeRange,
};

#[derive(Parser, Debug)]
#[command(name = "scrapewatch")]
#[command(about = "Poll a Prometheus endpoint and derive request, latency and error rates")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Prometheus endpoint to scrape
    #[arg(short, long, conflicts_with = "file")]
    endpoint: Option<String>,

    /// Read exposition text from a file instead of scraping
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Poll interval (e.g., "5s", "500ms")
    #[arg(short, long)]
    interval: Option<String>,

    /// Per-poll timeout (e.g., "5s")
    #[arg(short, long)]
    timeout: Option<String>,

    /// Number of polls kept in history
    #[arg(long)]
    capacity: Option<usize>,

    /// View window: 15m, 1h, 24h or 7d
    #[arg(short, long)]
    range: Option<String>,

    /// Output format for each poll
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Exit after this many polls have been applied
    #[arg(short, long)]
    polls: Option<u64>,

    /// Export the session after two polls to a JSON file and exit
    #[arg(short = 'x', long, conflicts_with = "polls")]
    export: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(endpoint) = args.endpoint {
        settings.endpoint = endpoint;
        settings.file = None;
    }
    if let Some(file) = args.file {
        settings.file = Some(file);
    }
    if let Some(interval) = args.interval {
        settings.interval = interval;
    }
    if let Some(timeout) = args.timeout {
        settings.timeout = timeout;
    }
    if let Some(capacity) = args.capacity {
        settings.history_capacity = capacity;
    }
    if let Some(range) = args.range {
        settings.range = range;
    }

    let options = settings.poll_options()?;
    let range = settings.time_range()?;
    let source = build_source(&settings, options)?;

    let rt = tokio::runtime::Runtime::new()?;

    // Handle export mode (non-interactive)
    if let Some(export_path) = args.export {
        return rt.block_on(export_to_file(source, options, range, &export_path));
    }

    rt.block_on(run(source, options, range, args.format, args.polls))
}

fn init_tracing() {
    // Logs go to stderr so stdout carries only poll output.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scrapewatch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_source(settings: &Settings, options: PollOptions) -> Result<Arc<dyn MetricsSource>> {
    match &settings.file {
        Some(path) => Ok(Arc::new(FileSource::new(path))),
        None => Ok(Arc::new(HttpSource::new(
            &settings.endpoint,
            options.request_timeout,
        )?)),
    }
}

/// Poll until Ctrl-C (or `polls` results), printing one line per result
async fn run(
    source: Arc<dyn MetricsSource>,
    options: PollOptions,
    range: TimeRange,
    format: OutputFormat,
    polls: Option<u64>,
) -> Result<()> {
    let session = Session::start(source, options);
    let mut updates = session.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                // Bursts coalesce into one notification; the value is the
                // number of results applied so far.
                let applied = *updates.borrow_and_update();
                let line = session.read(|state| render(state, range, format));
                match line {
                    Ok(line) => println!("{}", line),
                    Err(e) => break Err(e),
                }
                if reached_poll_limit(applied, polls) {
                    break Ok(());
                }
            }
            _ = &mut ctrl_c => break Ok(()),
        }
    };

    session.stop().await;
    result
}

fn reached_poll_limit(applied: u64, limit: Option<u64>) -> bool {
    limit.is_some_and(|limit| applied >= limit)
}

/// One poll result as printed in JSON mode
#[derive(Serialize)]
struct PollSummary<'a> {
    seq: Option<u64>,
    timestamp: Option<&'a str>,
    scalars: Option<&'a DerivedScalars>,
    rates: &'a Rates,
    window_len: usize,
    last_error: Option<&'a str>,
}

fn render(state: &SessionState, range: TimeRange, format: OutputFormat) -> Result<String> {
    let latest = state.history().latest();
    let window_len = state.window(range).count();

    match format {
        OutputFormat::Json => {
            let summary = PollSummary {
                seq: latest.map(|e| e.seq),
                timestamp: latest.map(|e| e.timestamp.as_str()),
                scalars: latest.map(|e| &e.scalars),
                rates: state.rates(),
                window_len,
                last_error: state.last_error(),
            };
            Ok(serde_json::to_string(&summary)?)
        }
        OutputFormat::Text => Ok(render_text(latest, state.last_error(), range, window_len)),
    }
}

fn render_text(
    latest: Option<&HistoryEntry>,
    last_error: Option<&str>,
    range: TimeRange,
    window_len: usize,
) -> String {
    if let Some(err) = last_error {
        return format!("poll failed: {}", err);
    }

    let Some(entry) = latest else {
        return "no data yet".to_string();
    };

    let scalars = &entry.scalars;
    let cpu = scalars
        .cpu
        .map_or("-".to_string(), |cpu| format!("{:.1}%", cpu));
    let memory = scalars
        .memory
        .map_or("-".to_string(), |mem| format!("{:.2}GiB", mem));

    format!(
        "{} cpu={} mem={} rps={:.2} errors={:.2}% latency={} window({})={}",
        entry.timestamp,
        cpu,
        memory,
        scalars.rps,
        scalars.error_rate_percent,
        format_seconds(scalars.latency_seconds),
        range,
        window_len
    )
}

/// Session state as written by `--export`
#[derive(Serialize)]
struct Export<'a> {
    source: &'a str,
    range: TimeRange,
    window: Vec<&'a HistoryEntry>,
    rates: &'a Rates,
    last_error: Option<&'a str>,
    discarded: u64,
}

/// Poll twice (so rates exist), then write the session to a JSON file
async fn export_to_file(
    source: Arc<dyn MetricsSource>,
    options: PollOptions,
    range: TimeRange,
    export_path: &Path,
) -> Result<()> {
    let session = Session::start(source, options);
    let mut updates = session.subscribe();
    updates.wait_for(|&count| count >= 2).await?;

    let json = session.read(|state| {
        let export = Export {
            source: session.description(),
            range,
            window: state.window(range).collect(),
            rates: state.rates(),
            last_error: state.last_error(),
            discarded: state.discarded(),
        };
        serde_json::to_string_pretty(&export)
    })?;
    session.stop().await;

    tokio::fs::write(export_path, json).await?;
    println!("Exported metrics session to: {}", export_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_limit_counts_applied_results() {
        assert!(!reached_poll_limit(2, Some(3)));
        assert!(reached_poll_limit(3, Some(3)));
        // Several results behind one notification still stop the loop.
        assert!(reached_poll_limit(5, Some(3)));
        assert!(!reached_poll_limit(1_000, None));
    }
}
