use anyhow::{bail, Context};
use clap::Parser;
use rangefetch::{
    FetchError, FetchOutcome, FetchedImage, Fetcher, FetcherConfig, Resource, IMAGE_SIZE_LIMIT,
};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio_retry2::strategy::FixedInterval;
use tokio_retry2::{Retry, RetryError};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rangefetch")]
#[command(about = "Fetch a URL with a size ceiling, optionally using parallel range requests", long_about = None)]
#[command(version)]
struct Args {
    /// URL to fetch
    url: String,

    /// Write the body to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Parallel range workers for file downloads (1 disables ranges)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Size ceiling in bytes (0 = unlimited)
    #[arg(long)]
    limit: Option<u64>,

    /// Request timeout, e.g. "60s" or "2m"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Extra request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Parse the body as JSON and pretty-print it
    #[arg(long, conflicts_with_all = ["output", "data_url"])]
    json: bool,

    /// Print the body as an image data URL
    #[arg(long, conflicts_with = "output")]
    data_url: bool,

    /// Retries after connection failures
    #[arg(long, default_value_t = 0)]
    retries: usize,

    /// Delay between retries
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    retry_delay: Duration,

    /// JSON configuration file, overridden by the flags above
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("rangefetch={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let mut resource = Resource::new(args.url.clone());
    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("header {:?} is not in \"Name: value\" form", header);
        };
        resource = resource.with_header(name.trim(), value.trim())?;
    }

    if let Some(ref path) = args.output {
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {bytes} ({bytes_per_sec}) {msg} | {elapsed_precise} elapsed")?,
        );
        pb.set_message(format!("⬇️  {}", args.url));
        pb.enable_steady_tick(Duration::from_millis(100));

        let fetcher = Fetcher::new(config)?.with_progress(pb.clone());
        let outcome = with_retries(args.retries, args.retry_delay, || {
            fetcher.download(&resource, path)
        })
        .await;

        match outcome {
            Ok(FetchOutcome::WrittenToFile { path, bytes }) => {
                pb.finish_with_message(format!("✅ Saved {}", path.display()));
                info!("Wrote {} bytes to {}", bytes, path.display());
            }
            Ok(FetchOutcome::Bytes { .. }) => bail!("expected {} to be written to disk", args.url),
            Err(e) => {
                pb.finish_with_message("❌ Download failed!");
                return Err(e).with_context(|| format!("downloading {}", args.url));
            }
        }
        return Ok(());
    }

    let fetcher = Fetcher::new(config)?;

    if args.json {
        let document: serde_json::Value =
            with_retries(args.retries, args.retry_delay, || fetcher.fetch_json(&resource))
                .await
                .with_context(|| format!("fetching {}", args.url))?;
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    if args.data_url && args.limit.is_none() {
        resource = resource.with_size_limit(IMAGE_SIZE_LIMIT);
    }
    let fetched = with_retries(args.retries, args.retry_delay, || fetcher.fetch_bytes(&resource))
        .await
        .with_context(|| format!("fetching {}", args.url))?;
    if !fetched.status.is_success() {
        warn!("{} answered {}", args.url, fetched.status);
    }

    let mut stdout = std::io::stdout().lock();
    if args.data_url {
        let image = FetchedImage {
            data: fetched.data,
            content_type: fetched.content_type,
        };
        writeln!(stdout, "{}", image.to_data_url())?;
    } else {
        stdout.write_all(&fetched.data)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Builds the fetcher configuration: defaults, then the config file, then flags.
fn load_config(args: &Args) -> anyhow::Result<FetcherConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => FetcherConfig::default(),
    };

    if let Some(limit) = args.limit {
        config.size_limit = limit;
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    Ok(config)
}

/// Retries `op` on transport failures only; every other error is final.
async fn with_retries<T, F, Fut>(retries: usize, delay: Duration, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let retry_strategy = FixedInterval::from_millis(delay.as_millis() as u64).take(retries);

    Retry::spawn(retry_strategy, || {
        let attempt = op();
        async move {
            match attempt.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transport() => {
                    warn!("Fetch failed due to error: {}", e);
                    RetryError::to_transient(e)
                }
                Err(e) => RetryError::to_permanent(e),
            }
        }
    })
    .await
}
