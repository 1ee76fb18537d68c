use anyhow::{Context, Result};
use cap_aggregator::{
    AggregatorEvent, AggregatorOptions, CapAggregator, FeedRegistration, FetchConfig,
    DEFAULT_RELOAD_INTERVAL_MS, DEFAULT_RETRY_DELAY_MS,
};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cap-aggregator", about = "Poll CAP alert feeds and print alerts as JSON lines")]
struct Cli {
    /// Feed URL; repeat for several feeds
    #[arg(long = "feed", value_name = "URL", required = true)]
    feeds: Vec<String>,

    /// Display title applied to every feed
    #[arg(long)]
    title: Option<String>,

    /// Only keep alerts whose area covers this latitude (needs --lon)
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    lat: Option<f64>,

    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lon: Option<f64>,

    #[arg(long, default_value_t = DEFAULT_RELOAD_INTERVAL_MS)]
    reload_interval_ms: u64,

    /// Delay before retrying failed alert details; 0 disables retries
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,

    /// Cache responses on disk under .cache/
    #[arg(long, default_value_t = false)]
    cache_feed: bool,

    #[arg(long, default_value_t = false)]
    log_feed_warnings: bool,

    /// Exit after every feed has been fetched once
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = AggregatorOptions {
        reload_interval_ms: cli.reload_interval_ms,
        retry_delay_ms: cli.retry_delay_ms,
        log_feed_warnings: cli.log_feed_warnings,
        cache_feed: cli.cache_feed,
        lat: cli.lat,
        lon: cli.lon,
    };

    let (aggregator, mut events) = CapAggregator::with_config(options, &FetchConfig::default())
        .context("failed to build HTTP client")?;
    let aggregator = Arc::new(aggregator);

    info!("Starting CAP aggregator with {} feed(s)", cli.feeds.len());
    let runner = {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move { aggregator.run().await })
    };

    for url in &cli.feeds {
        let mut registration = FeedRegistration::new(url.as_str());
        if let Some(title) = &cli.title {
            registration = registration.with_title(title.as_str());
        }
        if let Err(e) = aggregator.add_feed(registration).await {
            error!("Skipping feed {}: {}", url, e);
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event)?;
                if cli.once && aggregator.all_feeds_settled().await {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    aggregator.shutdown().await;
    runner.await.context("coordinator task failed")?;

    if cli.once {
        aggregator.process_alerts().await;
        while let Ok(event) = events.try_recv() {
            print_event(&event)?;
        }
    }

    info!("CAP aggregator finished");
    Ok(())
}

fn print_event(event: &AggregatorEvent) -> Result<()> {
    let line = serde_json::to_string(event)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}
