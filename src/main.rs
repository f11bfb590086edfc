//! Detour CLI - Entry Point
//!
//! Operator surface over the request layer: pool administration, probing,
//! and one-shot fetches through the resilient executor.

use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use detour::config::Config;
use detour::error::{DetourError, Result};
use detour::pool::ProxyPool;
use detour::proxy::{HttpTransport, PoolProbe, ProxyExecutor, ProxyRequest};
use detour::storage::FileStore;

#[derive(Parser)]
#[command(
    name = "detour",
    about = "Resilient HTTP fetches through a rotating proxy pool",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List pool endpoints with their health statistics
    List {
        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an endpoint (host:port or host:port:username:password)
    Add { endpoint: String },
    /// Remove an endpoint by key or full definition
    Remove { endpoint: String },
    /// Probe endpoints against the echo URL and record the outcomes
    Probe {
        /// Probe only the first N endpoints
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Clear all recorded statistics, keeping the endpoint list
    ResetStats,
    /// Fetch a URL through the resilient proxy layer
    Fetch {
        url: String,
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
        /// Form-encoded request body; implies a POST-style dispatch
        #[arg(long)]
        data: Option<String>,
        /// Bypass the pool and dispatch directly
        #[arg(long)]
        direct: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(&config);
    debug!(storage = %config.storage.path, "Starting detour");

    let store = Arc::new(FileStore::open(&config.storage.path).await?);
    let pool = ProxyPool::load(store, config.pool_config()).await;

    let outcome = run(cli.command, &config, &pool).await;
    // Failed fetches move statistics too; flush before surfacing the error.
    pool.flush_stats().await;
    outcome
}

async fn run(command: Command, config: &Config, pool: &Arc<ProxyPool>) -> Result<()> {
    match command {
        Command::List { json } => {
            let summary = pool.summary();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} endpoints: {} working, {} failed, {} blocked",
                    summary.total_endpoints, summary.working, summary.failed, summary.blocked
                );
                for report in &summary.endpoints {
                    println!(
                        "  {:<24} {:<9} {:>6} reqs {:>6.1}% ok {:>6} ms {:>3} streak {:>3} blocks",
                        report.key,
                        report.state,
                        report.total_requests,
                        report.success_rate * 100.0,
                        report.avg_response_time_ms,
                        report.consecutive_failures,
                        report.blocked_count,
                    );
                }
            }
        }
        Command::Add { endpoint } => {
            if pool.add_endpoint(&endpoint).await? {
                println!("Added {}", endpoint);
            } else {
                println!("Already in pool: {}", endpoint);
            }
        }
        Command::Remove { endpoint } => {
            if pool.remove_endpoint(&endpoint).await {
                println!("Removed {}", endpoint);
            } else {
                println!("Not in pool: {}", endpoint);
            }
        }
        Command::Probe { limit } => {
            let transport = Arc::new(HttpTransport::new()?);
            let probe = PoolProbe::new(pool.clone(), transport, config.probe_config());

            let results = match limit {
                Some(limit) => probe.probe_subset(limit).await,
                None => probe.probe_all().await,
            };

            for result in &results {
                match &result.error {
                    None => println!("  {:<24} ok      {} ms", result.key, result.latency_ms),
                    Some(error) => println!("  {:<24} failed  {}", result.key, error),
                }
            }
            let healthy = results.iter().filter(|r| r.success).count();
            println!("{}/{} endpoints healthy", healthy, results.len());
        }
        Command::ResetStats => {
            pool.reset_stats().await;
            println!("Statistics cleared");
        }
        Command::Fetch {
            url,
            method,
            data,
            direct,
        } => {
            let method: Method = method.to_uppercase().parse().map_err(|_| {
                DetourError::InvalidRequest(format!("unsupported method: {method}"))
            })?;

            let mut request = ProxyRequest::new(method, url);
            if let Some(data) = data {
                request.headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                request.body = Some(Bytes::from(data));
            }

            let transport = Arc::new(HttpTransport::new()?);
            let executor = ProxyExecutor::new(pool.clone(), transport, config.executor_config());
            if direct {
                executor.set_enabled(false);
            }

            let response = executor.execute(request).await?;
            // Status goes to stderr so piped output stays body-only.
            eprintln!("HTTP {}", response.status);
            println!("{}", response.body_text());
        }
    }

    Ok(())
}

/// Initialize tracing with the configured level and output format
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("detour={}", config.log.level))
    });

    if config.log.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
