//! Q-Verse CLI
//!
//! Commands:
//! - `get`: GET an API endpoint and print the unwrapped `data`
//! - `post`: POST a JSON body to an API endpoint
//! - `health`: Check API health
//! - `price`: Fetch an oracle price quote
//! - `watch`: Subscribe to realtime topics and collect payloads as JSONL
//!
//! # Usage
//! ```bash
//! # One-off requests
//! qverse get /exchange/pools
//! qverse post /users --body '{"username":"alice"}'
//!
//! # Smoke checks
//! qverse health
//! qverse price --token QVR
//!
//! # Stream prices and blocks until 200 payloads or Ctrl+C
//! qverse watch --topic price:QVR --topic block:new --out data/stream.jsonl --limit 200
//!
//! # Point at another backend (or set QVERSE_API_URL / QVERSE_WS_URL)
//! qverse --api-url https://api.example.com/api --ws-url wss://api.example.com/ws health
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use qverse_client::api::{ApiClient, HttpMethod, RequestOptions};
use qverse_client::realtime::RealtimeClient;
use qverse_client::{ClientConfig, RealtimeEvent, Topic};

#[derive(Parser)]
#[command(name = "qverse")]
#[command(about = "Q-Verse API and realtime stream CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// API base URL (overrides QVERSE_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// WebSocket URL (overrides QVERSE_WS_URL)
    #[arg(long, global = true)]
    ws_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// GET an endpoint relative to the API base URL
    Get {
        /// Endpoint path, e.g. /exchange/pools
        endpoint: String,

        /// Additional attempts after the first
        #[arg(long)]
        retries: Option<u32>,
    },

    /// POST a JSON body to an endpoint
    Post {
        /// Endpoint path, e.g. /users
        endpoint: String,

        /// JSON request body
        #[arg(long)]
        body: String,

        /// Additional attempts after the first
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Check API health
    Health,

    /// Fetch the oracle price for a token
    Price {
        /// Token symbol
        #[arg(long, default_value = "QVR")]
        token: String,
    },

    /// Subscribe to realtime topics and write payloads as JSONL
    Watch {
        /// Topic(s) to subscribe to (price:QVR, block:new, network:tps, ...).
        /// Can specify multiple times.
        #[arg(long, required = true)]
        topic: Vec<String>,

        /// Output file path for JSONL (default: data/qverse_watch_<timestamp>.jsonl)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum payloads to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "500")]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.api_url {
        config = config.with_api_base_url(url);
    }
    if let Some(url) = cli.ws_url {
        config = config.with_ws_url(url);
    }
    config.validate().context("Invalid client configuration")?;

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down...");
        shutdown_clone.store(true, Ordering::Relaxed);
    });

    match cli.command {
        Commands::Get { endpoint, retries } => {
            run_request(&config, &endpoint, RequestOptions::new(HttpMethod::Get), retries).await
        }
        Commands::Post { endpoint, body, retries } => {
            let body: Value = serde_json::from_str(&body).context("--body is not valid JSON")?;
            let options = RequestOptions::new(HttpMethod::Post).json(&body)?;
            run_request(&config, &endpoint, options, retries).await
        }
        Commands::Health => run_health(&config).await,
        Commands::Price { token } => run_price(&config, &token).await,
        Commands::Watch { topic: topics, out, limit } => {
            run_watch(&config, topics, out, limit, shutdown).await
        }
    }
}

async fn run_request(
    config: &ClientConfig,
    endpoint: &str,
    mut options: RequestOptions,
    retries: Option<u32>,
) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    if let Some(retries) = retries {
        options = options.retries(retries);
    }

    info!("{} {}{}", options.method, client.base_url(), endpoint);

    let data: Value = client.request(endpoint, options).await?;
    println!("{}", serde_json::to_string_pretty(&data)?);

    Ok(())
}

async fn run_health(config: &ClientConfig) -> Result<()> {
    info!("=== API Health Check ===");
    info!("Base URL: {}", config.api_base_url);
    info!("");

    let client = ApiClient::from_config(config)?;

    match client.health_check().await {
        Ok(status) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            anyhow::bail!("API unhealthy: {}", e);
        }
    }

    info!("");
    info!("Fetching network status...");
    match client.network_status().await {
        Ok(status) => info!("Network status: {}", status),
        Err(e) => warn!("Network status unavailable: {}", e),
    }

    Ok(())
}

async fn run_price(config: &ClientConfig, token: &str) -> Result<()> {
    let client = ApiClient::from_config(config)?;

    info!("Fetching price for {}...", token);
    let quote = client
        .get_price(token)
        .await
        .with_context(|| format!("Failed to fetch price for {}", token))?;

    info!("{}: {} ({} source(s))", quote.token, quote.price, quote.sources);
    println!("{}", serde_json::to_string_pretty(&quote)?);

    Ok(())
}

async fn run_watch(
    config: &ClientConfig,
    topics: Vec<String>,
    out: Option<PathBuf>,
    limit: u64,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let out = out.unwrap_or_else(|| {
        PathBuf::from("data").join(generate_output_filename("qverse_watch", "jsonl"))
    });

    info!("=== Realtime Watch ===");
    info!("Endpoint: {}", config.ws_url);
    info!("Topics: {} topic(s)", topics.len());
    for (i, topic) in topics.iter().enumerate() {
        info!("  [{}]: {}", i, topic);
    }
    info!("Output: {}", out.display());
    info!("Limit: {} (0 = unlimited)", limit);
    info!("Press Ctrl+C to stop");
    info!("");

    // Ensure output directory exists
    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(&out).await.context("Failed to create output file")?;

    let client = RealtimeClient::with_config(config);

    let mut subscriptions = vec![
        client.subscribe_event(Topic::Connected, |_| info!("Stream connected")),
        client.subscribe_event(Topic::Disconnected, |_| warn!("Stream disconnected")),
        client.subscribe_event(Topic::Error, |event| {
            if let RealtimeEvent::Error { message } = event {
                warn!("Stream error: {}", message);
            }
        }),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
    for topic in &topics {
        let tx = tx.clone();
        let name = topic.clone();
        subscriptions.push(client.subscribe(topic.as_str(), move |data| {
            let _ = tx.send((name.clone(), data.clone()));
        }));
    }
    drop(tx);

    client.connect();

    let mut collected: u64 = 0;
    while !shutdown.load(Ordering::Relaxed) {
        if limit > 0 && collected >= limit {
            info!("Reached message limit: {}", limit);
            break;
        }

        // Wake up periodically to observe Ctrl+C
        match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some((topic, data))) => {
                let line = json!({
                    "topic": topic,
                    "received_at": Utc::now().to_rfc3339(),
                    "data": data,
                });
                file.write_all(line.to_string().as_bytes()).await?;
                file.write_all(b"\n").await?;
                collected += 1;

                if collected % 100 == 0 {
                    file.flush().await?;
                    info!("Collected {} payloads", collected);
                }
            }
            Ok(None) => break,
            Err(_) => {
                if !client.is_connected() && client.is_reconnecting() {
                    info!("Reconnecting (attempt {})...", client.reconnect_attempts());
                }
            }
        }
    }

    // Final flush
    file.flush().await?;

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    let stats = client.stats();
    client.disconnect().await;

    // Print summary
    info!("");
    info!("=== Summary ===");
    info!("Payloads written: {}", collected);
    info!("Total frames: {}", stats.total_frames);
    info!("Dispatched: {}", stats.dispatched);
    info!("Unrouted: {}", stats.unrouted);
    info!("Parse errors: {}", stats.parse_errors);
    info!("Last topic: {:?}", stats.last_topic);
    info!("");
    info!("Topic distribution:");
    let mut types: Vec<_> = stats.type_counts.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1));
    for (topic, count) in types {
        info!("  {}: {}", topic, count);
    }
    info!("");
    info!("Output written to: {}", out.display());

    Ok(())
}

/// Generate timestamped output filename
fn generate_output_filename(prefix: &str, extension: &str) -> String {
    let now = Utc::now();
    format!("{}_{}.{}", prefix, now.format("%Y%m%d_%H%M%S"), extension)
}
