//! Offline Proxy - cache-first fetch proxy for web clients
//!
//! Prefetches a fixed set of static assets at install time and then serves
//! every intercepted fetch from cache, falling back to the network.

mod cache;
mod config;
mod errors;
mod http;
mod ipc;
mod worker;

use anyhow::{anyhow, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cache::CacheStorage;
use config::ProxyConfig;
use http::NetworkFetcher;
use ipc::IpcServer;
use worker::{CacheProxy, FetchOutcome};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Prefetch assets once and report (CLI mode)
    Install,
    /// Fetch one URL through the proxy (CLI mode)
    Fetch { url: String },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"Offline Proxy - cache-first proxy with install-time asset prefetch

USAGE:
    offline-proxy                 # Run IPC server (default)
    offline-proxy install
    offline-proxy fetch <url>
    offline-proxy help

COMMANDS:
    (none)  Install, activate, then serve clients on the Unix socket
    install Prefetch the configured assets and print the report
    fetch   Install, activate, and fetch one URL (absolute or origin-relative)
    help    Show this help message

EXAMPLES:
    # Run the proxy daemon
    offline-proxy

    # Check which assets can be prefetched
    offline-proxy install

    # Fetch through the cache
    offline-proxy fetch /index.html

ENVIRONMENT:
    OFFLINE_PROXY_CONFIG     Path to config.json (default: ~/.config/offline-proxy/config.json)
    OFFLINE_PROXY_ORIGIN     Origin relative URLs resolve against
    OFFLINE_PROXY_SOCKET     Unix socket path
    OFFLINE_PROXY_CACHE_DIR  Persist caches under this directory
    RUST_LOG                 Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Server);
    }

    match args[1].as_str() {
        "install" => Ok(Command::Install),
        "fetch" => {
            if args.len() < 3 {
                return Err(anyhow!("Usage: offline-proxy fetch <url>"));
            }
            Ok(Command::Fetch {
                url: args[2].clone(),
            })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

fn build_proxy(config: &ProxyConfig) -> Result<Arc<CacheProxy>> {
    let storage = match &config.persist_dir {
        Some(dir) => CacheStorage::persistent(dir.clone()),
        None => CacheStorage::in_memory(),
    };
    let fetcher = NetworkFetcher::new(config.request_timeout())?;
    let proxy = CacheProxy::new(config.clone(), Arc::new(storage), Arc::new(fetcher))?;
    Ok(Arc::new(proxy))
}

/// Install, activate, then serve clients until Ctrl+C
async fn run_server(config: ProxyConfig) -> Result<()> {
    info!(origin = %config.origin, cache = %config.effective_cache_name(), "Starting offline proxy");

    let proxy = build_proxy(&config)?;
    proxy.install().await?;
    proxy.activate().await?;

    let mut ipc_server = IpcServer::new(Arc::clone(&proxy), config.socket_path.clone());
    if let Err(e) = ipc_server.start().await {
        error!(error = %e, "Failed to start IPC server");
        return Err(e);
    }
    let ipc_server = Arc::new(ipc_server);

    info!("Proxy ready. Waiting for clients...");

    // Run IPC server in a separate task
    let runner = Arc::clone(&ipc_server);
    tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!(error = %e, "IPC server error");
        }
    });

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal, stopping...");
    ipc_server.stop().await?;

    info!("Shutdown complete.");
    Ok(())
}

async fn run_install(config: ProxyConfig) -> Result<()> {
    let proxy = build_proxy(&config)?;
    let report = proxy.install().await?;
    println!("Cache: {}", report.cache_name);
    for url in &report.cached {
        println!("  cached  {}", url);
    }
    for (url, error) in &report.failed {
        println!("  failed  {} ({})", url, error);
    }
    Ok(())
}

async fn run_fetch(config: ProxyConfig, url: &str) -> Result<()> {
    let proxy = build_proxy(&config)?;
    proxy.install().await?;
    proxy.activate().await?;

    let request = proxy.resolve(url)?;
    match proxy.fetch(request).await? {
        FetchOutcome::Respond { response, source } => {
            println!(
                "{} {} ({} bytes, from {:?})",
                response.status,
                response.status_text,
                response.body.len(),
                source
            );
            for (name, value) in response.headers.iter() {
                println!("  {}: {}", name, value);
            }
        }
        FetchOutcome::Passthrough => {
            println!("Not intercepted: {}", url);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Server => run_server(ProxyConfig::load()?).await,
        Command::Install => run_install(ProxyConfig::load()?).await,
        Command::Fetch { url } => run_fetch(ProxyConfig::load()?, &url).await,
    }
}
