// src/main.rs

//! A minimal demonstration client: loads a TOML config, connects, and
//! exercises a lock acquire/release round trip. Useful for manual smoke
//! testing against a running server; not a product surface of its own.

use std::env;
use std::time::Duration;

use anyhow::Result;
use orbiter::{Client, Config};
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("orbiter version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.0.clone());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).compact().with_ansi(true).init();

    let client = match Client::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("failed to connect: {e}");
            std::process::exit(1);
        }
    };

    let mut lock = client.lock("orbiter:demo-lock");
    info!("acquiring demo lock...");
    if lock.acquire(Duration::from_secs(5)).await? {
        info!("lock acquired, releasing immediately");
        lock.release().await?;
    } else {
        error!("failed to acquire demo lock within the wait window");
    }

    client.shutdown();
    Ok(())
}
