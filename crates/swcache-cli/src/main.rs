//! swcache - command line host for the offline cache manager.
//!
//! Precaches a site's shell into a versioned bucket, answers requests
//! cache-first, and polls the config for new versions the way the site's
//! registration script polls for a new service worker.

mod host;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use swcache_core::utils::{format_bytes, truncate_string};
use swcache_core::worker::ResponseSource;
use swcache_core::Config;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use host::{load_config, Host};

const USAGE: &str = "\
Usage: swcache [--config PATH] <command>

Commands:
  init                  Write a default config file
  precache              Install the configured version and activate it
  fetch <url>...        Fetch through the cache (root-relative or absolute)
  list                  List cache buckets
  watch [--auto-update] Poll the config for new versions
";

/// Longest URL shown in `fetch` output before truncating
const MAX_URL_DISPLAY: usize = 60;

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_option(&mut args, "--config").map(PathBuf::from);

    let Some(command) = args.first().cloned() else {
        eprint!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    if command == "init" {
        let path = match config_path {
            Some(path) => path,
            None => Config::config_path()?,
        };
        init(&path)?;
        eprintln!("✓ Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = load_config(config_path.as_ref())?;
    let host = Host::new(&config, config_path)?;

    match command.as_str() {
        "precache" => precache(&host, &config).await,
        "fetch" => fetch(&host, &config, rest).await,
        "list" => list(&host).await,
        "watch" => watch(&host, &config, rest.iter().any(|a| a == "--auto-update")).await,
        "-h" | "--help" | "help" => {
            eprint!("{}", USAGE);
            Ok(())
        }
        other => {
            eprint!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

/// Remove `--name VALUE` from `args`, returning VALUE.
fn take_option(args: &mut Vec<String>, name: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == name)?;
    if pos + 1 >= args.len() {
        args.remove(pos);
        return None;
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Some(value)
}

/// Write the default config to `path`. An existing file is left alone.
fn init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config already exists at {}", path.display());
    }
    Config::default().save_to(path)
}

async fn precache(host: &Host, config: &Config) -> Result<()> {
    eprintln!(
        "Precaching {} entries as {}...",
        config.manifest.len(),
        config.version
    );
    let state = host.precache(config).await?;
    eprintln!("✓ {} is {}", config.version, state);
    Ok(())
}

async fn fetch(host: &Host, config: &Config, targets: &[String]) -> Result<()> {
    if targets.is_empty() {
        anyhow::bail!("fetch needs at least one URL");
    }
    host.start(config).await?;

    for target in targets {
        let shown = truncate_string(target, MAX_URL_DISPLAY);
        match host.registration().fetch_url(target).await {
            Ok(outcome) => {
                let source = match outcome.source {
                    ResponseSource::Cache => "cache",
                    ResponseSource::Network => "network",
                    ResponseSource::Passthrough => "passthrough",
                };
                eprintln!(
                    "✓ {} {} ({}, {})",
                    outcome.response.status,
                    shown,
                    source,
                    format_bytes(outcome.response.body.len() as u64)
                );
            }
            Err(e) => eprintln!("✗ {}: {}", shown, e),
        }
    }

    host.registration().flush_writes().await;
    Ok(())
}

async fn list(host: &Host) -> Result<()> {
    let summaries = host.bucket_summaries().await?;
    if summaries.is_empty() {
        eprintln!("No cache buckets.");
        return Ok(());
    }
    for summary in summaries {
        let updated = summary
            .newest
            .map(|n| n.age_display())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}\t{} entries\t{}\tupdated {}",
            summary.name,
            summary.entries,
            format_bytes(summary.bytes),
            updated
        );
    }
    Ok(())
}

async fn watch(host: &Host, config: &Config, auto_update: bool) -> Result<()> {
    let state = host.start(config).await?;
    info!(version = %config.version, state = %state, "Watching for updates");

    let mut controller = host.registration().subscribe_controller();
    let mut ticker = tokio::time::interval(config.update_interval());
    // The first tick fires immediately and the current version is already live
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = host.check_for_update(auto_update).await {
                    eprintln!("✗ Update check failed: {:#}", e);
                }
            }
            changed = controller.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(version) = controller.borrow_and_update().clone() {
                    eprintln!("✓ New version {} activated", version);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    host.registration().flush_writes().await;
    Ok(())
}
