use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tailburn_core::transfer::{AckOutcome, PreparedShare, ShareOptions, prepare_share, receive};
use tailburn_core::{BurnConfig, identity};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "debug,tailburn_core=debug"
    } else {
        "info,tailburn_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = BurnConfig::load();
    tracing::debug!("Loaded config: {:?}", config);

    match args.cmd {
        Command::Send {
            target,
            timeout,
            wipe,
            port,
            bind,
            public_host,
            file,
        } => {
            if let Some(minutes) = timeout {
                config.timeout_minutes = minutes;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if bind.is_some() {
                config.bind_address = bind;
            }
            if public_host.is_some() {
                config.public_host = public_host;
            }
            send(&config, file, target, wipe).await
        }
        Command::Receive { url, output_dir } => fetch(&config, &url, &output_dir).await,
    }
}

async fn send(config: &BurnConfig, file: PathBuf, target: String, wipe: bool) -> Result<()> {
    let resolver = identity::from_provider(&config.identity, config.self_identity.clone());
    let mut options = ShareOptions::from_config(config, file, target, resolver);
    options.wipe = wipe;

    let share = prepare_share(options)
        .await
        .context("Failed to start share")?;
    print_summary(&share, config.timeout_minutes);

    let reason = share.run().await?;
    println!("\nShutting down: {}", reason);
    Ok(())
}

fn print_summary(share: &PreparedShare, timeout_minutes: u64) {
    let file = share.file();
    println!("tail-burn: sharing {} ({})", file.name, file.size_display);
    println!("  Target:  {}", share.target());
    println!("  Expires: {} minutes", timeout_minutes);
    if share.wipe_enabled() {
        println!("  WARNING: the source file will be deleted after the share ends");
    }
    println!();
    println!("Browser link:");
    println!("  {}", share.url());
    println!("Or from a terminal:");
    println!("  tail-burn receive {}", share.url());
}

async fn fetch(config: &BurnConfig, url: &str, output_dir: &Path) -> Result<()> {
    let retrieval = match receive(url, output_dir, config.client_timeout()).await {
        Ok(retrieval) => retrieval,
        Err(e) if e.is_integrity_failure() => {
            bail!("{}. Not acknowledging, the share stays open for a retry", e)
        }
        Err(e) => return Err(e).context("Download failed"),
    };

    println!(
        "Saved {:?} ({} bytes)",
        retrieval.saved_path, retrieval.bytes
    );
    match retrieval.ack {
        AckOutcome::Confirmed => println!("Server confirmed destruction"),
        AckOutcome::NotConfirmed(status) => {
            println!("Warning: server did not confirm destruction (HTTP {})", status)
        }
        AckOutcome::Unreachable(_) => {
            println!("Warning: could not reach server to confirm, it may have already timed out")
        }
    }
    Ok(())
}
