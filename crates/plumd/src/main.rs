use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use plumd::Config;
use plumd::Engine;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Discover Plum lightpads on the local network and keep them in sync
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(default_value = "plumd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("plumd starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let mut engine = Engine::new(&config).context("creating engine")?;

    engine.add_lightpad_listener(|lightpad| {
        tracing::info!(
            "Lightpad {} ({}) online at {}",
            lightpad.lpid(),
            lightpad.name().unwrap_or("unnamed"),
            lightpad.address()
        );
    });

    engine.add_load_listener(|load| {
        let level = load.metrics().map(|m| m.level);
        tracing::info!(
            "Logical load {} in {} (level {:?}, dimmable: {})",
            load.name(),
            load.room_name().unwrap_or("unknown room"),
            level,
            load.dimmable()
        );
    });

    engine.start().await.context("starting engine")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    tracing::info!(
        "Shutting down with {} lightpad(s) in {} load(s)",
        engine.lightpads().len(),
        engine.logical_loads().len()
    );
    engine.shutdown();

    Ok(())
}
