mod cli;

use vintagecast::{
    app::{folder_playlist, Services},
    config,
    generation::{ComfyClient, GenerationService},
    istream::SessionKind,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn serve(media_root: Option<PathBuf>, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(root) = media_root {
        config.server.media_root = root;
    }

    tracing::info!("Starting Vintagecast");
    tracing::info!("Media root: {}", config.server.media_root.display());

    let generation: Option<Arc<dyn GenerationService>> = if config.generation.enabled {
        let client = ComfyClient::new(config.generation.endpoint.as_str())?;
        if config.generation.default_model.is_empty() {
            match client.checkpoints().await {
                Ok(models) => match models.into_iter().next() {
                    Some(model) => {
                        tracing::info!("Using checkpoint {} for new generation sessions", model);
                        config.generation.default_model = model;
                    }
                    None => tracing::warn!("Generation service offers no checkpoints"),
                },
                Err(e) => tracing::warn!("Failed to list checkpoints: {}", e),
            }
        }
        Some(Arc::new(client))
    } else {
        None
    };

    let services = Services::new(config).context("Failed to start services")?;

    let shutdown = CancellationToken::new();
    let workers = services.spawn_workers(&shutdown, generation)?;

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    shutdown.cancel();
    workers.join().await;

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vintagecast=trace,vintagecast_av=debug,vintagecast_common=debug".to_string()
        } else {
            "vintagecast=info,vintagecast_av=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve { media_root } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(media_root, cli.config.as_deref()))
        }
        Commands::Batch { folder } => batch(&folder, cli.config.as_deref()),
        Commands::Purge => purge(cli.config.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vintagecast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn batch(folder: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !folder.is_dir() {
        anyhow::bail!("Folder does not exist: {:?}", folder);
    }

    let services = Services::new(config)?;
    let playlist = folder_playlist(folder)?;
    if playlist.is_empty() {
        println!("No videos found in {}", folder.display());
        return Ok(());
    }

    let scope = folder.canonicalize()?;
    let id = services
        .registry
        .create_session(SessionKind::BatchFolder, scope, playlist)?;
    services.registry.start(id)?;

    println!("Transcoding {}...", folder.display());
    let processed = services.scheduler().run_until_idle();
    services.cache.flush()?;

    let snapshot = services
        .registry
        .snapshot(id)
        .context("Batch session disappeared")?;
    println!("\nProcessed {} item(s)", processed);
    println!("  Completed: {}", snapshot.completed.len());
    if !snapshot.failed.is_empty() {
        println!("  Failed: {}", snapshot.failed.len());
        for identity in &snapshot.failed {
            println!("    {}", identity);
        }
    }

    Ok(())
}

fn purge(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let cache_dir = config.cache_dir();

    if !cache_dir.exists() {
        println!("Nothing to purge: {} does not exist", cache_dir.display());
        return Ok(());
    }

    let cache = vintagecast::cache::CacheIndex::open(&cache_dir)?;
    let report = cache.purge_all()?;
    println!("Removed {} cached artifact(s)", report.removed);
    if report.failed > 0 {
        println!("{} artifact(s) could not be removed", report.failed);
    }

    // Only succeeds when nothing else was left behind.
    if std::fs::remove_dir(&cache_dir).is_ok() {
        println!("Removed {}", cache_dir.display());
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let statuses = vintagecast_av::check_tools(|tool| config.tools.path_for(tool));
    let mut all_ok = true;

    for status in &statuses {
        let mark = if status.is_usable() {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", mark, status.tool);

        if let Some(ref version) = status.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = status.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        anyhow::bail!("Required tools are missing; workers cannot start without them");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Media root: {}", config.server.media_root.display());
    println!("  Cache dir: {}", config.cache_dir().display());
    println!("  Transcode strategy: {:?}", config.transcode.strategy);
    println!("  Crawler enabled: {}", config.crawler.enabled);
    println!("  Generation enabled: {}", config.generation.enabled);

    Ok(())
}
