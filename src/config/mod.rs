mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./vintagecast.toml",
        "~/.config/vintagecast/config.toml",
        "/etc/vintagecast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if !config.server.media_root.exists() {
        tracing::warn!("Media root does not exist: {:?}", config.server.media_root);
    }

    if config.transcode.max_pixels == 0 || config.preview.max_pixels == 0 {
        anyhow::bail!("Transcode pixel budgets must be greater than 0");
    }

    if config.transcode.frame_rate == 0 || config.preview.frame_rate == 0 {
        anyhow::bail!("Frame rates must be greater than 0");
    }

    if config.slideshow.batch_size == 0 {
        anyhow::bail!("Slideshow batch size must be greater than 0");
    }

    if config.slideshow.max_pixels == 0 {
        anyhow::bail!("Slideshow pixel budget must be greater than 0");
    }

    for (name, quality) in [
        ("slideshow", config.slideshow.jpeg_quality),
        ("thumbnails", config.thumbnails.jpeg_quality),
    ] {
        if !(1..=100).contains(&quality) {
            anyhow::bail!("{} JPEG quality must be between 1 and 100", name);
        }
    }

    if config.thumbnails.width == 0 {
        anyhow::bail!("Thumbnail width must be greater than 0");
    }

    if config.generation.enabled && config.generation.endpoint.trim().is_empty() {
        anyhow::bail!("Generation is enabled but has no endpoint");
    }

    if config.generation.heartbeat_secs == 0 {
        anyhow::bail!("Generation heartbeat must be at least one second");
    }

    Ok(())
}
