mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    tracing::debug!("Loaded config from {:?}", path);
    Ok(config)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./loopcast.toml",
        "./config.toml",
        "~/.config/loopcast/config.toml",
        "/etc/loopcast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let config = Config::default();
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.source.width == 0 || config.source.height == 0 {
        anyhow::bail!(
            "Frame size must be non-zero, got {}x{}",
            config.source.width,
            config.source.height
        );
    }
    if !config.source.frames_dir.exists() {
        tracing::warn!("Frames directory does not exist: {:?}", config.source.frames_dir);
    }

    if config.encoder.fps == 0 {
        anyhow::bail!("Encoder fps must be greater than 0");
    }
    if config.encoder.gop == 0 {
        anyhow::bail!("Encoder GOP size must be greater than 0");
    }
    if config.encoder.crf > 51 {
        anyhow::bail!("Encoder CRF must be between 0 and 51, got {}", config.encoder.crf);
    }
    if config.encoder.input_queue_frames == 0 {
        anyhow::bail!("Encoder input queue must hold at least one frame");
    }

    if config.output.max_atom_size < 8 {
        anyhow::bail!("Maximum atom size cannot be smaller than an atom header");
    }

    if config.live.poll_interval_ms == 0 {
        anyhow::bail!("Live poll interval cannot be 0");
    }

    if let Some(ref dir) = config.server.static_dir {
        if !dir.join("index.html").exists() {
            tracing::warn!("Static directory has no index.html: {:?}", dir);
        }
    }

    Ok(())
}
