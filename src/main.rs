mod cli;

use loopcast::{
    config::{self, Config},
    pipeline::Pipeline,
    server,
    store::OutputLayout,
};
use loopcast_av::{scan_frames_dir, FfmpegEncoder, FramePacer};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "loopcast=trace,loopcast_media=trace,loopcast_av=trace,tower_http=debug".to_string()
        } else {
            "loopcast=debug,loopcast_media=debug,loopcast_av=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let config = load_with_overrides(cli.config.as_deref(), host, port)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start(config))
        }
        Commands::Encode => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(encode(config))
        }
        Commands::Serve { host, port } => {
            let config = load_with_overrides(cli.config.as_deref(), host, port)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(config))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate { file } => {
            let path = file.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("loopcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_with_overrides(
    path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<Config> {
    let mut config = config::load_config_or_default(path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;
    Ok(config)
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        server::shutdown_signal().await;
        token.cancel();
    });
}

async fn run_pipeline(config: &Config, cancel: CancellationToken) -> Result<()> {
    let sources = scan_frames_dir(&config.source.frames_dir, &config.source.options())
        .with_context(|| format!("Failed to load frames from {:?}", config.source.frames_dir))?;

    let pacer = FramePacer::new(sources, config.encoder.fps as f64)?;
    let encoder = FfmpegEncoder::locate(
        config.encoder.ffmpeg_path.as_deref(),
        config.encoder_settings(),
    )?;

    Pipeline::new(pacer, encoder, OutputLayout::new(&config.output.dir))
        .with_max_atom_size(config.output.max_atom_size)
        .run(cancel)
        .await?;
    Ok(())
}

async fn start(config: Config) -> Result<()> {
    tracing::info!("Starting loopcast");

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    // whichever side stops first takes the other down with it
    let (pipeline, server) = tokio::join!(
        async {
            let result = run_pipeline(&config, shutdown.clone()).await;
            shutdown.cancel();
            result
        },
        async {
            let result = server::start_server(&config, shutdown.clone()).await;
            shutdown.cancel();
            result
        },
    );

    pipeline.context("Pipeline failed")?;
    server
}

async fn encode(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());
    run_pipeline(&config, shutdown).await
}

async fn serve(config: Config) -> Result<()> {
    let layout = OutputLayout::new(&config.output.dir);
    if !layout.is_primed().await {
        tracing::warn!(
            "No init segment in {:?} yet, clients are refused until a pipeline writes one",
            layout.dir()
        );
    }

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());
    server::start_server(&config, shutdown).await
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = loopcast_av::check_tools(config.encoder.ffmpeg_path.as_deref());
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg with libx264 to run the pipeline.");
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
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Frames: {:?} ({}x{} {})",
        config.source.frames_dir,
        config.source.width,
        config.source.height,
        config.source.input_format
    );
    println!(
        "  Encoder: {} fps, GOP {}, CRF {}, preset {}",
        config.encoder.fps, config.encoder.gop, config.encoder.crf, config.encoder.preset
    );
    println!("  Output: {:?}", config.output.dir);
    println!(
        "  Live: poll every {} ms, replay history: {}",
        config.live.poll_interval_ms, config.live.replay_history
    );

    Ok(())
}
