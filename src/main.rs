mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cf_av::stages::{Position, TextOverlay};
use cf_av::{AssetHandle, ScratchDir, ToolRegistry};
use cf_core::config::Config;
use cf_pipeline::{FfmpegRunner, Upload, VideoPipeline};
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "clipforge=trace,cf_core=debug,cf_av=trace,cf_pipeline=debug,cf_server=debug,tower_http=debug"
                .to_string()
        } else {
            "clipforge=info,cf_av=info,cf_pipeline=info,cf_server=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = load_config(config_path)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            tracing::info!(
                "Server will listen on {}:{}",
                config.server.host,
                config.server.port
            );
            runtime()?.block_on(cf_server::start(config))?;
            Ok(())
        }
        Commands::Text {
            input,
            text,
            position,
            font_size,
            color,
            output,
        } => {
            let overlay = TextOverlay::new(text, Position::for_text(Some(&position)), font_size, color)?;
            let pipeline = local_pipeline(config_path)?;
            runtime()?.block_on(async {
                let video = read_upload(&input).await?;
                let handle = pipeline.add_text(video, &overlay).await?;
                deliver(&pipeline, handle, &output).await
            })
        }
        Commands::Overlay {
            video,
            image,
            position,
            output,
        } => {
            let pipeline = local_pipeline(config_path)?;
            runtime()?.block_on(async {
                let video = read_upload(&video).await?;
                let image = read_upload(&image).await?;
                let handle = pipeline
                    .add_image(video, image, Position::for_overlay(Some(&position)))
                    .await?;
                deliver(&pipeline, handle, &output).await
            })
        }
        Commands::Speed {
            input,
            factor,
            output,
        } => {
            let pipeline = local_pipeline(config_path)?;
            runtime()?.block_on(async {
                let video = read_upload(&input).await?;
                let handle = pipeline.change_speed(video, factor).await?;
                deliver(&pipeline, handle, &output).await
            })
        }
        Commands::Merge { clips, output } => {
            let pipeline = local_pipeline(config_path)?;
            runtime()?.block_on(async {
                let mut uploads = Vec::with_capacity(clips.len());
                for clip in &clips {
                    uploads.push(read_upload(clip).await?);
                }
                let handle = pipeline.merge(uploads).await?;
                deliver(&pipeline, handle, &output).await
            })
        }
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Sweep => sweep(config_path),
        Commands::Version => {
            println!("clipforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start tokio runtime")
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p).with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(Config::default()),
    }
}

/// Pipeline for one-shot local operations, using the configured scratch
/// directory and the discovered ffmpeg.
fn local_pipeline(config_path: Option<&Path>) -> Result<VideoPipeline> {
    let config = load_config(config_path)?;
    let tools = ToolRegistry::discover(&config.tools);
    let scratch = ScratchDir::new(&config.scratch.dir)
        .with_context(|| format!("failed to open scratch dir {}", config.scratch.dir.display()))?;
    Ok(VideoPipeline::new(
        Arc::new(FfmpegRunner::from_registry(&tools)),
        scratch,
        config.pipeline.stage_timeout(),
    ))
}

async fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path.file_name().map(|n| n.to_string_lossy().to_string());
    Ok(Upload::new(bytes, filename))
}

/// Copy the final artifact to `output`, then release it from scratch.
async fn deliver(pipeline: &VideoPipeline, handle: AssetHandle, output: &Path) -> Result<()> {
    let copied = tokio::fs::copy(handle.path(), output).await;
    pipeline.scratch().release(&handle);
    let bytes = copied.with_context(|| format!("failed to write {}", output.display()))?;
    println!("Output: {} ({bytes} bytes)", output.display());
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();
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
            print!(" ({version})");
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
        println!("Some tools are missing. Install ffmpeg to enable video processing.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = load_config(Some(p))?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Max upload: {} bytes", config.server.max_upload_bytes);
    println!("  Stage timeout: {}s", config.pipeline.stage_timeout_secs);
    println!("  Scratch dir: {}", config.scratch.dir.display());
    println!(
        "  Rate limit: {}",
        if config.rate_limit.enabled {
            format!(
                "{} burst, {} per {}s",
                config.rate_limit.capacity,
                config.rate_limit.refill_tokens,
                config.rate_limit.refill_interval_secs
            )
        } else {
            "disabled".to_string()
        }
    );

    for warning in config.validate() {
        println!("  ⚠ {warning}");
    }

    Ok(())
}

fn sweep(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let scratch = ScratchDir::new(&config.scratch.dir)
        .with_context(|| format!("failed to open scratch dir {}", config.scratch.dir.display()))?;
    let report = scratch.sweep_expired(config.scratch.retention());
    println!(
        "Removed {} expired files from {} ({} failed)",
        report.removed,
        scratch.root().display(),
        report.failed
    );
    Ok(())
}
