//! Embercast - Stateless Video Render Worker
//!
//! This is the main entry point for the Embercast worker, which renders
//! timed image sequences into H.264 video with ffmpeg, composites optional
//! smoke/embers overlays, and reports progress to an external store.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use embercast::cli::{Args, Commands};
use embercast::config::{Config, GpuPolicy};
use embercast::job::RenderJob;
use embercast::probe;
use embercast::workflow::Workflow;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    info!("Starting Embercast - Stateless Video Render Worker");

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            // Try to load config.toml from current directory first
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    // Execute command
    match args.command {
        Commands::Probe => {
            let capability = probe::probe(&config.encoder).await;
            if capability.available {
                println!("GPU encoder: available (h264_nvenc)");
            } else {
                println!("GPU encoder: unavailable ({})", capability.reason);
            }
        }
        Commands::Render { job, no_progress } => {
            // Probe once at startup; the outcome is immutable for every
            // job this process handles.
            let capability = probe::probe(&config.encoder).await;
            match (capability.available, config.encoder.gpu_policy) {
                (true, _) => info!("Encoder: h264_nvenc (GPU)"),
                (false, GpuPolicy::CpuFallback) => {
                    warn!(
                        "GPU encoder unusable ({}), jobs will render on libx264",
                        capability.reason
                    );
                }
                (false, GpuPolicy::FailFast) => {
                    warn!(
                        "GPU encoder unusable ({}), jobs will be rejected (fail-fast)",
                        capability.reason
                    );
                }
            }
            config.overlays.check();

            let payload = std::fs::read_to_string(&job)?;
            let render_job: RenderJob = serde_json::from_str(&payload)?;

            let bar = if no_progress {
                None
            } else {
                let pb = ProgressBar::new(100);
                pb.set_style(ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}%")
                    .expect("valid progress template")
                    .progress_chars("#>-"));
                Some(pb)
            };

            let workflow = Workflow::new(config, capability);
            let output = workflow.run_job(render_job, bar.clone()).await;

            if let Some(pb) = bar {
                pb.finish_and_clear();
            }

            println!("{}", serde_json::to_string_pretty(&output)?);
            if !output.is_success() {
                std::process::exit(1);
            }
        }
        Commands::InitConfig { path } => {
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let embercast_dir = std::env::current_dir()?.join(".embercast");
    let log_dir = embercast_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "embercast.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Create console layer
    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    // Setup layered subscriber
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    // Initialize the subscriber
    subscriber.try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("embercast.log").display());

    Ok(())
}
