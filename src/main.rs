mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use fanout_av::ToolRegistry;
use fanout_core::config::Config;
use fanout_core::events::{progress_channel, ProgressEvent, ProgressKind};
use fanout_pipeline::{DestinationOutcome, FfmpegProcessor, Orchestrator, RunReport};
use fanout_rules::Resolution;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CRATES: &[&str] = &[
    "fanout",
    "fanout_core",
    "fanout_probe",
    "fanout_rules",
    "fanout_media",
    "fanout_av",
    "fanout_upload",
    "fanout_pipeline",
];

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise -v raises every fanout crate together.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        let level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        CRATES
            .iter()
            .map(|c| format!("{c}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    });

    // Logs go to stderr so JSON on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Probe { file, json } => {
            rt.block_on(probe_file(&file, cli.config.as_deref(), json))
        }
        Commands::Plan { input, json } => {
            let config = require_config(cli.config.as_deref(), "plan")?;
            rt.block_on(plan_file(&input, config, json))
        }
        Commands::Run { input, out_dir } => {
            let config = require_config(cli.config.as_deref(), "run")?;
            rt.block_on(run_file(&input, config, out_dir.as_deref()))
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(cli.config.as_deref());
            check_tools(&config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("fanout {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn require_config(path: Option<&Path>, command: &str) -> Result<Config> {
    let path = path.with_context(|| format!("`{command}` needs destinations: pass --config"))?;
    let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
    for warning in config.validate() {
        tracing::warn!("config: {warning}");
    }
    Ok(config)
}

fn orchestrator(config: Config) -> Orchestrator {
    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let processor = FfmpegProcessor::new(tools, config.transcode.clone());
    Orchestrator::new(Arc::new(config), Arc::new(processor))
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("File does not exist: {}", path.display());
    }
    Ok(())
}

async fn probe_file(file: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    ensure_exists(file)?;
    let orch = orchestrator(Config::load_or_default(config_path));
    let media = orch.probe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&media)?);
        return Ok(());
    }

    let secs = media.duration_secs.round() as u64;
    println!("File: {}", media.path.display());
    println!("Size: {} bytes", media.byte_size);
    println!(
        "Duration: {:02}:{:02}:{:02} ({:.3}s)",
        secs / 3600,
        secs / 60 % 60,
        secs % 60,
        media.duration_secs
    );
    print!("Video: {} {}x{}", media.video_codec, media.width, media.height);
    match media.frame_rate {
        Some(fps) => println!(" @ {fps:.3} fps"),
        None => println!(" (frame rate unknown)"),
    }
    println!("Audio: {}", if media.has_audio { "yes" } else { "no" });
    Ok(())
}

async fn plan_file(input: &Path, config: Config, json: bool) -> Result<()> {
    ensure_exists(input)?;
    let orch = orchestrator(config);
    let media = orch.probe(input).await?;
    let plans = orch.plan(&media);

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    for entry in &plans {
        let plan = &entry.plan;
        print!("{}: ", entry.destination);
        match plan.resolution {
            Resolution::NoAction => println!("deliver unchanged"),
            Resolution::TrimOnly { ref window } => {
                println!("trim to {:.2}s without re-encoding", window.end_secs)
            }
            Resolution::Transcode { ref profile } => println!(
                "transcode to {}x{} @ {:.2} fps, {} kbps video{}",
                profile.width,
                profile.height,
                profile.frame_rate,
                profile.video_bitrate_kbps,
                profile
                    .trim
                    .map(|t| format!(", trimmed to {:.2}s", t.end_secs))
                    .unwrap_or_default()
            ),
            Resolution::Reject { ref reason } => println!("rejected: {reason}"),
        }
        if !matches!(plan.resolution, Resolution::Reject { .. }) {
            println!(
                "    output {:.2}s, about {} bytes",
                plan.output_duration_secs, plan.estimated_size_bytes
            );
        }
        for warning in &plan.warnings {
            println!("    warning: {warning}");
        }
    }
    Ok(())
}

async fn run_file(input: &Path, config: Config, out_dir: Option<&Path>) -> Result<()> {
    ensure_exists(input)?;
    let orch = orchestrator(config);

    let (progress, rx) = progress_channel(256);
    let drain = tokio::spawn(log_progress(rx));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling all destinations");
            on_signal.cancel();
        }
    });

    let result = orch.run(input, &progress, &cancel).await;
    drop(progress);
    drain.await.context("progress logger stopped unexpectedly")?;
    let report = result?;

    if let Some(dir) = out_dir {
        let written = write_hls_artifacts(&report, dir)?;
        for path in written {
            tracing::info!(path = %path.display(), "wrote HLS artifact");
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed() > 0 {
        anyhow::bail!(
            "{} of {} destinations failed",
            report.failed(),
            report.destinations.len()
        );
    }
    Ok(())
}

async fn log_progress(mut rx: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        let destination = event.destination.as_str();
        let stage = event.stage;
        match event.kind {
            ProgressKind::Stage | ProgressKind::Completed => {
                tracing::info!(destination, stage = %stage, "{}", event.status)
            }
            ProgressKind::Progress => tracing::debug!(
                destination,
                stage = %stage,
                fraction = event.fraction.unwrap_or(0.0),
                sent_bytes = event.sent_bytes,
                total_bytes = event.total_bytes,
                "{}",
                event.status
            ),
            ProgressKind::Warning => {
                tracing::warn!(destination, stage = %stage, "{}", event.status)
            }
            ProgressKind::Failed => tracing::error!(
                destination,
                stage = %stage,
                sent_bytes = event.sent_bytes,
                total_bytes = event.total_bytes,
                "{}",
                event.status
            ),
        }
    }
}

/// Write each HLS destination's manifest and thumbnail under `dir`.
fn write_hls_artifacts(report: &RunReport, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for outcome in &report.destinations {
        let DestinationOutcome::Delivered(delivered) = outcome else {
            continue;
        };
        let Some(ref hls) = delivered.hls else {
            continue;
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;

        let manifest = dir.join(format!("{}.m3u8", delivered.destination));
        std::fs::write(&manifest, &hls.manifest)
            .with_context(|| format!("writing {}", manifest.display()))?;
        written.push(manifest);

        if let Some(ref thumbnail) = hls.thumbnail {
            let path = dir.join(format!("{}.jpg", delivered.destination));
            std::fs::write(&path, thumbnail)
                .with_context(|| format!("writing {}", path.display()))?;
            written.push(path);
        }
    }
    Ok(written)
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let registry = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in registry.check_all() {
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
        println!("Some tools are missing. MP4 and Matroska sources can still be probed,");
        println!("and destinations that need no trim or transcode can still be served.");
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let Some(p) = path else {
        println!("No config file specified, using defaults");
        let config = Config::default();
        println!("  Segment duration: {}s", config.hls.segment_duration_secs);
        println!("  Chunk size: {} bytes", config.upload.chunk_size_bytes);
        return Ok(());
    };

    println!("Validating config: {}", p.display());
    let config = Config::load(p)?;
    let warnings = config.validate();

    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration loaded with {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {warning}");
        }
    }
    println!("  Destinations: {}", config.destinations.len());
    for dest in &config.destinations {
        println!(
            "    {} ({}, {} delivery)",
            dest.name,
            dest.endpoint.protocol_name(),
            dest.delivery
        );
    }

    if !warnings.is_empty() {
        anyhow::bail!("configuration has {} warning(s)", warnings.len());
    }
    Ok(())
}
